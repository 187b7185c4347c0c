//! Serial line layer.
//!
//! `LineDriver` is the seam to the operating system: `SerialPortDriver` backs
//! it with the `serialport` crate and `MockLineDriver` with scripted lines for
//! tests. `PortConnection` sits on top of a driver and owns one line, its
//! receive loop and its listeners.

pub mod connection;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod mock;
mod receiver;
pub mod sync_port;
pub mod traits;

pub use connection::{
    ConnectionOptions, ConnectionState, ConnectionStats, PortConnection, DEFAULT_BUFFER_SIZE,
};
pub use descriptor::{PortDescriptor, DEFAULT_BAUD_RATE, DEFAULT_FLAGS};
pub use error::{CloseError, OpenError, ReadError, ReceiveError, WriteError};
pub use event::{HexDump, ListenerId, ReadEvent, ReadListener};
pub use mock::{MockLineDriver, ReadStep};
pub use sync_port::{available_ports, AvailablePort, SerialPortDriver, FLAG_NON_EXCLUSIVE};
pub use traits::{LineDriver, LineSink, LineSource, NativeLine, DEFAULT_READ_TIMEOUT};
