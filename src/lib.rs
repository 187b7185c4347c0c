//! Serial Port Hub Library
//!
//! Manages a process-wide set of serial lines: each line is opened by name,
//! read continuously on a background worker that hands every chunk to the
//! registered listeners, and written to on demand. A registry keeps one
//! connection per name, retries failed opens on a timer and lets many
//! consumers share a line through reference-counted handles.
//!
//! # Modules
//!
//! - `port`: descriptors, the driver seam, connections and their receive loop
//! - `registry`: the port registry, delayed open-retry and shared handles
//! - `config`: Configuration management with TOML support
//! - `error`: Unified error handling
//! - `logging`: tracing subscriber setup for the binary
//!
//! # Example
//!
//! ```
//! use serial_port_hub::port::{MockLineDriver, PortDescriptor, ReadEvent};
//! use serial_port_hub::registry::{PortRegistry, RegistrySettings};
//! use std::sync::Arc;
//!
//! let driver = MockLineDriver::new();
//! let registry = PortRegistry::new(Arc::new(driver.clone()), RegistrySettings::default());
//!
//! assert!(registry.open(PortDescriptor::new("MOCK0")).is_open());
//! let port = registry.get("MOCK0").unwrap();
//! port.add_listener(|event: &ReadEvent| println!("{} bytes", event.len()));
//! port.write(b"AT\r\n").unwrap();
//! port.close();
//!
//! assert!(!registry.contains("MOCK0"));
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod port;
pub mod registry;

// Re-export commonly used types for convenience
pub use error::{PortError, PortResult, RegistryError};
pub use port::{
    ConnectionOptions, ConnectionState, LineDriver, MockLineDriver, PortConnection,
    PortDescriptor, ReadEvent, ReadListener, SerialPortDriver,
};
pub use registry::{OpenOutcome, PortRegistry, RegistrySettings, RetryPolicy, SharedPort};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
