//! Core traits for the native line driver.
//!
//! A `LineDriver` turns a `PortDescriptor` into an independent byte source
//! and byte sink. Real hardware (`SerialPortDriver`) and the scriptable
//! `MockLineDriver` implement it interchangeably.

use super::descriptor::PortDescriptor;
use super::error::OpenError;
use std::io;
use std::time::Duration;

/// Default read timeout handed to native drivers. Bounds how long the receive
/// loop can sit in a blocking read before it re-checks for cancellation.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Input half of an open line.
pub trait LineSource: Send {
    /// Block until at least one byte is available, the driver's timeout
    /// elapses, or the line fails. Returns the number of bytes read.
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize>;

    /// Release the input half. Called at most once.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Output half of an open line.
pub trait LineSink: Send {
    /// Write every byte of `data`, in order.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Push buffered output to the device.
    fn flush(&mut self) -> io::Result<()>;

    /// Release the output half. Called at most once.
    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }
}

/// The pair of handles produced by a successful acquisition.
pub struct NativeLine {
    pub source: Box<dyn LineSource>,
    pub sink: Box<dyn LineSink>,
}

impl NativeLine {
    pub fn new(source: impl LineSource + 'static, sink: impl LineSink + 'static) -> Self {
        Self {
            source: Box::new(source),
            sink: Box::new(sink),
        }
    }
}

impl std::fmt::Debug for NativeLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLine").finish_non_exhaustive()
    }
}

/// Capability that acquires native lines.
///
/// Implementations must be shareable across the registry, the retry
/// scheduler and every connection they opened.
pub trait LineDriver: Send + Sync {
    /// Open the device named by `descriptor`.
    fn acquire(&self, descriptor: &PortDescriptor) -> Result<NativeLine, OpenError>;

    /// Called after both halves of a line have been closed.
    fn release(&self, _descriptor: &PortDescriptor) {}
}
