//! Port-specific error types.
//!
//! Each stage of a connection's life has its own error type so callers can
//! tell an open failure (retryable) from a write failure (surfaced to the
//! writer) without string matching. Read and close failures never leave the
//! connection; they are logged and absorbed.

use std::io;
use thiserror::Error;

/// Errors raised while acquiring a native line.
#[derive(Debug, Error)]
pub enum OpenError {
    /// The device path does not exist.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// The process may not open the device.
    #[error("Access to serial port denied: {0}")]
    PermissionDenied(String),

    /// The device is exclusively claimed by someone else.
    #[error("Serial port is busy: {0}")]
    Busy(String),

    /// The descriptor or driver settings were rejected.
    #[error("Invalid port configuration: {0}")]
    InvalidConfig(String),

    /// Any other failure reported by the native driver.
    #[error("Failed to open serial port {port}: {source}")]
    Driver {
        port: String,
        #[source]
        source: io::Error,
    },
}

impl OpenError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port: impl Into<String>) -> Self {
        Self::NotFound(port.into())
    }

    /// Create an InvalidConfig error from a message.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Wrap a driver I/O error, classifying the well-known kinds.
    pub fn from_io(port: impl Into<String>, source: io::Error) -> Self {
        let port = port.into();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound(port),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(port),
            io::ErrorKind::InvalidInput => Self::InvalidConfig(source.to_string()),
            _ => Self::Driver { port, source },
        }
    }
}

/// Errors raised by the synchronous write path.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The connection has no output sink (never opened, or closed).
    #[error("Serial port {0} is not open")]
    NotOpen(String),

    /// `write_range` was asked for bytes outside the given slice.
    #[error("Write range {offset}..{offset}+{len} is outside a buffer of {available} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        available: usize,
    },

    /// The native sink rejected the write or flush.
    #[error("Write to serial port {port} failed: {source}")]
    Io {
        port: String,
        #[source]
        source: io::Error,
    },
}

/// A failed read inside the receive loop. Logged, never returned to callers.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Read from serial port {port} failed: {source}")]
    Io {
        port: String,
        #[source]
        source: io::Error,
    },
}

/// A failure while releasing a native handle. Close is best-effort, so these
/// are only logged.
#[derive(Debug, Error)]
pub enum CloseError {
    #[error("Failed to close output of serial port {port}: {source}")]
    Sink {
        port: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to close input of serial port {port}: {source}")]
    Source {
        port: String,
        #[source]
        source: io::Error,
    },
}

/// Errors raised when launching the receive loop.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// `start_receive` was called on a connection that is not open.
    #[error("Cannot receive on serial port {0}: port is not open")]
    NotConnected(String),

    /// The worker thread could not be spawned.
    #[error("Failed to spawn receive worker: {0}")]
    Spawn(#[source] io::Error),
}
