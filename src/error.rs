//! Crate-level error types.
//!
//! `PortError` folds every stage-specific failure into one type so the
//! registry and the binary can carry "whatever went wrong" without losing
//! the original variant.

use crate::config::ConfigError;
use crate::port::error::{CloseError, OpenError, ReadError, ReceiveError, WriteError};
use std::io;
use thiserror::Error;

/// Unified error type for serial line management.
#[derive(Debug, Error)]
pub enum PortError {
    #[error(transparent)]
    Open(#[from] OpenError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Close(#[from] CloseError),

    #[error(transparent)]
    Receive(#[from] ReceiveError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised by the registry's own machinery (not by a port).
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The delayed-retry scheduler could not be started.
    #[error("Failed to start retry scheduler: {0}")]
    Scheduler(#[source] io::Error),
}

/// Convenient Result alias for operations that may fail with any port error.
pub type PortResult<T> = Result<T, PortError>;
