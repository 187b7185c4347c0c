//! Configuration module for serial-port-hub.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_HUB_CONFIG` environment variable (explicit path)
//! 2. `./config.toml` (current directory)
//! 3. The platform config directory, e.g. `~/.config/serial-port-hub/config.toml`
//!    on Linux or `%APPDATA%\serial-port-hub\config\config.toml` on Windows
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is: `SERIAL_HUB_<SECTION>_<KEY>`
//!
//! Examples:
//! - `SERIAL_HUB_SERIAL_DEFAULT_BAUD=115200`
//! - `SERIAL_HUB_RETRY_DELAY_MS=500`
//! - `SERIAL_HUB_LOGGING_LEVEL=debug`
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_port_hub::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//! println!("Buffer size: {}", config.serial.buffer_size);
//! # Ok::<(), serial_port_hub::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader};
pub use schema::{
    Config, LogFormat, LoggingConfig, PortEntry, ReceiveConfig, RetryConfig, SerialConfig,
};
