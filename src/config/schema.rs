//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use super::error::{ConfigError, ConfigResult};
use crate::port::{PortDescriptor, DEFAULT_BAUD_RATE, DEFAULT_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial line configuration
    pub serial: SerialConfig,
    /// Receive loop tuning
    pub receive: ReceiveConfig,
    /// Open-retry policy
    pub retry: RetryConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check values that would make every open fail.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.default_baud == 0 {
            return Err(ConfigError::validation(
                "serial.default_baud",
                "must be greater than zero",
            ));
        }
        if self.serial.buffer_size == 0 {
            return Err(ConfigError::validation(
                "serial.buffer_size",
                "must be greater than zero",
            ));
        }
        if self.retry.delay_ms == 0 {
            return Err(ConfigError::validation(
                "retry.delay_ms",
                "must be greater than zero",
            ));
        }
        for (index, port) in self.serial.descriptors().iter().enumerate() {
            port.validate().map_err(|e| {
                ConfigError::validation(format!("serial.ports[{index}]"), e.to_string())
            })?;
        }
        Ok(())
    }
}

/// A port listed under `[[serial.ports]]` or given with `--port`.
///
/// The baud rate is optional here; `SerialConfig::descriptors` fills in
/// `default_baud` and resolves aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    /// Device name or alias
    pub name: String,
    /// Baud rate, or `None` for `serial.default_baud`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
    /// Driver flags
    #[serde(default)]
    pub flags: u32,
}

impl PortEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            baud_rate: None,
            flags: 0,
        }
    }
}

/// Serial line configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate for ports given without one
    pub default_baud: u32,
    /// Receive buffer size in bytes
    pub buffer_size: usize,
    /// Driver read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// How long to wait for a receive loop to exit, in milliseconds
    pub stop_timeout_ms: u64,
    /// Ports opened at start
    pub ports: Vec<PortEntry>,
    /// Port aliases for convenience
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_baud: DEFAULT_BAUD_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout_ms: 100,
            stop_timeout_ms: 1000,
            ports: Vec::new(),
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Turn an entry into the descriptor the registry opens.
    pub fn descriptor(&self, entry: &PortEntry) -> PortDescriptor {
        let baud = entry.baud_rate.unwrap_or(self.default_baud);
        PortDescriptor::with_baud(self.resolve_port(&entry.name), baud).flags(entry.flags)
    }

    /// Descriptors for every configured port, in order.
    pub fn descriptors(&self) -> Vec<PortDescriptor> {
        self.ports.iter().map(|entry| self.descriptor(entry)).collect()
    }

    /// Parse a `name[:baud[:flags]]` argument. A bare name leaves the baud
    /// rate to `default_baud`.
    pub fn parse_port(&self, spec: &str) -> ConfigResult<PortEntry> {
        let parsed: PortDescriptor = spec
            .parse()
            .map_err(|e: crate::port::OpenError| ConfigError::validation("port", e.to_string()))?;
        let baud_rate = (parsed.name() != spec).then(|| parsed.baud_rate());
        Ok(PortEntry {
            name: parsed.name().to_string(),
            baud_rate,
            flags: parsed.driver_flags(),
        })
    }
}

/// Receive loop tuning section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveConfig {
    /// Pause after an empty read, in milliseconds
    pub idle_pause_ms: u64,
    /// Pause after a failed read, in milliseconds
    pub read_error_backoff_ms: u64,
    /// Consecutive read failures before the line is marked faulted (0 = never)
    pub max_consecutive_read_errors: u32,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            idle_pause_ms: 2,
            read_error_backoff_ms: 50,
            max_consecutive_read_errors: 32,
        }
    }
}

impl ReceiveConfig {
    pub fn idle_pause(&self) -> Duration {
        Duration::from_millis(self.idle_pause_ms)
    }

    pub fn read_error_backoff(&self) -> Duration {
        Duration::from_millis(self.read_error_backoff_ms)
    }
}

/// Open-retry section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before retrying a failed open, in milliseconds
    pub delay_ms: u64,
    /// Attempts before giving up (0 = retry forever)
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_ms: 3000,
            max_attempts: 0,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive, e.g. "info" or "serial_port_hub=debug"
    pub level: String,
    /// Log format: "pretty", "compact", "full"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line format with colors
    #[default]
    Pretty,
    /// Single-line compact format
    Compact,
    /// Single-line format with all fields
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.serial.default_baud, 9600);
        assert_eq!(config.serial.buffer_size, 512);
        assert_eq!(config.retry.delay(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_alias_resolution() {
        let mut config = SerialConfig::default();
        config
            .port_aliases
            .insert("arduino".to_string(), "COM3".to_string());

        assert_eq!(config.resolve_port("arduino"), "COM3");
        assert_eq!(config.resolve_port("COM5"), "COM5");
    }

    #[test]
    fn test_parse_port_uses_default_baud() {
        let mut config = SerialConfig {
            default_baud: 115200,
            ..Default::default()
        };
        config
            .port_aliases
            .insert("gps".to_string(), "/dev/ttyUSB0".to_string());

        let bare = config.descriptor(&config.parse_port("gps").unwrap());
        assert_eq!(bare.name(), "/dev/ttyUSB0");
        assert_eq!(bare.baud_rate(), 115200);

        let explicit = config.descriptor(&config.parse_port("COM4:19200:0x1").unwrap());
        assert_eq!(explicit.name(), "COM4");
        assert_eq!(explicit.baud_rate(), 19200);
        assert_eq!(explicit.driver_flags(), 1);

        assert!(config.parse_port("COM4:0").is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[serial]"));
        assert!(toml_str.contains("[retry]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [serial]
            buffer_size = 64

            [[serial.ports]]
            name = "COM3"
            baud_rate = 57600

            [[serial.ports]]
            name = "/dev/ttyACM0"

            [logging]
            format = "compact"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.serial.buffer_size, 64);
        assert_eq!(config.serial.ports.len(), 2);
        assert_eq!(config.serial.ports[1], PortEntry::new("/dev/ttyACM0"));
        let ports = config.serial.descriptors();
        assert_eq!(ports[0].baud_rate(), 57600);
        assert_eq!(ports[1].baud_rate(), 9600);
        assert_eq!(config.logging.format, LogFormat::Compact);
        // Defaults should still work
        assert_eq!(config.retry.delay_ms, 3000);
    }

    #[test]
    fn test_file_ports_use_default_baud_and_aliases() {
        let toml_str = r#"
            [serial]
            default_baud = 115200

            [serial.port_aliases]
            gps = "/dev/ttyUSB1"

            [[serial.ports]]
            name = "/dev/ttyUSB0"

            [[serial.ports]]
            name = "gps"
            flags = 1

            [[serial.ports]]
            name = "COM3"
            baud_rate = 4800
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        let ports = config.serial.descriptors();
        assert_eq!(ports[0], PortDescriptor::with_baud("/dev/ttyUSB0", 115200));
        assert_eq!(
            ports[1],
            PortDescriptor::with_baud("/dev/ttyUSB1", 115200).flags(1)
        );
        assert_eq!(ports[2], PortDescriptor::with_baud("COM3", 4800));
    }

    #[test]
    fn test_validation_rejects_zeroes() {
        let mut config = Config::default();
        config.serial.buffer_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { key, .. }) if key == "serial.buffer_size"
        ));

        let mut config = Config::default();
        config.retry.delay_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.serial.ports.push(PortEntry {
            baud_rate: Some(0),
            ..PortEntry::new("COM1")
        });
        assert!(config.validate().is_err());
    }
}
