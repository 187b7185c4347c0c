//! Immutable description of a serial line: device path, baud rate and
//! driver flags.

use super::error::OpenError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default baud rate for new descriptors (9600 bps).
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default driver flags (none).
pub const DEFAULT_FLAGS: u32 = 0;

fn default_baud() -> u32 {
    DEFAULT_BAUD_RATE
}

/// Identifies one serial line and how to open it.
///
/// The name doubles as the registry key, so two descriptors with the same
/// name refer to the same physical line even if their baud rates differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortDescriptor {
    name: String,
    #[serde(default = "default_baud")]
    baud_rate: u32,
    #[serde(default)]
    flags: u32,
}

impl PortDescriptor {
    /// Describe a line at the default baud rate with no flags.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_baud(name, DEFAULT_BAUD_RATE)
    }

    /// Describe a line at the given baud rate with no flags.
    pub fn with_baud(name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            name: name.into(),
            baud_rate,
            flags: DEFAULT_FLAGS,
        }
    }

    /// Return a copy of this descriptor with the given driver flags.
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn driver_flags(&self) -> u32 {
        self.flags
    }

    /// Reject descriptors no driver could honor.
    pub fn validate(&self) -> Result<(), OpenError> {
        if self.name.trim().is_empty() {
            return Err(OpenError::invalid_config("port name must not be empty"));
        }
        if self.baud_rate == 0 {
            return Err(OpenError::invalid_config(format!(
                "baud rate for {} must be greater than zero",
                self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.baud_rate)?;
        if self.flags != 0 {
            write!(f, " (flags=0x{:x})", self.flags)?;
        }
        Ok(())
    }
}

/// Parses `name[:baud[:flags]]`. Flags accept decimal or `0x` hex.
///
/// The split happens from the right so Windows names like `COM3` and unix
/// paths both work; a trailing segment is only taken as a number if it
/// parses as one.
impl FromStr for PortDescriptor {
    type Err = OpenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts: Vec<&str> = s.split(':').collect();
        let mut numbers = Vec::new();
        while parts.len() > 1 && numbers.len() < 2 {
            let last = parts[parts.len() - 1];
            match parse_number(last) {
                Some(n) => {
                    numbers.push(n);
                    parts.pop();
                }
                None => break,
            }
        }
        numbers.reverse();

        let name = parts.join(":");
        let descriptor = match numbers.as_slice() {
            [] => PortDescriptor::new(name),
            [baud] => PortDescriptor::with_baud(name, *baud),
            [baud, flags] => PortDescriptor::with_baud(name, *baud).flags(*flags),
            _ => unreachable!("at most two numeric segments are consumed"),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

fn parse_number(s: &str) -> Option<u32> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}
