//! Native line driver backed by the `serialport` crate.
//!
//! The device is opened once and cloned so the receive loop and writers each
//! own an independent handle; dropping both releases the file descriptor.

use super::descriptor::PortDescriptor;
use super::error::OpenError;
use super::traits::{LineDriver, LineSink, LineSource, NativeLine, DEFAULT_READ_TIMEOUT};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

/// Driver flag: open the tty without claiming it exclusively (unix only).
pub const FLAG_NON_EXCLUSIVE: u32 = 0x0001;

/// `LineDriver` for real serial hardware.
#[derive(Debug, Clone)]
pub struct SerialPortDriver {
    read_timeout: Duration,
}

impl SerialPortDriver {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    #[cfg(unix)]
    fn open_port(
        &self,
        descriptor: &PortDescriptor,
    ) -> Result<Box<dyn serialport::SerialPort>, serialport::Error> {
        let mut port = serialport::new(descriptor.name(), descriptor.baud_rate())
            .timeout(self.read_timeout)
            .open_native()?;
        if descriptor.driver_flags() & FLAG_NON_EXCLUSIVE != 0 {
            port.set_exclusive(false)?;
        }
        Ok(Box::new(port))
    }

    #[cfg(not(unix))]
    fn open_port(
        &self,
        descriptor: &PortDescriptor,
    ) -> Result<Box<dyn serialport::SerialPort>, serialport::Error> {
        serialport::new(descriptor.name(), descriptor.baud_rate())
            .timeout(self.read_timeout)
            .open()
    }
}

impl Default for SerialPortDriver {
    fn default() -> Self {
        Self::new(DEFAULT_READ_TIMEOUT)
    }
}

impl LineDriver for SerialPortDriver {
    fn acquire(&self, descriptor: &PortDescriptor) -> Result<NativeLine, OpenError> {
        let name = descriptor.name();
        let port = self
            .open_port(descriptor)
            .map_err(|e| map_open_error(name, e))?;
        let reader = port.try_clone().map_err(|e| map_open_error(name, e))?;

        debug!(
            "Acquired {} (flags=0x{:x}, timeout={:?})",
            descriptor,
            descriptor.driver_flags(),
            self.read_timeout
        );

        Ok(NativeLine::new(
            SerialSource { port: reader },
            SerialSink { port },
        ))
    }
}

fn map_open_error(port_name: &str, e: serialport::Error) -> OpenError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => OpenError::not_found(port_name),
        serialport::ErrorKind::InvalidInput => OpenError::invalid_config(e.to_string()),
        serialport::ErrorKind::Io(kind) => {
            OpenError::from_io(port_name, io::Error::new(kind, e.description))
        }
        serialport::ErrorKind::Unknown => OpenError::Driver {
            port: port_name.to_string(),
            source: io::Error::other(e.description),
        },
    }
}

struct SerialSource {
    port: Box<dyn serialport::SerialPort>,
}

impl LineSource for SerialSource {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.port.read(buffer)
    }
}

struct SerialSink {
    port: Box<dyn serialport::SerialPort>,
}

impl LineSink for SerialSink {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.port, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(&mut self.port)
    }
}

/// A serial port visible to the operating system.
#[derive(Debug, Clone, Serialize)]
pub struct AvailablePort {
    pub name: String,
    pub kind: String,
}

/// Enumerate the system's serial ports.
pub fn available_ports() -> Result<Vec<AvailablePort>, OpenError> {
    let ports = serialport::available_ports().map_err(|e| OpenError::Driver {
        port: "*".to_string(),
        source: io::Error::other(e.description),
    })?;

    Ok(ports
        .into_iter()
        .map(|info| {
            let kind = match info.port_type {
                serialport::SerialPortType::UsbPort(usb) => format!(
                    "usb {:04x}:{:04x}{}",
                    usb.vid,
                    usb.pid,
                    usb.product.map(|p| format!(" {}", p)).unwrap_or_default()
                ),
                serialport::SerialPortType::PciPort => "pci".to_string(),
                serialport::SerialPortType::BluetoothPort => "bluetooth".to_string(),
                serialport::SerialPortType::Unknown => "unknown".to_string(),
            };
            AvailablePort {
                name: info.port_name,
                kind,
            }
        })
        .collect())
}
