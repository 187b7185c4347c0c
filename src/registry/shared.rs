//! Reference-counted handle to a registry-owned connection.

use super::PortRegistry;
use crate::port::{
    ConnectionState, ConnectionStats, ListenerId, OpenError, PortConnection, PortDescriptor,
    ReadListener, ReceiveError, WriteError,
};
use std::sync::Arc;

/// A consumer's view of a registered port.
///
/// Every operation goes straight to the underlying `PortConnection` except
/// `close`, which releases only this holder. The registry closes the line
/// when the last handle obtained through `PortRegistry::get` is closed.
/// Dropping a handle gives up its hold but never closes the line, so a
/// throwaway lookup such as `registry.get(name).map(|p| p.is_connected())`
/// leaves the port registered.
pub struct SharedPort {
    registry: PortRegistry,
    connection: Arc<PortConnection>,
    generation: u64,
    released: bool,
}

impl SharedPort {
    pub(super) fn new(
        registry: PortRegistry,
        connection: Arc<PortConnection>,
        generation: u64,
    ) -> Self {
        Self {
            registry,
            connection,
            generation,
            released: false,
        }
    }

    /// Release this holder. The connection stays open for other holders.
    pub fn close(mut self) {
        self.release(true);
    }

    fn release(&mut self, close_if_last: bool) {
        if !self.released {
            self.released = true;
            self.registry
                .release(self.connection.name(), self.generation, close_if_last);
        }
    }

    /// Reacquire the line, e.g. after the receive loop faulted.
    pub fn open(&self) -> Result<&Self, OpenError> {
        self.connection.open()?;
        Ok(self)
    }

    pub fn start_receive(&self) -> Result<&Self, ReceiveError> {
        self.connection.start_receive()?;
        Ok(self)
    }

    pub fn stop_receive(&self) -> &Self {
        self.connection.stop_receive();
        self
    }

    pub fn write_byte(&self, byte: u8) -> Result<(), WriteError> {
        self.connection.write_byte(byte)
    }

    pub fn write(&self, data: &[u8]) -> Result<(), WriteError> {
        self.connection.write(data)
    }

    pub fn write_range(&self, data: &[u8], offset: usize, len: usize) -> Result<(), WriteError> {
        self.connection.write_range(data, offset, len)
    }

    pub fn flush(&self) -> Result<(), WriteError> {
        self.connection.flush()
    }

    pub fn add_listener(&self, listener: impl ReadListener + 'static) -> &Self {
        self.connection.add_listener(listener);
        self
    }

    pub fn subscribe(&self, listener: impl ReadListener + 'static) -> ListenerId {
        self.connection.subscribe(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.connection.remove_listener(id)
    }

    pub fn descriptor(&self) -> &PortDescriptor {
        self.connection.descriptor()
    }

    pub fn name(&self) -> &str {
        self.connection.name()
    }

    pub fn baud_rate(&self) -> u32 {
        self.connection.baud_rate()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn is_receiving(&self) -> bool {
        self.connection.is_receiving()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.connection.stats()
    }
}

impl Drop for SharedPort {
    fn drop(&mut self) {
        self.release(false);
    }
}

impl std::fmt::Debug for SharedPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPort")
            .field("port", &self.connection.name())
            .field("generation", &self.generation)
            .field("released", &self.released)
            .finish()
    }
}
