//! A single open serial line.
//!
//! `PortConnection` owns the native source and sink for one line, runs its
//! receive loop and holds its listeners. Every method takes `&self`, so one
//! connection can be shared behind an `Arc` by the registry and any number
//! of `SharedPort` handles.
//!
//! Shutdown order is `stop_receive` then `close`. `close` also stops a
//! running loop itself, so a caller that skips the first step only pays the
//! wait for the worker to notice.

use super::descriptor::PortDescriptor;
use super::error::{CloseError, OpenError, ReceiveError, WriteError};
use super::event::{HexDump, ListenerId, ListenerSet, ReadListener};
use super::receiver::ReceiveWorker;
use super::traits::{LineDriver, LineSink, LineSource};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Default scratch buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 512;

/// Tuning for a connection and its receive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Size of the scratch buffer reused by every read.
    pub buffer_size: usize,
    /// Pause after a read that produced nothing (zero bytes or a timeout).
    pub idle_pause: Duration,
    /// Pause after a failed read before trying again.
    pub read_error_backoff: Duration,
    /// Consecutive read failures that mark the connection faulted. 0 disables.
    pub max_consecutive_read_errors: u32,
    /// How long `stop_receive`/`close` wait for the worker to exit.
    pub stop_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_pause: Duration::from_millis(2),
            read_error_backoff: Duration::from_millis(50),
            max_consecutive_read_errors: 32,
            stop_timeout: Duration::from_secs(1),
        }
    }
}

impl ConnectionOptions {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionState {
    Closed = 0,
    Open = 1,
    /// The receive loop gave up after repeated read failures; reopen to recover.
    Faulted = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::Faulted,
            _ => Self::Closed,
        }
    }
}

/// Snapshot of a connection's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub events_dispatched: u64,
    pub read_errors: u64,
    pub receive_loops_started: u64,
    pub opens: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    events_dispatched: AtomicU64,
    read_errors: AtomicU64,
    receive_loops_started: AtomicU64,
    opens: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_read(&self, n: usize) {
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            receive_loops_started: self.receive_loops_started.load(Ordering::Relaxed),
            opens: self.opens.load(Ordering::Relaxed),
        }
    }
}

/// State shared between a connection and its receive worker.
pub(crate) struct LineShared {
    pub(crate) descriptor: PortDescriptor,
    pub(crate) options: ConnectionOptions,
    state: AtomicU8,
    pub(crate) source: Mutex<Option<Box<dyn LineSource>>>,
    sink: Mutex<Option<Box<dyn LineSink>>>,
    /// Locked by the worker for its whole life; only one reader at a time.
    pub(crate) scratch: Mutex<Vec<u8>>,
    pub(crate) listeners: RwLock<ListenerSet>,
    pub(crate) stats: StatsCounters,
}

impl LineShared {
    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn swap_state(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.state.swap(state as u8, Ordering::AcqRel))
    }

    /// Open -> Faulted. Leaves a concurrent close's `Closed` untouched.
    pub(crate) fn mark_faulted(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Open as u8,
            ConnectionState::Faulted as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// One serial line, its receive loop and its listeners.
pub struct PortConnection {
    shared: Arc<LineShared>,
    driver: Arc<dyn LineDriver>,
    /// Also serializes open/close/start/stop against each other.
    worker: Mutex<Option<ReceiveWorker>>,
}

impl PortConnection {
    /// Create a closed connection. Nothing is acquired until `open`.
    pub fn new(
        descriptor: PortDescriptor,
        driver: Arc<dyn LineDriver>,
        options: ConnectionOptions,
    ) -> Self {
        let scratch = vec![0u8; options.buffer_size.max(1)];
        Self {
            shared: Arc::new(LineShared {
                descriptor,
                options,
                state: AtomicU8::new(ConnectionState::Closed as u8),
                source: Mutex::new(None),
                sink: Mutex::new(None),
                scratch: Mutex::new(scratch),
                listeners: RwLock::new(ListenerSet::default()),
                stats: StatsCounters::default(),
            }),
            driver,
            worker: Mutex::new(None),
        }
    }

    /// Create a connection and open it in one step.
    pub fn open_with(
        descriptor: PortDescriptor,
        driver: Arc<dyn LineDriver>,
        options: ConnectionOptions,
    ) -> Result<Self, OpenError> {
        let connection = Self::new(descriptor, driver, options);
        connection.open()?;
        Ok(connection)
    }

    /// Acquire the native line.
    ///
    /// Opening an open connection does nothing. A faulted connection drops
    /// its stale handles and acquires fresh ones.
    pub fn open(&self) -> Result<&Self, OpenError> {
        let mut worker = self.worker.lock();
        let descriptor = &self.shared.descriptor;

        match self.shared.state() {
            ConnectionState::Open => {
                debug!("{} already open", descriptor);
                return Ok(self);
            }
            ConnectionState::Faulted => {
                info!("Reopening faulted port {}", descriptor);
                self.stop_worker(&mut worker);
                self.release_handles();
            }
            ConnectionState::Closed => {}
        }

        descriptor.validate()?;
        info!("Opening {}", descriptor);
        let line = self.driver.acquire(descriptor).map_err(|e| {
            warn!("Failed to open {}: {}", descriptor, e);
            e
        })?;

        *self.shared.sink.lock() = Some(line.sink);
        *self.shared.source.lock() = Some(line.source);
        self.shared.stats.opens.fetch_add(1, Ordering::Relaxed);
        self.shared.swap_state(ConnectionState::Open);
        Ok(self)
    }

    /// Launch the receive loop. Does nothing if one is already running.
    pub fn start_receive(&self) -> Result<&Self, ReceiveError> {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(ReceiveWorker::is_alive) {
            debug!(port = self.name(), "Receive loop already running");
            return Ok(self);
        }
        if self.shared.state() != ConnectionState::Open {
            return Err(ReceiveError::NotConnected(self.name().to_string()));
        }

        // Reclaim a worker that exited on its own (e.g. after a fault).
        self.stop_worker(&mut worker);

        let spawned = ReceiveWorker::spawn(Arc::clone(&self.shared)).map_err(ReceiveError::Spawn)?;
        *worker = Some(spawned);
        self.shared
            .stats
            .receive_loops_started
            .fetch_add(1, Ordering::Relaxed);
        Ok(self)
    }

    /// Cancel the receive loop and wait for it to exit. A no-op when no loop
    /// is running.
    pub fn stop_receive(&self) -> &Self {
        let mut worker = self.worker.lock();
        self.stop_worker(&mut worker);
        self
    }

    /// Release the native line.
    ///
    /// The sink is closed before the source; each is skipped if absent and a
    /// failure in one does not prevent the other. Failures are logged, never
    /// returned, and the connection always ends up `Closed`. Safe to call
    /// repeatedly.
    pub fn close(&self) -> &Self {
        let mut worker = self.worker.lock();
        let previous = self.shared.swap_state(ConnectionState::Closed);
        self.stop_worker(&mut worker);

        if self.release_handles() {
            info!("Closed {}", self.shared.descriptor);
        } else if previous == ConnectionState::Closed {
            debug!("{} already closed", self.shared.descriptor);
        }
        self
    }

    /// Write a single byte.
    pub fn write_byte(&self, byte: u8) -> Result<(), WriteError> {
        self.write(&[byte])
    }

    /// Write `data` in full. No flush is implied.
    pub fn write(&self, data: &[u8]) -> Result<(), WriteError> {
        let mut guard = self.shared.sink.lock();
        let sink = guard
            .as_mut()
            .ok_or_else(|| WriteError::NotOpen(self.name().to_string()))?;
        if data.is_empty() {
            return Ok(());
        }

        trace!(port = self.name(), "write -> {}", HexDump(data));
        sink.write_all(data).map_err(|source| WriteError::Io {
            port: self.name().to_string(),
            source,
        })?;
        self.shared
            .stats
            .bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Write `len` bytes of `data` starting at `offset`.
    pub fn write_range(&self, data: &[u8], offset: usize, len: usize) -> Result<(), WriteError> {
        let range = offset
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .map(|end| &data[offset..end])
            .ok_or(WriteError::OutOfBounds {
                offset,
                len,
                available: data.len(),
            })?;
        self.write(range)
    }

    /// Push buffered output to the device.
    pub fn flush(&self) -> Result<(), WriteError> {
        let mut guard = self.shared.sink.lock();
        let sink = guard
            .as_mut()
            .ok_or_else(|| WriteError::NotOpen(self.name().to_string()))?;
        sink.flush().map_err(|source| WriteError::Io {
            port: self.name().to_string(),
            source,
        })
    }

    /// Register a listener for every subsequent read. Returns `self` for
    /// chaining.
    pub fn add_listener(&self, listener: impl ReadListener + 'static) -> &Self {
        self.subscribe(listener);
        self
    }

    /// Register a listener and return an id that can remove it later.
    pub fn subscribe(&self, listener: impl ReadListener + 'static) -> ListenerId {
        self.subscribe_arc(Arc::new(listener))
    }

    pub(crate) fn subscribe_arc(&self, listener: Arc<dyn ReadListener>) -> ListenerId {
        self.shared.listeners.write().push(listener)
    }

    /// Remove a listener. Returns `false` if the id is unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.write().remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.read().len()
    }

    pub fn descriptor(&self) -> &PortDescriptor {
        &self.shared.descriptor
    }

    pub fn name(&self) -> &str {
        self.shared.descriptor.name()
    }

    pub fn baud_rate(&self) -> u32 {
        self.shared.descriptor.baud_rate()
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.options.buffer_size
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn is_faulted(&self) -> bool {
        self.state() == ConnectionState::Faulted
    }

    pub fn is_receiving(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(ReceiveWorker::is_alive)
    }

    pub fn stats(&self) -> ConnectionStats {
        self.shared.stats.snapshot()
    }

    fn stop_worker(&self, worker: &mut Option<ReceiveWorker>) {
        let Some(running) = worker.take() else {
            return;
        };
        let was_alive = running.is_alive();
        if !running.stop(self.shared.options.stop_timeout) {
            warn!(
                port = self.name(),
                timeout = ?self.shared.options.stop_timeout,
                "Receive worker did not exit in time, detaching it"
            );
        } else if was_alive {
            debug!(port = self.name(), "Receive worker stopped");
        }
    }

    /// Close sink then source and release the line. Returns whether anything
    /// was held.
    fn release_handles(&self) -> bool {
        let name = self.name();
        let sink = self.shared.sink.lock().take();
        let had_sink = sink.is_some();
        if let Some(mut sink) = sink {
            if let Err(source) = sink.close() {
                let err = CloseError::Sink {
                    port: name.to_string(),
                    source,
                };
                error!("{}", err);
            }
        }

        // A detached worker may still be inside a read holding the source.
        // It is left for that worker; the next open replaces it.
        let source = match self.shared.source.try_lock_for(self.shared.options.stop_timeout) {
            Some(mut guard) => guard.take(),
            None => {
                warn!(port = name, "Input still held by a detached receive worker");
                None
            }
        };
        let had_source = source.is_some();
        if let Some(mut source) = source {
            if let Err(e) = source.close() {
                let err = CloseError::Source {
                    port: name.to_string(),
                    source: e,
                };
                error!("{}", err);
            }
        }

        if had_sink || had_source {
            self.driver.release(&self.shared.descriptor);
        }
        had_sink || had_source
    }
}

impl Drop for PortConnection {
    fn drop(&mut self) {
        if self.shared.state() != ConnectionState::Closed || self.worker.get_mut().is_some() {
            self.close();
        }
    }
}

impl std::fmt::Debug for PortConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortConnection")
            .field("descriptor", &self.shared.descriptor)
            .field("state", &self.state())
            .field("buffer_size", &self.buffer_size())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
