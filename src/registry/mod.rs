//! Registry of named serial lines.
//!
//! The registry is the one place that opens and closes lines on behalf of
//! the hosting process. It guarantees at most one open connection per port
//! name, retries failed opens on a timer, and hands consumers `SharedPort`
//! handles whose `close` only tears the line down once the last holder lets
//! go.
//!
//! # Architecture
//!
//! ```text
//! host ──on_start/on_stop──> PortRegistry ──> RetryScheduler (tokio)
//!                                │
//! consumers ──get──> SharedPort ─┴──> PortConnection ──> LineDriver
//! ```
//!
//! The driver is never called with the table lock held: a name is reserved
//! with an `Opening` slot while the device is acquired.

mod scheduler;
mod shared;

pub use shared::SharedPort;

use crate::config::Config;
use crate::error::{PortError, RegistryError};
use crate::port::{ConnectionOptions, LineDriver, OpenError, PortConnection, PortDescriptor};
use parking_lot::Mutex;
use scheduler::RetryScheduler;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default delay before retrying a failed open.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// When and how often failed opens are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// Total attempts before giving up. 0 retries forever.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RETRY_DELAY,
            max_attempts: 0,
        }
    }
}

/// Settings applied to every connection the registry opens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySettings {
    pub connection: ConnectionOptions,
    pub retry: RetryPolicy,
}

impl From<&Config> for RegistrySettings {
    fn from(config: &Config) -> Self {
        Self {
            connection: ConnectionOptions {
                buffer_size: config.serial.buffer_size,
                idle_pause: config.receive.idle_pause(),
                read_error_backoff: config.receive.read_error_backoff(),
                max_consecutive_read_errors: config.receive.max_consecutive_read_errors,
                stop_timeout: config.serial.stop_timeout(),
            },
            retry: RetryPolicy {
                delay: config.retry.delay(),
                max_attempts: config.retry.max_attempts,
            },
        }
    }
}

/// Result of `PortRegistry::open`. Failures never surface synchronously;
/// they turn into a scheduled retry or, when retrying is impossible, into
/// `Failed`.
#[derive(Debug)]
pub enum OpenOutcome {
    /// A new connection was opened and is receiving.
    Opened,
    /// A healthy connection with this name already exists. Nothing was done.
    AlreadyOpen,
    /// Another caller is opening this name right now. Its open may still
    /// fail and end up retrying.
    InProgress,
    /// The open failed; another attempt runs after `delay`.
    RetryScheduled { attempt: u32, delay: Duration },
    /// The open failed and will not be retried.
    Failed(PortError),
    /// `close` was called for this name while the open was in flight.
    Cancelled,
}

impl OpenOutcome {
    /// Whether a connection is registered under the name afterwards.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Opened | Self::AlreadyOpen)
    }
}

enum Slot {
    Opening,
    Open(Entry),
}

struct Entry {
    connection: Arc<PortConnection>,
    generation: u64,
    holders: usize,
}

#[derive(Debug, Default)]
struct RetryState {
    attempts: u32,
    pending: bool,
}

struct RegistryInner {
    driver: Arc<dyn LineDriver>,
    settings: RegistrySettings,
    slots: Mutex<HashMap<String, Slot>>,
    retries: Mutex<HashMap<String, RetryState>>,
    scheduler: Mutex<Option<RetryScheduler>>,
    next_generation: AtomicU64,
}

/// Process-wide table of open serial lines. Cheap to clone; clones share the
/// same table.
#[derive(Clone)]
pub struct PortRegistry {
    inner: Arc<RegistryInner>,
}

impl PortRegistry {
    pub fn new(driver: Arc<dyn LineDriver>, settings: RegistrySettings) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                driver,
                settings,
                slots: Mutex::new(HashMap::new()),
                retries: Mutex::new(HashMap::new()),
                scheduler: Mutex::new(None),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.inner.settings
    }

    /// Host start hook: bring up the retry scheduler. Idempotent.
    pub fn on_start(&self) -> Result<(), RegistryError> {
        let mut scheduler = self.inner.scheduler.lock();
        if scheduler.is_none() {
            *scheduler = Some(RetryScheduler::start().map_err(RegistryError::Scheduler)?);
            info!("Port registry started");
        }
        Ok(())
    }

    /// Host stop hook: release the retry scheduler, dropping pending retries.
    /// Open connections are left alone; see `shutdown`.
    pub fn on_stop(&self) {
        let scheduler = self.inner.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown();
            self.inner.retries.lock().clear();
            info!("Port registry stopped");
        }
    }

    /// `on_stop` followed by `close_all`.
    pub fn shutdown(&self) {
        self.on_stop();
        self.close_all();
    }

    pub fn is_started(&self) -> bool {
        self.inner.scheduler.lock().is_some()
    }

    /// Open `descriptor` unless a healthy connection with its name exists.
    ///
    /// A new connection starts receiving immediately. On failure a retry is
    /// scheduled instead of returning an error.
    pub fn open(&self, descriptor: PortDescriptor) -> OpenOutcome {
        let name = descriptor.name().to_string();

        let stale = {
            let mut slots = self.inner.slots.lock();
            let healthy = match slots.get(&name) {
                Some(Slot::Opening) => {
                    debug!(port = %name, "Open already in progress");
                    return OpenOutcome::InProgress;
                }
                Some(Slot::Open(entry)) => !entry.connection.is_faulted(),
                None => false,
            };
            if healthy {
                drop(slots);
                info!(port = %name, "Port already opened");
                self.inner.retries.lock().remove(&name);
                return OpenOutcome::AlreadyOpen;
            }
            match slots.insert(name.clone(), Slot::Opening) {
                Some(Slot::Open(entry)) => Some(entry.connection),
                _ => None,
            }
        };

        if let Some(stale) = stale {
            warn!(port = %name, "Replacing faulted connection");
            stale.stop_receive().close();
        }

        match self.open_connection(descriptor.clone()) {
            Ok(connection) => self.register(&name, connection),
            Err(err) => {
                {
                    let mut slots = self.inner.slots.lock();
                    if matches!(slots.get(&name), Some(Slot::Opening)) {
                        slots.remove(&name);
                    }
                }
                self.schedule_retry(descriptor, err)
            }
        }
    }

    /// Open every descriptor in turn.
    pub fn open_all<I>(&self, descriptors: I) -> Vec<OpenOutcome>
    where
        I: IntoIterator<Item = PortDescriptor>,
    {
        descriptors.into_iter().map(|d| self.open(d)).collect()
    }

    /// Stop and close the connection for `name` for every holder, and cancel
    /// any pending retry. Returns `false` if nothing was registered.
    pub fn close(&self, name: &str) -> bool {
        self.inner.retries.lock().remove(name);
        let removed = self.inner.slots.lock().remove(name);
        match removed {
            Some(Slot::Open(entry)) => {
                entry.connection.stop_receive().close();
                info!(port = name, "Port unregistered");
                true
            }
            Some(Slot::Opening) => {
                debug!(port = name, "Cancelled in-flight open");
                true
            }
            None => {
                debug!(port = name, "Close requested for unknown port");
                false
            }
        }
    }

    /// Close every registered connection.
    pub fn close_all(&self) {
        let drained: Vec<(String, Slot)> = self.inner.slots.lock().drain().collect();
        self.inner.retries.lock().clear();
        for (name, slot) in drained {
            if let Slot::Open(entry) = slot {
                entry.connection.stop_receive().close();
                info!(port = %name, "Port unregistered");
            }
        }
    }

    /// Get a shared handle to a registered port, counting one more holder.
    pub fn get(&self, name: &str) -> Option<SharedPort> {
        let mut slots = self.inner.slots.lock();
        match slots.get_mut(name) {
            Some(Slot::Open(entry)) => {
                entry.holders += 1;
                Some(SharedPort::new(
                    self.clone(),
                    Arc::clone(&entry.connection),
                    entry.generation,
                ))
            }
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        matches!(self.inner.slots.lock().get(name), Some(Slot::Open(_)))
    }

    /// Names of registered ports, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Open(_)))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner
            .slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Open(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live `SharedPort` handles for `name`.
    pub fn holders(&self, name: &str) -> Option<usize> {
        match self.inner.slots.lock().get(name) {
            Some(Slot::Open(entry)) => Some(entry.holders),
            _ => None,
        }
    }

    /// Whether a retry is queued for `name`.
    pub fn retry_pending(&self, name: &str) -> bool {
        self.inner
            .retries
            .lock()
            .get(name)
            .is_some_and(|state| state.pending)
    }

    fn open_connection(&self, descriptor: PortDescriptor) -> Result<Arc<PortConnection>, PortError> {
        let connection = PortConnection::open_with(
            descriptor,
            Arc::clone(&self.inner.driver),
            self.inner.settings.connection.clone(),
        )?;
        if let Err(e) = connection.start_receive() {
            connection.close();
            return Err(e.into());
        }
        Ok(Arc::new(connection))
    }

    fn register(&self, name: &str, connection: Arc<PortConnection>) -> OpenOutcome {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancelled = {
            let mut slots = self.inner.slots.lock();
            if matches!(slots.get(name), Some(Slot::Opening)) {
                slots.insert(
                    name.to_string(),
                    Slot::Open(Entry {
                        connection,
                        generation,
                        holders: 0,
                    }),
                );
                None
            } else {
                Some(connection)
            }
        };

        if let Some(connection) = cancelled {
            connection.stop_receive().close();
            info!(port = name, "Open cancelled by close");
            return OpenOutcome::Cancelled;
        }

        self.inner.retries.lock().remove(name);
        info!(port = name, "Port registered");
        OpenOutcome::Opened
    }

    fn schedule_retry(&self, descriptor: PortDescriptor, err: PortError) -> OpenOutcome {
        let name = descriptor.name().to_string();
        let policy = &self.inner.settings.retry;

        if matches!(err, PortError::Open(OpenError::InvalidConfig(_))) {
            self.inner.retries.lock().remove(&name);
            error!(port = %name, "Not retrying invalid port settings: {}", err);
            return OpenOutcome::Failed(err);
        }

        let mut retries = self.inner.retries.lock();
        let state = retries.entry(name.clone()).or_default();
        state.attempts += 1;
        let attempt = state.attempts;
        let already_pending = state.pending;

        if policy.max_attempts > 0 && attempt >= policy.max_attempts {
            retries.remove(&name);
            error!(port = %name, attempt, "Giving up on port: {}", err);
            return OpenOutcome::Failed(err);
        }
        if already_pending {
            debug!(port = %name, attempt, "Open failed, retry already queued: {}", err);
            return OpenOutcome::RetryScheduled {
                attempt,
                delay: policy.delay,
            };
        }

        let scheduler = self.inner.scheduler.lock();
        let Some(scheduler) = scheduler.as_ref() else {
            retries.remove(&name);
            warn!(port = %name, "Open failed and retry scheduler is not running: {}", err);
            return OpenOutcome::Failed(err);
        };

        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        scheduler.schedule(policy.delay, move || {
            if let Some(inner) = weak.upgrade() {
                PortRegistry { inner }.run_retry(descriptor);
            }
        });
        if let Some(state) = retries.get_mut(&name) {
            state.pending = true;
        }

        warn!(
            port = %name,
            attempt,
            delay = ?policy.delay,
            "Open failed, retry scheduled: {}",
            err
        );
        OpenOutcome::RetryScheduled {
            attempt,
            delay: policy.delay,
        }
    }

    fn run_retry(&self, descriptor: PortDescriptor) {
        {
            let mut retries = self.inner.retries.lock();
            match retries.get_mut(descriptor.name()) {
                Some(state) if state.pending => state.pending = false,
                _ => {
                    debug!(port = descriptor.name(), "Retry cancelled");
                    return;
                }
            }
        }
        info!("Retrying open of {}", descriptor);
        let outcome = self.open(descriptor);
        debug!(?outcome, "Retry finished");
    }

    /// Drop one holder of `name`. The connection is closed when the count
    /// reaches zero and `close_if_last` is set.
    pub(crate) fn release(&self, name: &str, generation: u64, close_if_last: bool) {
        let closing = {
            let mut slots = self.inner.slots.lock();
            let remaining = match slots.get_mut(name) {
                Some(Slot::Open(entry)) if entry.generation == generation => {
                    entry.holders = entry.holders.saturating_sub(1);
                    Some(entry.holders)
                }
                _ => None,
            };
            match remaining {
                Some(0) if close_if_last => match slots.remove(name) {
                    Some(Slot::Open(entry)) => Some(entry.connection),
                    _ => None,
                },
                Some(left) => {
                    debug!(port = name, holders = left, "Shared port released");
                    None
                }
                None => {
                    debug!(port = name, "Ignoring release of stale handle");
                    None
                }
            }
        };

        if let Some(connection) = closing {
            connection.stop_receive().close();
            info!(port = name, "Last holder released port");
        }
    }
}

impl std::fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortRegistry")
            .field("ports", &self.names())
            .field("started", &self.is_started())
            .finish()
    }
}
