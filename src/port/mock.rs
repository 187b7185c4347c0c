//! Mock line driver for testing.
//!
//! `MockLineDriver` simulates a set of serial lines without hardware. Each
//! named line keeps a script of read results and a log of everything written,
//! and both survive close/reopen so tests can script a device's whole life.
//!
//! # Example
//! ```
//! use serial_port_hub::port::{LineDriver, LineSink, LineSource, MockLineDriver, PortDescriptor};
//!
//! let driver = MockLineDriver::new();
//! driver.enqueue_read("MOCK0", b"Hello");
//!
//! let mut line = driver.acquire(&PortDescriptor::new("MOCK0")).unwrap();
//! let mut buffer = [0u8; 16];
//! let n = line.source.read(&mut buffer).unwrap();
//! assert_eq!(&buffer[..n], b"Hello");
//!
//! line.sink.write_all(b"ACK").unwrap();
//! assert_eq!(driver.written("MOCK0"), b"ACK");
//! ```

use super::descriptor::PortDescriptor;
use super::error::OpenError;
use super::traits::{LineDriver, LineSink, LineSource, NativeLine};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// How long an empty script makes `read` block before reporting a timeout,
/// mirroring a real driver's read timeout.
const DEFAULT_IDLE_DELAY: Duration = Duration::from_millis(5);

/// One scripted outcome for `LineSource::read`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStep {
    /// Return these bytes (split across reads if the buffer is smaller).
    Data(Vec<u8>),
    /// Return `Ok(0)`.
    Empty,
    /// Fail with an I/O error of this kind.
    Error(io::ErrorKind),
}

#[derive(Debug, Default)]
struct LineState {
    reads: VecDeque<ReadStep>,
    writes: Vec<Vec<u8>>,
    flushes: usize,
    fail_writes: bool,
    source_open: bool,
    sink_open: bool,
    source_closes: usize,
    sink_closes: usize,
    reads_attempted: usize,
}

#[derive(Debug, Default)]
struct DriverState {
    lines: HashMap<String, Arc<Mutex<LineState>>>,
    acquires: HashMap<String, usize>,
    releases: HashMap<String, usize>,
    pending_failures: HashMap<String, u32>,
    claimed: HashSet<String>,
}

impl DriverState {
    fn line(&mut self, port: &str) -> Arc<Mutex<LineState>> {
        Arc::clone(self.lines.entry(port.to_string()).or_default())
    }
}

/// Scriptable in-memory `LineDriver`.
///
/// Clones share state, so a test can hand one clone to a registry and keep
/// another to script reads and inspect writes.
#[derive(Debug, Clone)]
pub struct MockLineDriver {
    state: Arc<Mutex<DriverState>>,
    idle_delay: Duration,
}

impl MockLineDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DriverState::default())),
            idle_delay: DEFAULT_IDLE_DELAY,
        }
    }

    /// Set how long an empty read script blocks before timing out.
    pub fn with_idle_delay(mut self, idle_delay: Duration) -> Self {
        self.idle_delay = idle_delay;
        self
    }

    /// Queue one chunk of bytes, delivered by a single read if it fits.
    pub fn enqueue_read(&self, port: &str, data: &[u8]) {
        self.enqueue_step(port, ReadStep::Data(data.to_vec()));
    }

    /// Queue an arbitrary read outcome.
    pub fn enqueue_step(&self, port: &str, step: ReadStep) {
        let line = self.state.lock().line(port);
        line.lock().reads.push_back(step);
    }

    /// Make the next `count` acquisitions of `port` fail with `NotFound`.
    pub fn fail_next_opens(&self, port: &str, count: u32) {
        let mut state = self.state.lock();
        *state.pending_failures.entry(port.to_string()).or_default() += count;
    }

    /// Make writes and flushes on `port` fail until reset.
    pub fn set_fail_writes(&self, port: &str, fail: bool) {
        let line = self.state.lock().line(port);
        line.lock().fail_writes = fail;
    }

    /// Number of acquisition attempts for `port`, including failed ones.
    pub fn acquire_count(&self, port: &str) -> usize {
        self.state.lock().acquires.get(port).copied().unwrap_or(0)
    }

    /// Number of times `port` was released after a close.
    pub fn release_count(&self, port: &str) -> usize {
        self.state.lock().releases.get(port).copied().unwrap_or(0)
    }

    /// Whether `port` is currently held by an open connection.
    pub fn is_claimed(&self, port: &str) -> bool {
        self.state.lock().claimed.contains(port)
    }

    /// Every write call on `port`, in order.
    pub fn write_log(&self, port: &str) -> Vec<Vec<u8>> {
        let line = self.state.lock().line(port);
        let writes = line.lock().writes.clone();
        writes
    }

    /// All bytes written to `port`, concatenated.
    pub fn written(&self, port: &str) -> Vec<u8> {
        self.write_log(port).concat()
    }

    pub fn flush_count(&self, port: &str) -> usize {
        let line = self.state.lock().line(port);
        let flushes = line.lock().flushes;
        flushes
    }

    /// (sink closes, source closes) observed on `port`.
    pub fn close_counts(&self, port: &str) -> (usize, usize) {
        let line = self.state.lock().line(port);
        let guard = line.lock();
        (guard.sink_closes, guard.source_closes)
    }

    /// Number of `read` calls made against `port`.
    pub fn reads_attempted(&self, port: &str) -> usize {
        let line = self.state.lock().line(port);
        let reads = line.lock().reads_attempted;
        reads
    }

    /// Scripted read steps not yet consumed.
    pub fn pending_reads(&self, port: &str) -> usize {
        let line = self.state.lock().line(port);
        let pending = line.lock().reads.len();
        pending
    }
}

impl Default for MockLineDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDriver for MockLineDriver {
    fn acquire(&self, descriptor: &PortDescriptor) -> Result<NativeLine, OpenError> {
        let name = descriptor.name();
        let mut state = self.state.lock();
        *state.acquires.entry(name.to_string()).or_default() += 1;

        if let Some(remaining) = state.pending_failures.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(OpenError::not_found(name));
            }
        }
        if !state.claimed.insert(name.to_string()) {
            return Err(OpenError::Busy(name.to_string()));
        }

        let line = state.line(name);
        {
            let mut guard = line.lock();
            guard.source_open = true;
            guard.sink_open = true;
        }

        Ok(NativeLine::new(
            MockSource {
                line: Arc::clone(&line),
                idle_delay: self.idle_delay,
            },
            MockSink { line },
        ))
    }

    fn release(&self, descriptor: &PortDescriptor) {
        let mut state = self.state.lock();
        state.claimed.remove(descriptor.name());
        *state
            .releases
            .entry(descriptor.name().to_string())
            .or_default() += 1;
    }
}

struct MockSource {
    line: Arc<Mutex<LineState>>,
    idle_delay: Duration,
}

impl LineSource for MockSource {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let step = {
            let mut line = self.line.lock();
            line.reads_attempted += 1;
            if !line.source_open {
                return Err(io::Error::from(io::ErrorKind::NotConnected));
            }
            match line.reads.pop_front() {
                Some(ReadStep::Data(data)) => {
                    let n = data.len().min(buffer.len());
                    buffer[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        line.reads.push_front(ReadStep::Data(data[n..].to_vec()));
                    }
                    return Ok(n);
                }
                other => other,
            }
        };

        match step {
            Some(ReadStep::Empty) => Ok(0),
            Some(ReadStep::Error(kind)) => Err(io::Error::new(kind, "scripted read failure")),
            Some(ReadStep::Data(_)) => unreachable!("data steps return early"),
            None => {
                std::thread::sleep(self.idle_delay);
                Err(io::Error::from(io::ErrorKind::TimedOut))
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        let mut line = self.line.lock();
        line.source_open = false;
        line.source_closes += 1;
        Ok(())
    }
}

struct MockSink {
    line: Arc<Mutex<LineState>>,
}

impl LineSink for MockSink {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut line = self.line.lock();
        if !line.sink_open {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        if line.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        line.writes.push(data.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut line = self.line.lock();
        if line.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        line.flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let mut line = self.line.lock();
        line.sink_open = false;
        line.sink_closes += 1;
        Ok(())
    }
}
