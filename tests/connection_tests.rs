//! Integration tests for `PortConnection`: receive loop, listener dispatch,
//! writes and close semantics against the mock driver.

mod common;

use common::{connection, fast_driver, wait_until, Recorder, EVENTUALLY};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serial_port_hub::port::{
    ConnectionOptions, ConnectionState, LineDriver, LineSink, LineSource, NativeLine, OpenError,
    PortConnection, PortDescriptor, ReadEvent, ReadStep, WriteError,
};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Receive loop
// ============================================================================

#[test]
fn test_listener_receives_fixed_stream() {
    let driver = fast_driver();
    driver.enqueue_read("COM_TEST", &[0x01, 0xFF, 0x00]);
    let port = connection(&driver, PortDescriptor::with_baud("COM_TEST", 9600));
    let recorder = Recorder::new();

    port.open().unwrap();
    port.add_listener(recorder.clone());
    port.start_receive().unwrap();

    assert!(wait_until(EVENTUALLY, || recorder.len() == 1));
    assert_eq!(recorder.data(), vec![vec![1u8, 255, 0]]);
    port.stop_receive().close();
}

#[test]
fn test_listeners_called_in_registration_order() {
    let driver = fast_driver();
    driver.enqueue_read("MOCK0", b"one");
    driver.enqueue_read("MOCK0", b"two");
    let port = connection(&driver, PortDescriptor::new("MOCK0"));
    let log = Recorder::new();

    port.add_listener(log.tagged("first"))
        .add_listener(log.tagged("second"));
    port.open().unwrap().start_receive().unwrap();

    assert!(wait_until(EVENTUALLY, || log.len() == 4));
    assert_eq!(log.labels(), vec!["first", "second", "first", "second"]);
    assert_eq!(
        log.data(),
        vec![
            b"one".to_vec(),
            b"one".to_vec(),
            b"two".to_vec(),
            b"two".to_vec()
        ]
    );
    port.close();
}

#[test]
fn test_zero_byte_read_produces_no_event() {
    let driver = fast_driver();
    driver.enqueue_step("MOCK0", ReadStep::Empty);
    driver.enqueue_step("MOCK0", ReadStep::Empty);
    driver.enqueue_read("MOCK0", b"after");
    let port = connection(&driver, PortDescriptor::new("MOCK0"));
    let recorder = Recorder::new();
    port.add_listener(recorder.clone());

    port.open().unwrap().start_receive().unwrap();

    assert!(wait_until(EVENTUALLY, || recorder.len() == 1));
    assert_eq!(recorder.data(), vec![b"after".to_vec()]);
    assert!(port.is_receiving());
    port.close();
}

#[test]
fn test_small_buffer_splits_reads() {
    let driver = fast_driver();
    driver.enqueue_read("MOCK0", b"abcdefgh");
    let port = PortConnection::new(
        PortDescriptor::new("MOCK0"),
        Arc::new(driver.clone()),
        ConnectionOptions::default().with_buffer_size(3),
    );
    let recorder = Recorder::new();
    port.add_listener(recorder.clone());

    port.open().unwrap().start_receive().unwrap();

    assert!(wait_until(EVENTUALLY, || recorder.bytes().len() == 8));
    assert_eq!(
        recorder.data(),
        vec![b"abc".to_vec(), b"def".to_vec(), b"gh".to_vec()]
    );
    port.close();
}

#[test]
fn test_start_receive_twice_runs_one_loop() {
    let driver = fast_driver();
    let port = connection(&driver, PortDescriptor::new("MOCK0"));

    port.open().unwrap();
    port.start_receive().unwrap().start_receive().unwrap();

    assert_eq!(port.stats().receive_loops_started, 1);
    port.close();
}

#[test]
fn test_stop_then_restart_receive() {
    let driver = fast_driver();
    let port = connection(&driver, PortDescriptor::new("MOCK0"));
    let recorder = Recorder::new();
    port.add_listener(recorder.clone());

    port.open().unwrap().start_receive().unwrap();
    port.stop_receive();
    assert!(!port.is_receiving());
    assert!(port.is_connected());

    driver.enqueue_read("MOCK0", b"later");
    port.start_receive().unwrap();
    assert!(wait_until(EVENTUALLY, || recorder.len() == 1));
    assert_eq!(port.stats().receive_loops_started, 2);
    port.close();
}

#[test]
fn test_panicking_listener_does_not_stop_delivery() {
    let driver = fast_driver();
    driver.enqueue_read("MOCK0", b"a");
    driver.enqueue_read("MOCK0", b"b");
    let port = connection(&driver, PortDescriptor::new("MOCK0"));
    let recorder = Recorder::new();

    port.add_listener(|_: &ReadEvent| panic!("listener bug"))
        .add_listener(recorder.clone());
    port.open().unwrap().start_receive().unwrap();

    assert!(wait_until(EVENTUALLY, || recorder.len() == 2));
    assert!(port.is_receiving());
    port.close();
}

#[test]
fn test_remove_listener() {
    let driver = fast_driver();
    let port = connection(&driver, PortDescriptor::new("MOCK0"));
    let kept = Recorder::new();
    let removed = Recorder::new();

    port.add_listener(kept.clone());
    let id = port.subscribe(removed.clone());
    assert_eq!(port.listener_count(), 2);
    assert!(port.remove_listener(id));
    assert!(!port.remove_listener(id));

    driver.enqueue_read("MOCK0", b"x");
    port.open().unwrap().start_receive().unwrap();

    assert!(wait_until(EVENTUALLY, || kept.len() == 1));
    assert_eq!(removed.len(), 0);
    port.close();
}

#[test]
fn test_listener_can_close_its_own_connection() {
    let driver = fast_driver();
    driver.enqueue_read("MOCK0", b"bye");
    let port = Arc::new(connection(&driver, PortDescriptor::new("MOCK0")));
    let calls = Arc::new(AtomicUsize::new(0));

    let inner = Arc::downgrade(&port);
    let counter = Arc::clone(&calls);
    port.add_listener(move |_: &ReadEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(port) = inner.upgrade() {
            port.close();
        }
    });
    port.open().unwrap().start_receive().unwrap();

    assert!(wait_until(EVENTUALLY, || port.state() == ConnectionState::Closed));
    assert!(wait_until(EVENTUALLY, || !port.is_receiving()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!driver.is_claimed("MOCK0"));
}

// ============================================================================
// Read failures
// ============================================================================

#[test]
fn test_repeated_read_errors_fault_the_connection() {
    let driver = fast_driver();
    for _ in 0..3 {
        driver.enqueue_step("MOCK0", ReadStep::Error(io::ErrorKind::BrokenPipe));
    }
    let port = PortConnection::new(
        PortDescriptor::new("MOCK0"),
        Arc::new(driver.clone()),
        ConnectionOptions {
            read_error_backoff: Duration::from_millis(1),
            max_consecutive_read_errors: 3,
            ..Default::default()
        },
    );

    port.open().unwrap().start_receive().unwrap();

    assert!(wait_until(EVENTUALLY, || port.is_faulted()));
    assert!(wait_until(EVENTUALLY, || !port.is_receiving()));
    assert_eq!(port.stats().read_errors, 3);

    // Reopen drops the stale handles and acquires fresh ones.
    let recorder = Recorder::new();
    port.add_listener(recorder.clone());
    driver.enqueue_read("MOCK0", b"back");
    port.open().unwrap().start_receive().unwrap();

    assert!(port.is_connected());
    assert_eq!(driver.acquire_count("MOCK0"), 2);
    assert!(wait_until(EVENTUALLY, || recorder.len() == 1));
    port.close();
}

#[test]
fn test_isolated_read_error_keeps_receiving() {
    let driver = fast_driver();
    driver.enqueue_step("MOCK0", ReadStep::Error(io::ErrorKind::Other));
    driver.enqueue_read("MOCK0", b"ok");
    let port = connection(&driver, PortDescriptor::new("MOCK0"));
    let recorder = Recorder::new();
    port.add_listener(recorder.clone());

    port.open().unwrap().start_receive().unwrap();

    assert!(wait_until(EVENTUALLY, || recorder.len() == 1));
    assert!(port.is_connected());
    assert_eq!(port.stats().read_errors, 1);
    port.close();
}

// ============================================================================
// Writes
// ============================================================================

#[test]
fn test_write_range_records_exact_bytes() {
    let driver = fast_driver();
    let port = connection(&driver, PortDescriptor::new("MOCK0"));
    port.open().unwrap();

    port.write_range(&[0xDE, 0xAD], 0, 2).unwrap();

    assert_eq!(driver.write_log("MOCK0"), vec![vec![0xDE, 0xAD]]);
    port.close();
}

#[test]
fn test_write_variants_keep_order() {
    let driver = fast_driver();
    let port = connection(&driver, PortDescriptor::new("MOCK0"));
    port.open().unwrap();

    port.write_byte(b'A').unwrap();
    port.write(b"BC").unwrap();
    port.write_range(b"xDEx", 1, 2).unwrap();
    port.flush().unwrap();

    assert_eq!(driver.written("MOCK0"), b"ABCDE".to_vec());
    assert_eq!(driver.flush_count("MOCK0"), 1);
    port.close();
}

#[test]
fn test_write_failure_surfaces_io_error() {
    let driver = fast_driver();
    let port = connection(&driver, PortDescriptor::new("MOCK0"));
    port.open().unwrap();
    driver.set_fail_writes("MOCK0", true);

    let err = port.write(b"x").unwrap_err();
    assert!(matches!(err, WriteError::Io { .. }));
    assert!(port.is_connected());
    port.close();
}

// ============================================================================
// Close
// ============================================================================

#[test]
fn test_close_twice_is_harmless() {
    let driver = fast_driver();
    let port = connection(&driver, PortDescriptor::new("MOCK0"));
    port.open().unwrap().start_receive().unwrap();

    port.close();
    port.close();

    assert_eq!(port.state(), ConnectionState::Closed);
    assert_eq!(driver.close_counts("MOCK0"), (1, 1));
    assert_eq!(driver.release_count("MOCK0"), 1);
}

#[test]
fn test_close_without_stop_ends_loop() {
    let driver = fast_driver();
    let port = connection(&driver, PortDescriptor::new("MOCK0"));
    port.open().unwrap().start_receive().unwrap();

    port.close();

    assert!(!port.is_receiving());
    assert!(matches!(port.write(b"x"), Err(WriteError::NotOpen(_))));
}

#[test]
fn test_exclusive_line_cannot_be_opened_twice() {
    let driver = fast_driver();
    let first = connection(&driver, PortDescriptor::new("MOCK0"));
    let second = connection(&driver, PortDescriptor::new("MOCK0"));

    first.open().unwrap();
    assert!(second.open().is_err());
    first.close();
    assert!(second.open().is_ok());
    second.close();
}

// ============================================================================
// Stuck reads
// ============================================================================

/// A line whose first read blocks for `stall`, far longer than any read
/// timeout, then behaves like an idle line fed from `pending`.
#[derive(Clone)]
struct StallingDriver {
    stall: Duration,
    reads: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    pending: Arc<parking_lot::Mutex<VecDeque<Vec<u8>>>>,
}

impl StallingDriver {
    fn new(stall: Duration) -> Self {
        Self {
            stall,
            reads: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
            pending: Arc::new(parking_lot::Mutex::new(VecDeque::new())),
        }
    }

    fn push(&self, data: &[u8]) {
        self.pending.lock().push_back(data.to_vec());
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn connection(&self) -> PortConnection {
        PortConnection::new(
            PortDescriptor::new("STUCK"),
            Arc::new(self.clone()),
            ConnectionOptions {
                idle_pause: Duration::from_millis(1),
                stop_timeout: Duration::from_millis(100),
                ..Default::default()
            },
        )
    }
}

struct StallingSource(StallingDriver);

impl LineSource for StallingSource {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        if self.0.reads.fetch_add(1, Ordering::SeqCst) == 0 {
            thread::sleep(self.0.stall);
            return Ok(0);
        }
        match self.0.pending.lock().pop_front() {
            Some(chunk) => {
                let len = chunk.len().min(buffer.len());
                buffer[..len].copy_from_slice(&chunk[..len]);
                Ok(len)
            }
            None => {
                thread::sleep(Duration::from_millis(1));
                Ok(0)
            }
        }
    }
}

struct NullSink;

impl LineSink for NullSink {
    fn write_all(&mut self, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LineDriver for StallingDriver {
    fn acquire(&self, _descriptor: &PortDescriptor) -> Result<NativeLine, OpenError> {
        Ok(NativeLine::new(StallingSource(self.clone()), NullSink))
    }

    fn release(&self, _descriptor: &PortDescriptor) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_stop_receive_detaches_stuck_worker() {
    let driver = StallingDriver::new(Duration::from_millis(800));
    let port = driver.connection();
    let recorder = Recorder::new();
    port.add_listener(recorder.clone());
    port.open().unwrap().start_receive().unwrap();
    assert!(wait_until(EVENTUALLY, || driver.reads() >= 1));

    let started = Instant::now();
    port.stop_receive();
    let waited = started.elapsed();

    assert!(waited >= Duration::from_millis(100), "returned after {waited:?}");
    assert!(waited < Duration::from_millis(500), "waited {waited:?}");
    assert!(!port.is_receiving());
    assert!(port.is_connected());

    // The new loop gets the buffer once the stuck read returns.
    port.start_receive().unwrap();
    driver.push(b"late");
    assert!(wait_until(EVENTUALLY, || recorder.len() == 1));
    assert_eq!(recorder.bytes(), b"late".to_vec());
    port.stop_receive().close();
}

#[test]
fn test_close_does_not_wait_out_stuck_read() {
    let driver = StallingDriver::new(Duration::from_millis(1500));
    let port = driver.connection();
    port.open().unwrap().start_receive().unwrap();
    assert!(wait_until(EVENTUALLY, || driver.reads() >= 1));

    let started = Instant::now();
    port.close();
    let waited = started.elapsed();

    assert!(waited < Duration::from_millis(1000), "waited {waited:?}");
    assert_eq!(port.state(), ConnectionState::Closed);
    assert!(!port.is_receiving());
    assert_eq!(driver.releases(), 1);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_write_range_delivers_exact_slice(
        data in proptest::collection::vec(any::<u8>(), 0..128),
        offset in 0usize..160,
        len in 0usize..160,
    ) {
        let driver = fast_driver();
        let port = connection(&driver, PortDescriptor::new("PROP0"));
        port.open().unwrap();

        let result = port.write_range(&data, offset, len);
        if offset + len <= data.len() {
            prop_assert!(result.is_ok());
            prop_assert_eq!(driver.written("PROP0"), data[offset..offset + len].to_vec());
        } else {
            let out_of_bounds = matches!(result, Err(WriteError::OutOfBounds { .. }));
            prop_assert!(out_of_bounds);
            prop_assert!(driver.written("PROP0").is_empty());
        }
        port.close();
    }
}
