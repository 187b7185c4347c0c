//! Shared test utilities for Serial Port Hub tests.
//!
//! This module provides common test infrastructure including:
//! - Mock drivers with fast idle reads
//! - A listener that records every event it sees
//! - Polling helpers for conditions reached on background threads

#![allow(dead_code)]

use parking_lot::Mutex;
use serial_port_hub::port::{
    ConnectionOptions, MockLineDriver, PortConnection, PortDescriptor, ReadEvent, ReadListener,
};
use serial_port_hub::registry::{PortRegistry, RegistrySettings, RetryPolicy};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound for anything a background thread should do "soon".
pub const EVENTUALLY: Duration = Duration::from_secs(3);

/// Create a mock driver whose idle reads return after 1ms.
pub fn fast_driver() -> MockLineDriver {
    MockLineDriver::new().with_idle_delay(Duration::from_millis(1))
}

/// Create a closed connection to `name` on `driver`.
pub fn connection(driver: &MockLineDriver, descriptor: PortDescriptor) -> PortConnection {
    PortConnection::new(
        descriptor,
        Arc::new(driver.clone()),
        ConnectionOptions {
            idle_pause: Duration::from_millis(1),
            read_error_backoff: Duration::from_millis(1),
            ..Default::default()
        },
    )
}

/// Create a registry with a short retry delay, already started.
pub fn started_registry(driver: &MockLineDriver, retry_delay: Duration) -> PortRegistry {
    let registry = PortRegistry::new(
        Arc::new(driver.clone()),
        RegistrySettings {
            connection: ConnectionOptions {
                idle_pause: Duration::from_millis(1),
                ..Default::default()
            },
            retry: RetryPolicy {
                delay: retry_delay,
                max_attempts: 0,
            },
        },
    );
    registry.on_start().expect("scheduler should start");
    registry
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Listener that keeps a copy of every event, tagged with its own label.
#[derive(Clone, Default)]
pub struct Recorder {
    label: &'static str,
    events: Arc<Mutex<Vec<(&'static str, Vec<u8>)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Another recorder writing into the same log under `label`.
    pub fn tagged(&self, label: &'static str) -> Self {
        Self {
            label,
            events: Arc::clone(&self.events),
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Data of every recorded event, in arrival order.
    pub fn data(&self) -> Vec<Vec<u8>> {
        self.events.lock().iter().map(|(_, d)| d.clone()).collect()
    }

    /// Labels of every recorded event, in arrival order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|(l, _)| *l).collect()
    }

    /// All recorded bytes joined together.
    pub fn bytes(&self) -> Vec<u8> {
        self.data().concat()
    }
}

impl ReadListener for Recorder {
    fn on_read_complete(&self, event: &ReadEvent) {
        self.events.lock().push((self.label, event.data().to_vec()));
    }
}
