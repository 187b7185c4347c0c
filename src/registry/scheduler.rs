//! Delayed-retry scheduler for failed opens.
//!
//! A small dedicated tokio runtime owns the timers. Jobs are blocking (they
//! open devices), so each one runs on the runtime's blocking pool once its
//! delay elapses.

use std::io;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

pub(crate) struct RetryScheduler {
    runtime: Option<Runtime>,
}

impl RetryScheduler {
    pub(crate) fn start() -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("serial-retry")
            .enable_time()
            .build()?;
        debug!("Retry scheduler started");
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    /// Run `job` on a blocking thread after `delay`.
    pub(crate) fn schedule<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(runtime) = &self.runtime {
            runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tokio::task::spawn_blocking(job).await;
            });
        }
    }

    /// Drop pending jobs without waiting for running ones. Safe to call from
    /// inside another runtime.
    pub(crate) fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            debug!("Retry scheduler stopped");
        }
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
