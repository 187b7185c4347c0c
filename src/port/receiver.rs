//! Background receive loop.
//!
//! One worker thread per connection reads into the connection's scratch
//! buffer and dispatches each completed read to the listeners before the
//! next read begins. Cancellation is cooperative: the worker checks its flag
//! at the top of every iteration, and the driver's read timeout bounds how
//! long a blocking read can delay that check.

use super::connection::{ConnectionState, LineShared};
use super::error::ReadError;
use super::event::{HexDump, ReadEvent};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Handle to a running receive loop.
pub(crate) struct ReceiveWorker {
    cancel: Arc<AtomicBool>,
    exited: Receiver<()>,
    handle: JoinHandle<()>,
    thread_id: ThreadId,
}

/// Sends on drop so the exit is reported even if a listener panic escapes.
struct ExitSignal(Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

impl ReceiveWorker {
    pub(crate) fn spawn(shared: Arc<LineShared>) -> io::Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let (exit_tx, exited) = bounded(1);
        let thread_name = format!("serial-rx:{}", shared.descriptor.name());

        let worker_cancel = Arc::clone(&cancel);
        let handle = thread::Builder::new().name(thread_name).spawn(move || {
            let _signal = ExitSignal(exit_tx);
            run(&shared, &worker_cancel);
        })?;
        let thread_id = handle.thread().id();

        Ok(Self {
            cancel,
            exited,
            handle,
            thread_id,
        })
    }

    pub(crate) fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal cancellation and wait up to `timeout` for the worker to exit.
    ///
    /// Returns `false` if the worker was still running when the wait ended;
    /// it is then detached and exits on its own once its read returns.
    pub(crate) fn stop(self, timeout: Duration) -> bool {
        self.cancel.store(true, Ordering::Release);

        // Called from a listener: the worker is this thread, so it can only
        // exit after we return.
        if thread::current().id() == self.thread_id {
            return true;
        }

        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    warn!("Receive worker terminated by panic");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn run(shared: &LineShared, cancel: &AtomicBool) {
    let name = shared.descriptor.name();
    let options = &shared.options;
    let mut scratch = shared.scratch.lock();
    let mut consecutive_errors: u32 = 0;

    info!(port = name, buffer_size = scratch.len(), "Receive loop started");

    while !cancel.load(Ordering::Acquire) && shared.state() == ConnectionState::Open {
        let result = {
            let mut source = shared.source.lock();
            match source.as_mut() {
                Some(source) => source.read(scratch.as_mut_slice()),
                None => {
                    debug!(port = name, "Input released, leaving receive loop");
                    break;
                }
            }
        };

        match result {
            Ok(0) => {
                consecutive_errors = 0;
                thread::sleep(options.idle_pause);
            }
            Ok(n) => {
                consecutive_errors = 0;
                dispatch(shared, &scratch[..n]);
            }
            Err(e) if is_idle(&e) => {
                consecutive_errors = 0;
                thread::sleep(options.idle_pause);
            }
            Err(e) => {
                // A read racing with close is how the loop learns it is done.
                if cancel.load(Ordering::Acquire) || shared.state() != ConnectionState::Open {
                    debug!(port = name, error = %e, "Read failed after close, leaving receive loop");
                    break;
                }

                consecutive_errors += 1;
                shared.stats.record_read_error();
                let err = ReadError::Io {
                    port: name.to_string(),
                    source: e,
                };
                warn!(port = name, consecutive_errors, "{}", err);

                let limit = options.max_consecutive_read_errors;
                if limit > 0 && consecutive_errors >= limit {
                    error!(
                        port = name,
                        consecutive_errors, "Too many consecutive read failures, port needs reopen"
                    );
                    shared.mark_faulted();
                    break;
                }
                thread::sleep(options.read_error_backoff);
            }
        }
    }

    info!(port = name, "Receive loop stopped");
}

/// Copy the bytes out of the scratch buffer and hand them to every listener
/// in registration order.
fn dispatch(shared: &LineShared, bytes: &[u8]) {
    let name = shared.descriptor.name();
    trace!(port = name, "read -> {}", HexDump(bytes));
    shared.stats.record_read(bytes.len());

    let event = ReadEvent::new(name, bytes.to_vec());
    let listeners = shared.listeners.read().snapshot();
    for listener in listeners {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_read_complete(&event)));
        if outcome.is_err() {
            error!(port = name, "Read listener panicked; event delivery continues");
        }
    }
    shared.stats.record_dispatch();
}
