//! Read events and the listener contract.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One completed read from a serial line.
///
/// `data` is an owned copy taken from the connection's scratch buffer before
/// dispatch, so listeners may keep it past the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadEvent {
    port: String,
    data: Vec<u8>,
}

impl ReadEvent {
    pub fn new(port: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            port: port.into(),
            data,
        }
    }

    /// Name of the port the bytes arrived on.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// The bytes produced by a single read.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Observer invoked once per completed read, on the port's receive worker.
///
/// Implementations should return quickly: the next read does not start until
/// every listener has returned.
pub trait ReadListener: Send + Sync {
    fn on_read_complete(&self, event: &ReadEvent);
}

impl<F> ReadListener for F
where
    F: Fn(&ReadEvent) + Send + Sync,
{
    fn on_read_complete(&self, event: &ReadEvent) {
        self(event)
    }
}

/// Handle returned by `subscribe`, used to remove a listener later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Ordered listener list. Dispatch works on a snapshot so listeners can
/// subscribe or unsubscribe from inside a callback.
#[derive(Default)]
pub(crate) struct ListenerSet {
    entries: Vec<(ListenerId, Arc<dyn ReadListener>)>,
}

impl ListenerSet {
    pub(crate) fn push(&mut self, listener: Arc<dyn ReadListener>) -> ListenerId {
        let id = ListenerId::next();
        self.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn ReadListener>> {
        self.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Formats bytes as space-separated lowercase hex pairs for trace logs.
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
