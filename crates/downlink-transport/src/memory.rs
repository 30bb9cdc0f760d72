use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{Result, TransportError};
use crate::traits::ByteSource;

#[derive(Debug, Default)]
struct Shared {
    queue: VecDeque<u8>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<Shared>,
    ready: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        // A panicked feeder leaves the queue itself intact.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory byte source.
///
/// Bytes pushed through a [`MemoryFeed`] become readable in arrival order.
/// Each push models one burst on the wire: everything queued is "buffered on
/// the port", so [`ByteSource::discard_pending`] drops all of it.
#[derive(Debug)]
pub struct MemorySource {
    inner: Arc<Inner>,
    timeout: Duration,
}

/// Producer side of a [`MemorySource`].
#[derive(Debug, Clone)]
pub struct MemoryFeed {
    inner: Arc<Inner>,
}

impl MemorySource {
    /// Create a source whose reads wait at most `timeout` for more bytes.
    pub fn new(timeout: Duration) -> (Self, MemoryFeed) {
        let inner = Arc::new(Inner::default());
        (
            Self {
                inner: Arc::clone(&inner),
                timeout,
            },
            MemoryFeed { inner },
        )
    }

    /// Create a source preloaded with `bytes` and already closed for writing.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let (source, feed) = Self::new(Duration::ZERO);
        feed.push(bytes);
        feed.close();
        source
    }
}

impl MemoryFeed {
    /// Queue a burst of bytes.
    pub fn push(&self, bytes: &[u8]) {
        let mut shared = self.inner.lock();
        shared.queue.extend(bytes.iter().copied());
        drop(shared);
        self.inner.ready.notify_all();
    }

    /// Mark end of stream. Queued bytes remain readable.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.inner.ready.notify_all();
    }

    /// Bytes queued and not yet read.
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

impl ByteSource for MemorySource {
    fn read_bounded(&mut self, buf: &mut [u8]) -> Result<usize> {
        let deadline = Instant::now() + self.timeout;
        let mut shared = self.inner.lock();
        let mut filled = 0usize;

        while filled < buf.len() {
            if let Some(byte) = shared.queue.pop_front() {
                buf[filled] = byte;
                filled += 1;
                continue;
            }
            if shared.closed {
                if filled == 0 {
                    return Err(TransportError::Closed);
                }
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _timeout) = self
                .inner
                .ready
                .wait_timeout(shared, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            shared = guard;
        }

        Ok(filled)
    }

    fn discard_pending(&mut self) -> Result<usize> {
        let mut shared = self.inner.lock();
        let dropped = shared.queue.len();
        shared.queue.clear();
        Ok(dropped)
    }

    fn pending(&mut self) -> Result<usize> {
        Ok(self.inner.lock().queue.len())
    }
}
