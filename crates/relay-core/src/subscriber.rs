//! Subscriber handles and their outbound buffers.
//!
//! A [`Subscriber`] is the relay-facing side of one client connection: an
//! identity plus the producer end of a bounded outbound queue. The matching
//! [`Outbound`] is the consumer end, drained by the connection's write pump.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default outbound buffer capacity.
pub const DEFAULT_SEND_BUFFER: usize = 256;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    fn next() -> Self {
        Self(ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The payload was queued for delivery.
    Queued,
    /// The outbound buffer is at capacity.
    Full,
    /// The buffer was closed or its consumer is gone.
    Closed,
}

/// Handle to a connected client.
///
/// Clones share the same identity and outbound buffer. Equality is by
/// identity only.
#[derive(Clone)]
pub struct Subscriber {
    id: SubscriberId,
    sender: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
}

impl Subscriber {
    /// Create a subscriber with an outbound buffer of the given capacity.
    ///
    /// Returns the handle and the consumer side of its buffer.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Outbound) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = SubscriberId::next();
        let subscriber = Self {
            id,
            sender: Arc::new(Mutex::new(Some(tx))),
        };
        (subscriber, Outbound { id, receiver: rx })
    }

    /// Get the subscriber's ID.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Try to enqueue a payload without waiting.
    pub fn try_send(&self, payload: Bytes) -> SendOutcome {
        let guard = self.lock();
        let Some(tx) = guard.as_ref() else {
            return SendOutcome::Closed;
        };
        match tx.try_send(payload) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => SendOutcome::Full,
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Close the outbound buffer.
    ///
    /// Already queued payloads are still drained by the consumer, after which
    /// it observes end-of-stream. Returns `true` if this call closed it.
    pub fn close(&self) -> bool {
        self.lock().take().is_some()
    }

    /// Check if the outbound buffer is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().as_ref().map_or(true, |tx| tx.is_closed())
    }

    fn lock(&self) -> MutexGuard<'_, Option<mpsc::Sender<Bytes>>> {
        self.sender.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Subscriber {}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Consumer side of a subscriber's outbound buffer.
#[derive(Debug)]
pub struct Outbound {
    id: SubscriberId,
    receiver: mpsc::Receiver<Bytes>,
}

impl Outbound {
    /// Get the ID of the subscriber this buffer belongs to.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next payload.
    ///
    /// Returns `None` once the buffer is closed and drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Take the next payload if one is ready.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.receiver.try_recv().ok()
    }
}
