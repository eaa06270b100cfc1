//! Timeout-bounded double-ended handoff queue.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// A double-ended queue whose consumers wait for items with a hard timeout.
///
/// This is the single cross-task handoff point of the XCP layer: transport
/// pumps push response packets from their I/O context, a requester awaits
/// the newest entry with [`pop_back`](Self::pop_back). The wait is driven by
/// a [`Notify`] wake-up, never by polling, and a timeout expiry is always an
/// explicit `None` to the caller - the queue never drops a timed-out pop
/// silently.
///
/// [`pop_back`](Self::pop_back) takes the most recently pushed item first,
/// matching the "most recent response satisfies the most recent request"
/// pattern of the request/response layer; [`pop_front`](Self::pop_front) is
/// the FIFO counterpart for consumers that drain in arrival order.
#[derive(Debug, Default)]
pub struct WaitingQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> WaitingQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self { items: Mutex::new(VecDeque::new()), notify: Notify::new() }
    }

    fn items(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        // A panicking producer cannot leave the deque in an inconsistent
        // state; recover the guard instead of propagating the poison.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item and wake a waiting consumer.
    pub fn push(&self, item: T) {
        self.items().push_back(item);
        self.notify.notify_one();
    }

    /// Take the newest item without waiting.
    pub fn try_pop_back(&self) -> Option<T> {
        self.items().pop_back()
    }

    /// Take the newest item, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` once the timeout elapses with the queue still empty.
    pub async fn pop_back(&self, timeout: Duration) -> Option<T> {
        self.pop_with(timeout, VecDeque::pop_back).await
    }

    /// Take the oldest item, waiting up to `timeout` for one to arrive.
    pub async fn pop_front(&self, timeout: Duration) -> Option<T> {
        self.pop_with(timeout, VecDeque::pop_front).await
    }

    async fn pop_with(&self, timeout: Duration, take: fn(&mut VecDeque<T>) -> Option<T>) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = take(&mut self.items()) {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, self.notify.notified()).await.is_err() {
                // Deadline reached; pick up an item that raced the expiry.
                return take(&mut self.items());
            }
        }
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Drop all queued items.
    pub fn clear(&self) {
        self.items().clear();
    }
}
