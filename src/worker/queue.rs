//! Blocking FIFO between the reader and the processor.
//!
//! One producer, one consumer. `enqueue` never blocks. `take` blocks until a
//! message arrives, the queue is completed and drained, or the queue is
//! cancelled. Both completion and cancellation wake a blocked `take`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use tracing::debug;

use crate::error::{Result, TetherError};
use crate::protocol::Message;

#[derive(Default)]
struct Inner {
    items: VecDeque<Message>,
    completed: bool,
    cancelled: bool,
}

#[derive(Default)]
pub struct MessageQueue {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Messages enqueued after completion are dropped.
    pub fn enqueue(&self, message: Message) {
        let mut inner = self.lock();
        if inner.completed {
            debug!(kind = message.kind(), "queue completed, dropping message");
            return;
        }
        inner.items.push_back(message);
        drop(inner);
        self.available.notify_one();
    }

    /// Take the oldest message, blocking until one is available.
    ///
    /// Returns `QueueClosed` once the queue is completed and empty, and
    /// `Cancelled` as soon as [`cancel`](Self::cancel) is called, even if
    /// messages are still pending.
    pub fn take(&self) -> Result<Message> {
        let mut inner = self.lock();
        loop {
            if inner.cancelled {
                return Err(TetherError::Cancelled);
            }
            if let Some(message) = inner.items.pop_front() {
                return Ok(message);
            }
            if inner.completed {
                return Err(TetherError::QueueClosed);
            }
            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Mark that no more messages will be added. Pending ones can still be taken.
    pub fn complete(&self) {
        self.lock().completed = true;
        self.available.notify_all();
    }

    /// Abort any current and future `take`.
    pub fn cancel(&self) {
        self.lock().cancelled = true;
        self.available.notify_all();
    }

    pub fn is_completed(&self) -> bool {
        let inner = self.lock();
        inner.completed && inner.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock cannot leave the deque half-updated.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
