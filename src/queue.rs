//! Bounded FIFO queue with backpressure and shutdown.
//!
//! Decouples application code from I/O timing: the application pushes
//! into the send queue while the writer task pops, and the reader task
//! pushes into the receive queue while the application pops. Each queue
//! has exactly one producer side and one consumer side.
//!
//! # Semantics
//!
//! - `push` on a full queue waits (blocking) or fails fast (non-blocking).
//! - `pop` on an empty queue waits, optionally up to a timeout, or fails fast.
//! - `shutdown` wakes every waiter. Items already queued are still drained
//!   by `pop`; only then does it report [`Pop::ShutDown`].
//!
//! # Configuration
//!
//! - `capacity`: Maximum queued items (default: 10, minimum: 1)

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Outcome of a [`BoundedQueue::pop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop<T> {
    /// The oldest queued item.
    Item(T),
    /// Nothing queued (non-blocking, or the timeout expired).
    Empty,
    /// Queue shut down and fully drained.
    ShutDown,
}

impl<T> Pop<T> {
    /// Convert into the item, if any.
    pub fn into_item(self) -> Option<T> {
        match self {
            Pop::Item(item) => Some(item),
            Pop::Empty | Pop::ShutDown => None,
        }
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    shut_down: bool,
}

/// Thread-safe bounded FIFO queue.
///
/// Synchronized internally; share it through an `Arc`.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    /// Signalled when an item is pushed or on shutdown.
    not_empty: Notify,
    /// Signalled when an item is popped or on shutdown.
    not_full: Notify,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                shut_down: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // Nothing panics while holding the lock, but never propagate poison.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push an item at the back.
    ///
    /// Returns `false` if the queue is shut down, or if it is full and
    /// `blocking` is false. A blocking push waits for space.
    pub async fn push(&self, item: T, blocking: bool) -> bool {
        loop {
            // Register interest before checking, so a pop between the check
            // and the await cannot be missed.
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.shut_down {
                    return false;
                }
                if inner.items.len() < self.capacity {
                    inner.items.push_back(item);
                    drop(inner);
                    self.not_empty.notify_one();
                    return true;
                }
                if !blocking {
                    return false;
                }
            }

            notified.await;
        }
    }

    /// Push without waiting.
    pub fn try_push(&self, item: T) -> bool {
        let mut inner = self.lock();
        if inner.shut_down || inner.items.len() >= self.capacity {
            return false;
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        true
    }

    /// Pop the oldest item.
    ///
    /// Non-blocking returns [`Pop::Empty`] immediately when nothing is
    /// queued. Blocking waits for an item or shutdown; with a `timeout` it
    /// returns [`Pop::Empty`] on expiry without consuming anything.
    pub async fn pop(&self, blocking: bool, timeout: Option<Duration>) -> Pop<T> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_pop() {
                Pop::Empty if blocking => {}
                other => return other,
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Pop::Empty;
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Pop without waiting.
    pub fn try_pop(&self) -> Pop<T> {
        let mut inner = self.lock();
        match inner.items.pop_front() {
            Some(item) => {
                drop(inner);
                self.not_full.notify_one();
                Pop::Item(item)
            }
            None if inner.shut_down => Pop::ShutDown,
            None => Pop::Empty,
        }
    }

    /// Shut the queue down and wake every waiter. Idempotent.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if inner.shut_down {
            return;
        }
        inner.shut_down = true;
        drop(inner);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Drop every queued item, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.items.len();
        inner.items.clear();
        drop(inner);
        if count > 0 {
            self.not_full.notify_waiters();
        }
        count
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().items.len() >= self.capacity
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
