//! Blocking FIFO work queue shared by dispatchers and workers
//!
//! One mutex guards the item buffer and the closed flag together; one condition
//! variable wakes consumers when an item arrives or when the queue is closed.
//! The `VecDeque` alone owns queued items, so there is no separate head/tail
//! bookkeeping to fall out of sync when the queue empties.

use crate::error::{Result, VaultError};
use std::collections::VecDeque;
use std::mem;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use tracing::debug;

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Thread-safe multi-producer, multi-consumer FIFO with blocking pop
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    capacity: Option<usize>,
}

impl<T> WorkQueue<T> {
    /// Create an empty, unbounded queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            capacity: None,
        }
    }

    /// Create an empty queue that rejects pushes beyond `capacity` items
    pub fn bounded(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(VaultError::InvalidArgument(
                "queue capacity must be greater than zero".to_string(),
            ));
        }

        let mut queue = Self::new();
        queue.capacity = Some(capacity);
        Ok(queue)
    }

    // Every critical section leaves the state consistent, so a panic in
    // another holder does not invalidate it.
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item at the tail and wake one waiting consumer.
    ///
    /// Never blocks on queue contents. Fails with `QueueClosed` after
    /// [`close`](Self::close), `QueueFull` when a bounded queue is at capacity,
    /// and `OutOfMemory` if the buffer cannot grow.
    pub fn push(&self, item: T) -> Result<()> {
        let mut state = self.lock();

        if state.closed {
            return Err(VaultError::QueueClosed);
        }

        if let Some(capacity) = self.capacity {
            if state.items.len() >= capacity {
                return Err(VaultError::QueueFull);
            }
        }

        state
            .items
            .try_reserve(1)
            .map_err(|_| VaultError::OutOfMemory)?;
        state.items.push_back(item);
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the head item, blocking while the queue is empty.
    ///
    /// Returns `QueueClosed` once the queue has been closed, including for
    /// callers that were already waiting when it happened.
    pub fn pop(&self) -> Result<T> {
        let mut state = self.lock();

        loop {
            if state.closed {
                return Err(VaultError::QueueClosed);
            }

            // Re-checked after every wake: another consumer may have taken
            // the item, or the wake may be spurious.
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }

            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Remove the head item without blocking
    pub fn try_pop(&self) -> Result<Option<T>> {
        let mut state = self.lock();

        if state.closed {
            return Err(VaultError::QueueClosed);
        }

        Ok(state.items.pop_front())
    }

    /// Number of queued items; advisory under concurrent use
    pub fn size(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Discard every queued item, returning how many were dropped
    pub fn drain(&self) -> usize {
        // Items are dropped after the lock is released.
        let drained = mem::take(&mut self.lock().items);
        drained.len()
    }

    /// Close the queue: discard pending items, fail all later pushes and
    /// pops, and wake every blocked consumer. Idempotent.
    pub fn close(&self) {
        let drained = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            mem::take(&mut state.items)
        };

        self.not_empty.notify_all();
        debug!(discarded = drained.len(), "work queue closed");
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
