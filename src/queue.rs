//! # Work Queue
//!
//! Blocking FIFO channel shared between producer and consumer pools. The queue
//! is optionally bounded: enqueuers block while it is full, dequeuers block
//! while it is empty.
//!
//! Blocked callers can be released without pushing anything into the queue:
//! the `*_or_cancel` variants take a cancellation predicate that is re-checked
//! every time [`WorkQueue::wake_all`] is called. Pools use this on shutdown so
//! no sentinel values ever travel through the queue.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    waiting_readers: usize,
}

/// Thread-safe FIFO work queue
#[derive(Debug)]
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Option<usize>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T> WorkQueue<T> {
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Create a queue that holds at most `capacity` items
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    /// `None` is unbounded; a capacity of zero is raised to one
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        let capacity = capacity.map(|capacity| capacity.max(1));
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                waiting_readers: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Append an item, blocking while a bounded queue is full
    pub fn enqueue(&self, item: T) {
        // A predicate that never cancels always hands the item over.
        let _ = self.enqueue_or_cancel(item, || false);
    }

    /// Append an item without blocking; gives the item back if the queue is full
    pub fn try_enqueue(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if self.is_full(&state) {
            return Err(item);
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Append an item, blocking while full until `cancelled` reports true
    ///
    /// Returns the item back to the caller if the wait was cancelled.
    pub fn enqueue_or_cancel<F>(&self, item: T, cancelled: F) -> Result<(), T>
    where
        F: Fn() -> bool,
    {
        let mut state = self.state.lock();
        while self.is_full(&state) {
            if cancelled() {
                return Err(item);
            }
            self.not_full.wait(&mut state);
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest item, blocking until one is available
    pub fn dequeue(&self) -> T {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = self.pop(&mut state) {
                return item;
            }
            state.waiting_readers += 1;
            self.not_empty.wait(&mut state);
            state.waiting_readers -= 1;
        }
    }

    /// Remove the oldest item if there is one
    pub fn try_dequeue(&self) -> Option<T> {
        let mut state = self.state.lock();
        self.pop(&mut state)
    }

    /// Remove the oldest item, waiting at most `timeout` for one to arrive
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = self.pop(&mut state) {
                return Some(item);
            }
            if Instant::now() >= deadline {
                return None;
            }
            state.waiting_readers += 1;
            self.not_empty.wait_until(&mut state, deadline);
            state.waiting_readers -= 1;
        }
    }

    /// Remove the oldest item, blocking until one arrives or `cancelled` reports true
    ///
    /// Items already queued are still handed out after cancellation; `None`
    /// only comes back when the queue is empty and the caller was cancelled.
    pub fn dequeue_or_cancel<F>(&self, cancelled: F) -> Option<T>
    where
        F: Fn() -> bool,
    {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = self.pop(&mut state) {
                return Some(item);
            }
            if cancelled() {
                return None;
            }
            state.waiting_readers += 1;
            self.not_empty.wait(&mut state);
            state.waiting_readers -= 1;
        }
    }

    /// Wake every blocked caller so it re-checks its cancellation predicate
    pub fn wake_all(&self) {
        let _state = self.state.lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Number of callers currently blocked in a dequeue
    pub fn waiting(&self) -> usize {
        self.state.lock().waiting_readers
    }

    /// Drop every queued item, returning how many were discarded
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.items.len();
        state.items.clear();
        self.not_full.notify_all();
        dropped
    }

    /// Human-readable occupancy; diagnostic only
    pub fn status(&self) -> String {
        let state = self.state.lock();
        match self.capacity {
            Some(capacity) => format!(
                "Size: {}  Waiting: {}  Length: {}",
                capacity,
                state.waiting_readers,
                state.items.len()
            ),
            None => format!(
                "Waiting: {}  Length: {}",
                state.waiting_readers,
                state.items.len()
            ),
        }
    }

    fn is_full(&self, state: &QueueState<T>) -> bool {
        self.capacity
            .is_some_and(|capacity| state.items.len() >= capacity)
    }

    fn pop(&self, state: &mut QueueState<T>) -> Option<T> {
        let item = state.items.pop_front()?;
        if self.capacity.is_some() {
            self.not_full.notify_one();
        }
        Some(item)
    }
}

impl<T> fmt::Display for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.status())
    }
}
