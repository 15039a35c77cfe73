//! Bounded work queue shared by the producer and the worker pool.
//!
//! Occupancy counts both queued items and in-flight (`pending`) items, so a
//! producer blocked on a full queue wakes only when a worker *finishes* an
//! item, not merely when one is dequeued. That requires two condition
//! variables: `posted` for consumers and `avail` for producers.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    pending: usize,
    active: bool,
}

#[derive(Debug)]
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    posted: Condvar,
    avail: Condvar,
    maxdepth: usize,
}

impl<T> WorkQueue<T> {
    /// Create an active queue. `maxdepth == 0` means unbounded.
    pub fn new(maxdepth: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                pending: 0,
                active: true,
            }),
            posted: Condvar::new(),
            avail: Condvar::new(),
            maxdepth,
        }
    }

    /// Enqueue an item, blocking while `depth + pending >= maxdepth`.
    /// Returns the new depth.
    pub fn put(&self, item: T) -> usize {
        let mut state = self.state.lock().unwrap();
        while self.maxdepth > 0 && state.items.len() + state.pending >= self.maxdepth {
            state = self.avail.wait(state).unwrap();
        }
        state.items.push_back(item);
        let depth = state.items.len();
        drop(state);
        self.posted.notify_one();
        depth
    }

    /// Non-blocking pop from the head. On success the item moves to the
    /// in-flight count until [`WorkQueue::complete`] is called.
    pub fn try_get(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        let item = state.items.pop_front()?;
        state.pending += 1;
        Some(item)
    }

    /// Blocking pop: waits while the queue is active and empty. Returns
    /// `None` once the queue has been deactivated and nothing is queued.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                state.pending += 1;
                return Some(item);
            }
            if !state.active {
                return None;
            }
            state = self.posted.wait(state).unwrap();
        }
    }

    /// Mark one in-flight item finished and wake a blocked producer.
    pub fn complete(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.pending > 0);
        state.pending -= 1;
        drop(state);
        self.avail.notify_one();
    }

    /// Block until no items remain queued (in-flight items may remain).
    pub fn wait_drained(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.items.is_empty() {
            state = self.avail.wait(state).unwrap();
        }
    }

    pub fn activate(&self) {
        self.state.lock().unwrap().active = true;
        self.posted.notify_all();
    }

    /// Flip the active flag off and wake every blocked consumer so it can
    /// observe shutdown.
    pub fn deactivate(&self) {
        self.state.lock().unwrap().active = false;
        self.posted.notify_all();
    }

    pub fn depth(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().pending
    }
}
