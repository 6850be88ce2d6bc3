// # Thread Coordination Primitives
//
// Small blocking primitives used by the task scheduler and the async I/O
// dispatcher: auto/manual reset events and a counting semaphore. Built on
// parking_lot so uncontended paths stay in user space.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

// ============================================================================
// Event
// ============================================================================

/// Reset behavior of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// `wait` consumes the signaled state; the next waiter blocks again.
    AutomaticReset,
    /// The event stays signaled until `reset` is called.
    ManualReset,
}

/// A binary event a thread can block on until another thread triggers it.
pub struct Event {
    kind: EventType,
    state: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new(kind: EventType) -> Self {
        Self {
            kind,
            state: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Signal the event, waking one waiter (auto-reset) or all (manual).
    pub fn trigger(&self) {
        let mut signaled = self.state.lock();
        *signaled = true;
        match self.kind {
            EventType::AutomaticReset => {
                self.cond.notify_one();
            }
            EventType::ManualReset => {
                self.cond.notify_all();
            }
        }
    }

    /// Clear the signaled state.
    pub fn reset(&self) {
        *self.state.lock() = false;
    }

    /// Block until the event is triggered.
    pub fn wait(&self) {
        let mut signaled = self.state.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
        if self.kind == EventType::AutomaticReset {
            *signaled = false;
        }
    }

    /// Block until the event is triggered or the timeout elapses.
    /// Returns true if the event was triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut signaled = self.state.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                return false;
            }
        }
        if self.kind == EventType::AutomaticReset {
            *signaled = false;
        }
        true
    }
}

// ============================================================================
// Semaphore
// ============================================================================

/// Counting semaphore used to throttle idle worker polling.
pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Add `n` permits and wake up to `n` waiters.
    pub fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut count = self.count.lock();
        *count += n;
        if n == 1 {
            self.cond.notify_one();
        } else {
            self.cond.notify_all();
        }
    }

    /// Take one permit, blocking until one is available.
    pub fn acquire(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cond.wait(&mut count);
        }
        *count -= 1;
    }

    /// Take one permit if one becomes available within the timeout.
    /// Returns true if a permit was taken.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count == 0 {
            if self.cond.wait_until(&mut count, deadline).timed_out() {
                return false;
            }
        }
        *count -= 1;
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
