//! Blocking synchronization primitives.
//!
//! The activation protocol and the pool allocator suspend on these rather
//! than on raw condition variables:
//!
//! - [`Event`]: a latching grant signal. A waiter blocks until the event
//!   is set; the set state persists until explicitly reset, so a grant
//!   that fires before the waiter arrives is never lost.
//! - [`Semaphore`]: a counting semaphore used by the pool allocator's
//!   wait-and-rescan loop. Waits are robust against spurious wakeups
//!   because every caller re-runs its idempotent scan after waking.

use crate::error::{Error, Result};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A latching boolean event.
///
/// Unlike a bare `Condvar`, setting an `Event` with no waiter present is
/// remembered: the next `wait` returns immediately. This is what makes
/// the activation retry loop race-free when a grant fires between the
/// caller releasing the arbitration mutexes and starting to wait.
#[derive(Debug, Default)]
pub struct Event {
    state: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    /// Create a new unset event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the event and wake all waiters.
    pub fn set(&self) {
        let mut set = self.state.lock().unwrap();
        *set = true;
        self.cond.notify_all();
    }

    /// Clear the event.
    pub fn reset(&self) {
        *self.state.lock().unwrap() = false;
    }

    /// Check whether the event is currently set.
    pub fn is_set(&self) -> bool {
        *self.state.lock().unwrap()
    }

    /// Block until the event is set.
    pub fn wait(&self) {
        let mut set = self.state.lock().unwrap();
        while !*set {
            set = self.cond.wait(set).unwrap();
        }
    }

    /// Block until the event is set or the timeout elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        let mut set = self.state.lock().unwrap();
        while !*set {
            let (guard, result) = self.cond.wait_timeout(set, timeout).unwrap();
            set = guard;
            if result.timed_out() && !*set {
                return Err(Error::Timeout("event wait".into()));
            }
        }
        Ok(())
    }
}

/// A counting semaphore.
///
/// `post` never blocks and never allocates, which keeps it legal on the
/// pool's interrupt-context release path.
#[derive(Debug)]
pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    /// Create a semaphore with an initial count.
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Increment the count and wake one waiter.
    pub fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cond.notify_one();
    }

    /// Block until the count is positive, then decrement it.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
    }

    /// Like `wait`, but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            let (guard, result) = self.cond.wait_timeout(count, timeout).unwrap();
            count = guard;
            if result.timed_out() && *count == 0 {
                return Err(Error::Timeout("semaphore wait".into()));
            }
        }
        *count -= 1;
        Ok(())
    }

    /// Decrement the count without blocking.
    ///
    /// Returns `true` if a unit was taken.
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock().unwrap();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Get the current count (snapshot; may change immediately).
    pub fn count(&self) -> usize {
        *self.count.lock().unwrap()
    }
}
