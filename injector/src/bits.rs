//! Condition bitmask shared between transport callbacks and waiting tasks.
//!
//! A set of named flags behind a mutex, plus a condition variable so a task
//! can block until any flag of interest is raised. Callbacks only ever
//! [`set`](EventBits::set) / [`clear`](EventBits::clear); waiters use
//! [`wait_any`](EventBits::wait_any) with an explicit deadline.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Flag word with blocking wait-for-any semantics.
#[derive(Debug, Default)]
pub struct EventBits {
    /// Current flag word.
    bits: Mutex<u32>,
    /// Signalled whenever the flag word changes.
    changed: Condvar,
}

impl EventBits {
    /// Creates an empty flag word.
    pub const fn new() -> Self {
        Self {
            bits: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    /// Current flags.
    pub fn get(&self) -> u32 {
        *self.bits.lock()
    }

    /// Raises `mask`, returning the previous flags.
    pub fn set(&self, mask: u32) -> u32 {
        let mut bits = self.bits.lock();
        let prev = *bits;
        *bits |= mask;
        drop(bits);
        self.changed.notify_all();
        prev
    }

    /// Lowers `mask`, returning the previous flags.
    pub fn clear(&self, mask: u32) -> u32 {
        let mut bits = self.bits.lock();
        let prev = *bits;
        *bits &= !mask;
        drop(bits);
        self.changed.notify_all();
        prev
    }

    /// Atomically lowers `clear` and raises `set`, waking waiters once.
    ///
    /// Used by error paths so a waiter never observes success and error
    /// bits together.
    pub fn replace(&self, clear: u32, set: u32) -> u32 {
        let mut bits = self.bits.lock();
        let prev = *bits;
        *bits = (*bits & !clear) | set;
        drop(bits);
        self.changed.notify_all();
        prev
    }

    /// Blocks until any flag in `mask` is raised or `timeout` elapses.
    ///
    /// Returns the flags observed when the wait ended; the result has no
    /// bit of `mask` set on timeout. With `clear_on_exit`, the observed
    /// bits of `mask` are lowered before returning (consumed on read).
    pub fn wait_any(&self, mask: u32, clear_on_exit: bool, timeout: Duration) -> u32 {
        let deadline = Instant::now().checked_add(timeout);
        let mut bits = self.bits.lock();

        while *bits & mask == 0 {
            match deadline {
                Some(d) => {
                    if self.changed.wait_until(&mut bits, d).timed_out() && *bits & mask == 0 {
                        return *bits;
                    }
                }
                None => self.changed.wait(&mut bits),
            }
        }

        let seen = *bits;
        if clear_on_exit {
            *bits &= !mask;
        }
        seen
    }
}
