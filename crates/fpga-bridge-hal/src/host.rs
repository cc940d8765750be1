//! Kernel primitives for running the bridge on a hosted OS.

use std::sync::{Condvar, Mutex, PoisonError};

use crate::RawLock;

/// A blocking lock built from `std` mutex and condition variable.
///
/// Waiters sleep on the condvar rather than spinning, matching the
/// wait-forever semantics of a kernel mutex.
#[derive(Debug, Default)]
pub struct BlockingLock {
    locked: Mutex<bool>,
    released: Condvar,
}

impl BlockingLock {
    pub const fn new() -> Self {
        Self {
            locked: Mutex::new(false),
            released: Condvar::new(),
        }
    }
}

// Safety: `locked` is only flipped to true by the thread that observed it
// false while holding the inner mutex.
unsafe impl RawLock for BlockingLock {
    fn lock(&self) {
        let mut locked = self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        while *locked {
            locked = self
                .released
                .wait(locked)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *locked = true;
    }

    unsafe fn unlock(&self) {
        let mut locked = self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        *locked = false;
        drop(locked);
        self.released.notify_one();
    }
}
