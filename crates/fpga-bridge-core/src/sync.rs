//! Mutual exclusion on top of the kernel's raw lock.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use fpga_bridge_hal::RawLock;

/// Data guarded by a kernel lock.
pub struct Lock<R: RawLock, T> {
    raw: R,
    data: UnsafeCell<T>,
}

// Safety: access to `data` only happens through a guard, which exists only
// while `raw` is held.
unsafe impl<R: RawLock + Send, T: Send> Send for Lock<R, T> {}
unsafe impl<R: RawLock + Sync, T: Send> Sync for Lock<R, T> {}

impl<R: RawLock, T> Lock<R, T> {
    pub const fn new(raw: R, data: T) -> Self {
        Self {
            raw,
            data: UnsafeCell::new(data),
        }
    }

    /// Block until the lock is held and return a guard for the data.
    pub fn lock(&self) -> LockGuard<'_, R, T> {
        self.raw.lock();
        LockGuard { lock: self }
    }

    /// Exclusive access without locking, available when nobody else can
    /// hold a reference.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// Holds the lock until dropped.
pub struct LockGuard<'a, R: RawLock, T> {
    lock: &'a Lock<R, T>,
}

impl<R: RawLock, T> Deref for LockGuard<'_, R, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard proves the lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<R: RawLock, T> DerefMut for LockGuard<'_, R, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard proves the lock is held.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<R: RawLock, T> Drop for LockGuard<'_, R, T> {
    fn drop(&mut self) {
        // Safety: this guard was created by a successful `lock`.
        unsafe { self.lock.raw.unlock() }
    }
}
