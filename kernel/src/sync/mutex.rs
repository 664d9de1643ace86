//! Blocking mutex
//!
//! Legal only below DISPATCH. Contended acquires wait on a
//! synchronization header, so exactly one waiter wakes per release.

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::wait::{self, SignalKind, WaitHeader};
use crate::error::Result;
use crate::sched::thread;

pub struct Mutex<T: ?Sized> {
    locked: AtomicBool,
    owner: AtomicU64,
    hdr: WaitHeader,
    value: core::cell::UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by the locked flag.
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}
// SAFETY: sending the mutex sends the protected value.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}

pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner: AtomicU64::new(0),
            hdr: WaitHeader::new(SignalKind::Synchronization),
            value: core::cell::UnsafeCell::new(value),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> Result<MutexGuard<'_, T>> {
        loop {
            if self
                .locked
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                self.owner.store(
                    thread::current().map(|t| t.tid).unwrap_or(0),
                    Ordering::Relaxed,
                );
                return Ok(MutexGuard { mutex: self });
            }
            wait::wait_on(&self.hdr)?;
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.owner.store(
                thread::current().map(|t| t.tid).unwrap_or(0),
                Ordering::Relaxed,
            );
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Thread id of the current holder (0 when uncontended by a thread).
    pub fn owner(&self) -> u64 {
        self.owner.load(Ordering::Relaxed)
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves exclusive access.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves exclusive access.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.owner.store(0, Ordering::Relaxed);
        self.mutex.locked.store(false, Ordering::Release);
        self.mutex.hdr.signal();
    }
}
