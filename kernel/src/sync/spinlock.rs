//! IRQL-raising spinlock
//!
//! Acquiring raises the current CPU's IRQL to the lock's minimum level
//! (DISPATCH by default) before spinning, so nothing at or below that
//! level can preempt the holder on this CPU. The guard carries the
//! [`IrqlGuard`] token; releasing the lock restores the previous level.

use core::ops::{Deref, DerefMut};

use super::irql::{self, Irql, IrqlGuard};

pub struct SpinLock<T: ?Sized> {
    min_irql: Irql,
    inner: spin::Mutex<T>,
}

// SAFETY: the inner spin::Mutex provides the Sync guarantee; min_irql is
// immutable after construction.
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}
// SAFETY: sending the lock sends the protected value.
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}

pub struct SpinLockGuard<'a, T: ?Sized> {
    guard: spin::MutexGuard<'a, T>,
    /// Keeps the IRQL raised for the lifetime of the guard.
    _irql: IrqlGuard,
}

impl<T> SpinLock<T> {
    /// Spinlock with the default minimum IRQL (DISPATCH).
    pub const fn new(value: T) -> Self {
        Self {
            min_irql: Irql::Dispatch,
            inner: spin::Mutex::new(value),
        }
    }

    /// Spinlock acquired at a custom minimum IRQL (e.g. HIGH for the TLB
    /// shootdown queue, which is touched from the shootdown IPI).
    pub const fn at_irql(min_irql: Irql, value: T) -> Self {
        Self {
            min_irql,
            inner: spin::Mutex::new(value),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let token = irql::raise_to_at_least(self.min_irql);
        SpinLockGuard {
            guard: self.inner.lock(),
            _irql: token,
        }
    }

    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let token = irql::raise_to_at_least(self.min_irql);
        self.inner
            .try_lock()
            .map(|guard| SpinLockGuard { guard, _irql: token })
    }

    /// Whether the lock is currently held by someone.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
