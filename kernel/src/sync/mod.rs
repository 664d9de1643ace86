//! Synchronization primitives
//!
//! The IRQL ladder and the lock/wait primitives built on top of it.
//! Spinlocks raise the current CPU's IRQL and are the only primitive legal
//! at or above DISPATCH; mutexes, events, semaphores and pushlocks block
//! the calling thread and are legal only below DISPATCH.

pub mod event;
pub mod irql;
pub mod mutex;
pub mod pushlock;
pub mod semaphore;
pub mod spinlock;
pub mod wait;

pub use event::{Event, EventKind};
pub use irql::{Irql, IrqlGuard};
pub use mutex::Mutex;
pub use pushlock::Pushlock;
pub use semaphore::Semaphore;
pub use spinlock::{SpinLock, SpinLockGuard};
pub use wait::{wait_on, wait_on_many, WaitHeader};

#[cfg(test)]
mod tests;
