//! Pushlock: reader/writer lock usable at base IRQL
//!
//! Biased toward writers: once a writer is waiting, new readers queue
//! behind it. Contended paths block on waitable headers, so pushlocks are
//! legal only below DISPATCH.

use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use super::wait::{self, SignalKind, WaitHeader};
use crate::error::Result;

pub struct Pushlock {
    /// >0: reader count, 0: free, -1: writer held.
    state: AtomicI32,
    waiting_writers: AtomicU32,
    readers_gone: WaitHeader,
    writer_gone: WaitHeader,
}

impl Pushlock {
    pub const fn new() -> Self {
        Self {
            state: AtomicI32::new(0),
            waiting_writers: AtomicU32::new(0),
            readers_gone: WaitHeader::new(SignalKind::Synchronization),
            writer_gone: WaitHeader::new(SignalKind::Notification),
        }
    }

    pub fn lock_shared(&self) -> Result<PushlockShared<'_>> {
        loop {
            if self.waiting_writers.load(Ordering::Acquire) == 0 {
                let cur = self.state.load(Ordering::Acquire);
                if cur >= 0
                    && self
                        .state
                        .compare_exchange(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    return Ok(PushlockShared { lock: self });
                }
            }
            self.writer_gone.reset();
            if self.state.load(Ordering::Acquire) >= 0
                && self.waiting_writers.load(Ordering::Acquire) == 0
            {
                continue;
            }
            wait::wait_on(&self.writer_gone)?;
        }
    }

    pub fn lock_exclusive(&self) -> Result<PushlockExclusive<'_>> {
        self.waiting_writers.fetch_add(1, Ordering::AcqRel);
        loop {
            if self
                .state
                .compare_exchange(0, -1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.waiting_writers.fetch_sub(1, Ordering::AcqRel);
                return Ok(PushlockExclusive { lock: self });
            }
            if let Err(e) = wait::wait_on(&self.readers_gone) {
                self.waiting_writers.fetch_sub(1, Ordering::AcqRel);
                return Err(e);
            }
        }
    }
}

impl Default for Pushlock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PushlockShared<'a> {
    lock: &'a Pushlock,
}

impl Drop for PushlockShared<'_> {
    fn drop(&mut self) {
        if self.lock.state.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.lock.readers_gone.signal();
        }
    }
}

pub struct PushlockExclusive<'a> {
    lock: &'a Pushlock,
}

impl Drop for PushlockExclusive<'_> {
    fn drop(&mut self) {
        self.lock.state.store(0, Ordering::Release);
        // Releasing a writer may unblock either side.
        self.lock.readers_gone.signal();
        self.lock.writer_gone.signal();
    }
}
