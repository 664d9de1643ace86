//! Counting semaphore

use core::sync::atomic::{AtomicIsize, Ordering};

use super::wait::{self, SignalKind, WaitHeader};
use crate::error::Result;

pub struct Semaphore {
    count: AtomicIsize,
    hdr: WaitHeader,
}

impl Semaphore {
    pub const fn new(initial: isize) -> Self {
        Self {
            count: AtomicIsize::new(initial),
            hdr: WaitHeader::new(SignalKind::Synchronization),
        }
    }

    /// Take one unit, blocking while the count is zero.
    pub fn acquire(&self) -> Result<()> {
        loop {
            let cur = self.count.load(Ordering::Acquire);
            if cur > 0 {
                if self
                    .count
                    .compare_exchange(cur, cur - 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(());
                }
                continue;
            }
            wait::wait_on(&self.hdr)?;
        }
    }

    pub fn try_acquire(&self) -> bool {
        let mut cur = self.count.load(Ordering::Acquire);
        while cur > 0 {
            match self
                .count
                .compare_exchange(cur, cur - 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(seen) => cur = seen,
            }
        }
        false
    }

    pub fn release(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
        self.hdr.signal();
    }

    pub fn count(&self) -> isize {
        self.count.load(Ordering::Acquire)
    }
}
