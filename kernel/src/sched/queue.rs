//! Priority run queues
//!
//! One bucket per priority level. Selection takes the highest non-empty
//! bucket, skipping threads whose affinity mask excludes the CPU doing
//! the pick. I/O completion boost temporarily promotes a thread one
//! bucket; the boost decays at the next tick.

use alloc::{collections::VecDeque, sync::Arc};

use super::thread::Thread;

/// Scheduling priority, lowest to highest.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    Idle = 0,
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    RealTime = 4,
}

pub const PRIORITY_LEVELS: usize = 5;

impl Priority {
    pub fn from_raw(raw: u8) -> Priority {
        match raw {
            0 => Priority::Idle,
            1 => Priority::Low,
            2 => Priority::Normal,
            3 => Priority::High,
            _ => Priority::RealTime,
        }
    }
}

pub struct RunQueues {
    buckets: [VecDeque<Arc<Thread>>; PRIORITY_LEVELS],
}

impl RunQueues {
    pub const fn new() -> Self {
        Self {
            buckets: [
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ],
        }
    }

    /// Queue a ready thread at its effective (boosted) priority.
    pub fn enqueue(&mut self, thr: Arc<Thread>) {
        let level = thr.effective_priority() as usize;
        self.buckets[level].push_back(thr);
    }

    /// Pop the next runnable thread for `cpu`: highest bucket first, FIFO
    /// within a bucket, skipping affinity mismatches.
    pub fn pick(&mut self, cpu: u32) -> Option<Arc<Thread>> {
        for level in (0..PRIORITY_LEVELS).rev() {
            let bucket = &mut self.buckets[level];
            if let Some(pos) = bucket.iter().position(|t| t.affinity_allows(cpu)) {
                return bucket.remove(pos);
            }
        }
        None
    }

    /// Drop a thread from whatever bucket holds it (blocking, exit).
    pub fn unlink(&mut self, thr: &Arc<Thread>) -> bool {
        for bucket in self.buckets.iter_mut() {
            if let Some(pos) = bucket.iter().position(|t| Arc::ptr_eq(t, thr)) {
                bucket.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RunQueues {
    fn default() -> Self {
        Self::new()
    }
}
