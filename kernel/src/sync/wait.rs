//! Waitable objects
//!
//! [`WaitHeader`] is the common prefix of every blockable primitive:
//! events, mutexes, semaphores, process/thread exit, IRP completion.
//! A thread may wait on several headers at once; the first to signal wins
//! and the stale registrations are pruned lazily at the next signal.

use alloc::{collections::VecDeque, sync::Arc, sync::Weak};
use core::sync::atomic::{AtomicBool, Ordering};

use super::spinlock::SpinLock;
use crate::error::{Result, Status};
use crate::sched::thread::{self, Thread, WakeReason};

/// How a signal interacts with waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Signal wakes every waiter and stays set until reset.
    Notification,
    /// Signal wakes exactly one waiter and is consumed by it.
    Synchronization,
}

struct Waiter {
    thread: Weak<Thread>,
    seq: u64,
    /// Index this header had in the caller's wait set.
    index: usize,
}

/// The common substructure of anything a thread can block on.
pub struct WaitHeader {
    signaled: AtomicBool,
    kind: SignalKind,
    waiters: SpinLock<VecDeque<Waiter>>,
}

impl WaitHeader {
    pub const fn new(kind: SignalKind) -> Self {
        Self {
            signaled: AtomicBool::new(false),
            kind,
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Clear the signaled state (notification headers only).
    pub fn reset(&self) {
        self.signaled.store(false, Ordering::Release);
    }

    /// Try to take the signal without blocking.
    fn try_consume(&self) -> bool {
        match self.kind {
            SignalKind::Notification => self.signaled.load(Ordering::Acquire),
            SignalKind::Synchronization => self
                .signaled
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
        }
    }

    /// Signal the header, waking all waiters (notification) or exactly one
    /// (synchronization). With no waiters the signal latches.
    pub fn signal(&self) {
        let mut waiters = self.waiters.lock();
        match self.kind {
            SignalKind::Notification => {
                self.signaled.store(true, Ordering::Release);
                while let Some(w) = waiters.pop_front() {
                    wake(&w, WakeReason::Signaled(w.index));
                }
            }
            SignalKind::Synchronization => {
                // Hand the signal to the first live waiter; latch if none.
                while let Some(w) = waiters.pop_front() {
                    if wake(&w, WakeReason::Signaled(w.index)) {
                        return;
                    }
                }
                self.signaled.store(true, Ordering::Release);
            }
        }
    }

    /// Wake every waiter with status ABORTED. The signaled state is
    /// untouched.
    pub fn abort_waiters(&self) {
        let mut waiters = self.waiters.lock();
        while let Some(w) = waiters.pop_front() {
            wake(&w, WakeReason::Aborted);
        }
    }

    fn register(&self, thr: &Arc<Thread>, seq: u64, index: usize) {
        self.waiters.lock().push_back(Waiter {
            thread: Arc::downgrade(thr),
            seq,
            index,
        });
    }
}

/// Resolve a waiter entry; returns false for stale or dead entries.
fn wake(w: &Waiter, reason: WakeReason) -> bool {
    let Some(thr) = w.thread.upgrade() else {
        return false;
    };
    if thr.resolve_wait(w.seq, reason) {
        thread::unblock(&thr);
        true
    } else {
        false
    }
}

/// Block until `hdr` signals. Legal only below DISPATCH.
pub fn wait_on(hdr: &WaitHeader) -> Result<()> {
    wait_on_many(&[hdr]).map(|_| ())
}

/// Block until any of `hdrs` signals; returns the index of the one that
/// fired (first-wins).
pub fn wait_on_many(hdrs: &[&WaitHeader]) -> Result<usize> {
    if hdrs.is_empty() {
        return Err(Status::InvalidArgument);
    }
    debug_assert!(
        super::irql::current() < super::irql::Irql::Dispatch,
        "wait at or above DISPATCH"
    );

    // Fast path: something is already signaled.
    for (i, hdr) in hdrs.iter().enumerate() {
        if hdr.try_consume() {
            return Ok(i);
        }
    }

    let Some(cur) = thread::current() else {
        // No thread context (early boot, host test harness): poll.
        loop {
            for (i, hdr) in hdrs.iter().enumerate() {
                if hdr.try_consume() {
                    return Ok(i);
                }
            }
            core::hint::spin_loop();
        }
    };

    let seq = cur.begin_wait();
    for (i, hdr) in hdrs.iter().enumerate() {
        hdr.register(&cur, seq, i);
        // Signal may have landed between the fast path and registration.
        if hdr.try_consume() {
            if cur.resolve_wait(seq, WakeReason::Signaled(i)) {
                return Ok(i);
            }
            // Someone else resolved us first; re-latch the stolen signal.
            hdr.signal();
            break;
        }
    }

    loop {
        match cur.wait_outcome(seq) {
            None => thread::block_current(),
            Some(WakeReason::Signaled(i)) => return Ok(i),
            Some(WakeReason::Aborted) => return Err(Status::Aborted),
            Some(WakeReason::TimedOut) => return Err(Status::TimedOut),
        }
    }
}
