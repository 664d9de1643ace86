//! Threads
//!
//! Lifecycle: `allocate` → `initialize` → `ready` → (block/unblock)* →
//! `exit_current`. A thread is always in exactly one place: a run queue
//! (READY), a CPU's current slot (RUNNING), waiter lists (BLOCKED), or
//! dead awaiting reap. The exit header signals on death and is what
//! `join`/`wait_thread` blocks on.

use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use super::cpu;
use super::process::Process;
use super::queue::Priority;
use crate::arch::context::ThreadContext;
use crate::error::{Result, Status};
use crate::sync::spinlock::SpinLock;
use crate::sync::wait::{SignalKind, WaitHeader};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready = 0,
    Running = 1,
    Blocked = 2,
    Dead = 3,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadFlags: u32 {
        /// Thread is a DPC/worker thread and must never touch user memory.
        const DPC = 1 << 0;
        /// Parked by the kernel debugger.
        const DEBUGGER_BLOCKED = 1 << 1;
        /// A wait in progress should wake on signal delivery.
        const WAKE_ON_SIGNAL = 1 << 2;
    }
}

/// Why a blocked thread was resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The waitable at this index in the caller's wait set fired.
    Signaled(usize),
    Aborted,
    TimedOut,
}

// Wait cell encoding: (seq << 8) | code. Seq pairs the cell with one
// wait_on_many call so stale waiter entries can never resolve a newer
// wait.
const WAIT_IDLE: u64 = 0;
const WAIT_PENDING: u64 = 1;
const WAIT_ABORTED: u64 = 2;
const WAIT_TIMED_OUT: u64 = 3;
const WAIT_SIGNALED_BASE: u64 = 4;

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

pub struct Thread {
    pub tid: u64,
    state: AtomicU8,
    priority: AtomicU8,
    /// Transient priority boost applied on I/O completion.
    boost: AtomicU8,
    affinity: AtomicU64,
    pub flags: AtomicU32,
    master_cpu: AtomicU32,
    wait_cell: AtomicU64,
    wait_seq: AtomicU64,
    /// Signaled when the thread exits; join blocks here.
    pub exit_hdr: WaitHeader,
    /// Pending signal bitmask (bit N = signal N).
    pub signals: AtomicU64,
    pub process: spin::RwLock<Weak<Process>>,
    pub context: SpinLock<ThreadContext>,
    /// Base of the kernel stack; zero until one is assigned.
    pub kstack_base: AtomicU64,
}

impl Thread {
    /// Allocate a bare thread object. Not runnable until initialized and
    /// readied.
    pub fn allocate() -> Arc<Thread> {
        Arc::new(Thread {
            tid: NEXT_TID.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(ThreadState::Blocked as u8),
            priority: AtomicU8::new(Priority::Normal as u8),
            boost: AtomicU8::new(0),
            affinity: AtomicU64::new(!0),
            flags: AtomicU32::new(0),
            master_cpu: AtomicU32::new(0),
            wait_cell: AtomicU64::new(WAIT_IDLE),
            wait_seq: AtomicU64::new(0),
            exit_hdr: WaitHeader::new(SignalKind::Notification),
            signals: AtomicU64::new(0),
            process: spin::RwLock::new(Weak::new()),
            context: SpinLock::new(ThreadContext::empty()),
            kstack_base: AtomicU64::new(0),
        })
    }

    pub fn initialize(
        self: &Arc<Thread>,
        priority: Priority,
        affinity: u64,
        ctx: ThreadContext,
    ) -> Result<()> {
        if affinity == 0 {
            return Err(Status::InvalidArgument);
        }
        self.priority.store(priority as u8, Ordering::Relaxed);
        self.affinity.store(affinity, Ordering::Relaxed);
        *self.context.lock() = ctx;
        Ok(())
    }

    pub fn state(&self) -> ThreadState {
        match self.state.load(Ordering::Acquire) {
            0 => ThreadState::Ready,
            1 => ThreadState::Running,
            2 => ThreadState::Blocked,
            _ => ThreadState::Dead,
        }
    }

    pub fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn compare_set_state(&self, from: ThreadState, to: ThreadState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn priority(&self) -> Priority {
        Priority::from_raw(self.priority.load(Ordering::Relaxed))
    }

    pub fn set_priority(&self, priority: Priority) {
        self.priority.store(priority as u8, Ordering::Relaxed);
    }

    /// Priority including any transient I/O boost.
    pub fn effective_priority(&self) -> Priority {
        let base = self.priority.load(Ordering::Relaxed);
        let boost = self.boost.load(Ordering::Relaxed);
        Priority::from_raw(base.saturating_add(boost).min(Priority::RealTime as u8))
    }

    /// One-level boost applied when an I/O the thread waited for
    /// completes.
    pub fn apply_io_boost(&self) {
        if self.priority.load(Ordering::Relaxed) < Priority::High as u8 {
            self.boost.store(1, Ordering::Relaxed);
        }
    }

    pub fn decay_boost(&self) {
        self.boost.store(0, Ordering::Relaxed);
    }

    pub fn affinity(&self) -> u64 {
        self.affinity.load(Ordering::Relaxed)
    }

    pub fn set_affinity(&self, mask: u64) -> Result<()> {
        if mask == 0 {
            return Err(Status::InvalidArgument);
        }
        self.affinity.store(mask, Ordering::Relaxed);
        Ok(())
    }

    pub fn affinity_allows(&self, cpu: u32) -> bool {
        cpu < 64 && self.affinity.load(Ordering::Relaxed) & (1u64 << cpu) != 0
    }

    pub fn master_cpu(&self) -> u32 {
        self.master_cpu.load(Ordering::Relaxed)
    }

    pub fn set_master_cpu(&self, cpu: u32) {
        self.master_cpu.store(cpu, Ordering::Relaxed);
    }

    /// Open a new wait window; returns the sequence pairing waiter
    /// registrations with this wait.
    pub fn begin_wait(&self) -> u64 {
        let seq = self.wait_seq.fetch_add(1, Ordering::AcqRel) + 1;
        self.wait_cell
            .store((seq << 8) | WAIT_PENDING, Ordering::Release);
        seq
    }

    /// Resolve the wait opened with `seq`. Returns false if this wait was
    /// already resolved or superseded (stale waiter entry).
    pub fn resolve_wait(&self, seq: u64, reason: WakeReason) -> bool {
        let code = match reason {
            WakeReason::Aborted => WAIT_ABORTED,
            WakeReason::TimedOut => WAIT_TIMED_OUT,
            WakeReason::Signaled(i) => WAIT_SIGNALED_BASE + i as u64,
        };
        self.wait_cell
            .compare_exchange(
                (seq << 8) | WAIT_PENDING,
                (seq << 8) | code,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn wait_outcome(&self, seq: u64) -> Option<WakeReason> {
        let cell = self.wait_cell.load(Ordering::Acquire);
        if cell >> 8 != seq {
            return None;
        }
        match cell & 0xff {
            WAIT_PENDING => None,
            WAIT_ABORTED => Some(WakeReason::Aborted),
            WAIT_TIMED_OUT => Some(WakeReason::TimedOut),
            code => Some(WakeReason::Signaled((code - WAIT_SIGNALED_BASE) as usize)),
        }
    }

    pub fn has_signal(&self, signum: u8) -> bool {
        self.signals.load(Ordering::Acquire) & (1u64 << (signum & 63)) != 0
    }
}

/// Post a signal; aborts the thread's wait if it opted into
/// WAKE_ON_SIGNAL, otherwise it is noticed at the next wait boundary.
pub fn post_signal(thr: &Arc<Thread>, signum: u8) {
    thr.signals
        .fetch_or(1u64 << (signum & 63), Ordering::AcqRel);
    if ThreadFlags::from_bits_truncate(thr.flags.load(Ordering::Relaxed))
        .contains(ThreadFlags::WAKE_ON_SIGNAL)
    {
        let seq = thr.wait_seq.load(Ordering::Acquire);
        if thr.resolve_wait(seq, WakeReason::Aborted) {
            unblock(thr);
        }
    }
}

/// Thread currently executing on this CPU.
pub fn current() -> Option<Arc<Thread>> {
    cpu::current_cpu().current_thread()
}

/// Make an initialized thread runnable on its master CPU's queues.
pub fn ready(thr: &Arc<Thread>) {
    thr.set_state(ThreadState::Ready);
    let target = cpu::cpu_by_id(thr.master_cpu()).unwrap_or_else(cpu::current_cpu);
    target.queues.lock().enqueue(thr.clone());
}

/// Move a thread off the run queues onto a waiter list.
pub fn block(thr: &Arc<Thread>, wake_on_signal: bool) {
    if wake_on_signal {
        thr.flags
            .fetch_or(ThreadFlags::WAKE_ON_SIGNAL.bits(), Ordering::Relaxed);
    }
    thr.set_state(ThreadState::Blocked);
    if let Some(cpu) = cpu::cpu_by_id(thr.master_cpu()) {
        cpu.queues.lock().unlink(thr);
    }
}

/// Park the calling thread until its wait cell resolves.
pub fn block_current() {
    if let Some(cur) = current() {
        cur.set_state(ThreadState::Blocked);
        super::reschedule();
    }
    // Host build: the harness thread doubles as the CPU; let peers run.
    #[cfg(not(target_os = "none"))]
    std::thread::yield_now();
    core::hint::spin_loop();
}

/// Wake a blocked thread (wait already resolved by the signaler).
pub fn unblock(thr: &Arc<Thread>) {
    if thr.compare_set_state(ThreadState::Blocked, ThreadState::Ready) {
        thr.apply_io_boost();
        let target = cpu::cpu_by_id(thr.master_cpu()).unwrap_or_else(cpu::current_cpu);
        target.queues.lock().enqueue(thr.clone());
    }
}

/// Terminate the calling thread: mark DEAD, signal joiners, reschedule.
pub fn exit_current() -> ! {
    let cur = current().expect("exit_current outside a thread");
    cur.set_state(ThreadState::Dead);
    if let Some(proc) = cur.process.read().upgrade() {
        proc.on_thread_exit(&cur);
    }
    cur.exit_hdr.signal();
    cpu::current_cpu().set_current(None);
    super::reschedule();
    unreachable!("dead thread rescheduled");
}

/// Non-diverging exit used where the caller is the host test harness
/// rather than a real kernel stack.
pub fn retire(thr: &Arc<Thread>) {
    thr.set_state(ThreadState::Dead);
    if let Some(proc) = thr.process.read().upgrade() {
        proc.on_thread_exit(thr);
    }
    thr.exit_hdr.signal();
}
