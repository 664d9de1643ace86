//! Scheduler
//!
//! Per-CPU priority run queues with affinity masks, DPC queues drained at
//! DISPATCH, voluntary yield and timer-tick preemption, and the thread /
//! process primitives the rest of the kernel blocks through.

pub mod cpu;
pub mod dpc;
pub mod process;
pub mod queue;
pub mod thread;

pub use dpc::Dpc;
pub use process::Process;
pub use queue::Priority;
pub use thread::{Thread, ThreadState};

use crate::sync::irql::{self, Irql};

/// Select and dispatch the next thread on the current CPU.
///
/// Runs pending DPCs first, re-queues the outgoing thread if it is still
/// runnable, then picks the highest-priority ready thread whose affinity
/// admits this CPU. On bare metal the call switches contexts and returns
/// when this thread is next scheduled; on the host it performs the
/// bookkeeping only (the test harness drives progress).
pub fn reschedule() {
    let cpu = cpu::current_cpu();

    {
        let _dispatch = irql::raise_to_at_least(Irql::Dispatch);
        dpc::drain(cpu);
    }

    let prev = cpu.take_current();
    if let Some(ref p) = prev {
        if p.state() == ThreadState::Running {
            p.set_state(ThreadState::Ready);
            cpu.queues.lock().enqueue(p.clone());
        }
    }

    let next = cpu.queues.lock().pick(cpu.id());
    match next {
        Some(n) => {
            n.set_state(ThreadState::Running);
            n.set_master_cpu(cpu.id());
            cpu.set_current(Some(n.clone()));
            #[cfg(target_os = "none")]
            if let Some(p) = prev {
                if !core::ptr::eq(&*p, &*n) {
                    // SAFETY: both contexts were set up by
                    // setup_thread_context and the previous thread is no
                    // longer marked running on any other CPU.
                    unsafe { crate::arch::switch_context(&p, &n) };
                }
            }
        }
        None => {
            // Nothing runnable; leave the CPU idle. A blocked outgoing
            // thread stays off the queues until something wakes it.
            if let Some(p) = prev {
                if p.state() == ThreadState::Running {
                    cpu.set_current(Some(p));
                }
            }
        }
    }
}

/// Voluntary yield from the current thread.
pub fn yield_now() {
    reschedule();
}

/// Timer tick entry: decay I/O boosts and preempt.
pub fn tick() {
    if let Some(cur) = thread::current() {
        cur.decay_boost();
    }
    reschedule();
}

#[cfg(test)]
mod tests;
