//! Architecture abstraction
//!
//! The rest of the kernel sees only this module's surface: the physical
//! direct map, page-table read/modify, TLB shootdown, thread context
//! setup/switch, the per-CPU accessor (via [`crate::sched::cpu`]) and the
//! IRQ plumbing. x86-64 is the implemented architecture; everything
//! target-specific lives under `x86_64/` and privileged instructions are
//! additionally gated on `target_os = "none"` so the full kernel logic
//! builds and runs on the host.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use self::x86_64::{context, mmu, tlb};

pub use context::ThreadContext;

use alloc::sync::Arc;

use crate::sched::thread::Thread;

/// Atomically switch from `prev`'s context to `next`'s.
///
/// # Safety
///
/// Both contexts must have been prepared by
/// [`context::setup_thread_context`]; `prev` must be the executing thread.
#[cfg(target_os = "none")]
pub unsafe fn switch_context(prev: &Arc<Thread>, next: &Arc<Thread>) {
    // The guards cannot stay held across the switch (the new thread
    // resumes in the middle of its own switch frame), so take raw
    // pointers first. Only the scheduling CPU touches either context.
    let prev_ctx: *mut context::ThreadContext = {
        let mut g = prev.context.lock();
        core::ptr::addr_of_mut!(*g)
    };
    let next_ctx: *const context::ThreadContext = {
        let g = next.context.lock();
        core::ptr::addr_of!(*g)
    };
    // SAFETY: forwarded from the caller; pointers outlive the switch
    // because both threads are kept alive by the run-queue references.
    unsafe { context::switch_to(prev_ctx, next_ctx) };
}

/// Host builds never switch register state; the harness thread drives
/// scheduling decisions as data.
///
/// # Safety
///
/// No-op; present so callers compile identically for both targets.
#[cfg(not(target_os = "none"))]
pub unsafe fn switch_context(_prev: &Arc<Thread>, _next: &Arc<Thread>) {}

/// Pause hint for spin loops.
pub fn cpu_relax() {
    core::hint::spin_loop();
}
