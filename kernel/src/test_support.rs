//! Host test harness support
//!
//! Brings the core up against the simulated physical arena and lets a
//! test adopt a process/thread identity so process-relative paths (cwd,
//! handle tables, credentials) work from the harness thread.

use alloc::sync::Arc;

use crate::mm::context::MmContext;
use crate::sched::cpu;
use crate::sched::process::{Process, PROCESS_TABLE};
use crate::sched::thread::{Thread, ThreadState};

/// Idempotent full bring-up: arena, PMM, VFS, loopback.
pub fn init() {
    crate::mm::init_for_host();
    let _ = crate::init_core();
}

/// Create a process with one running thread and make it current on the
/// calling CPU (i.e. this test thread).
pub fn adopt_process() -> Arc<Process> {
    init();
    let mm = MmContext::new(u32::MAX).expect("test address space");
    let proc = Process::allocate(mm);
    proc.mm.set_owner_pid(proc.pid);
    let thread = Thread::allocate();
    proc.append_thread(thread.clone());
    thread.set_state(ThreadState::Running);
    if let Ok(mut table) = PROCESS_TABLE.lock() {
        table.insert(proc.pid, proc.clone());
    }
    cpu::current_cpu().set_current(Some(thread));
    proc
}

/// Drop the adopted identity again.
pub fn drop_process() {
    cpu::current_cpu().set_current(None);
}
