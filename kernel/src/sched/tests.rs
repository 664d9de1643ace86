//! Scheduler tests

#![cfg(test)]

use super::*;
use crate::sched::queue::RunQueues;
use crate::sched::thread::Thread;

mod queue_tests {
    use super::*;

    #[test]
    fn picks_highest_priority_first() {
        let mut queues = RunQueues::new();
        let low = Thread::allocate();
        low.set_priority(Priority::Low);
        let high = Thread::allocate();
        high.set_priority(Priority::High);
        queues.enqueue(low.clone());
        queues.enqueue(high.clone());

        let first = queues.pick(0).unwrap();
        assert_eq!(first.tid, high.tid);
        let second = queues.pick(0).unwrap();
        assert_eq!(second.tid, low.tid);
        assert!(queues.pick(0).is_none());
    }

    #[test]
    fn affinity_mask_skips_foreign_cpu() {
        let mut queues = RunQueues::new();
        let pinned = Thread::allocate();
        pinned.set_affinity(1 << 3).unwrap();
        queues.enqueue(pinned.clone());

        assert!(queues.pick(0).is_none());
        let picked = queues.pick(3).unwrap();
        assert_eq!(picked.tid, pinned.tid);
    }

    #[test]
    fn io_boost_promotes_one_level() {
        let thr = Thread::allocate();
        thr.set_priority(Priority::Normal);
        thr.apply_io_boost();
        assert_eq!(thr.effective_priority(), Priority::High);
        thr.decay_boost();
        assert_eq!(thr.effective_priority(), Priority::Normal);
    }

    #[test]
    fn equal_priority_round_robin_makes_progress() {
        // Two threads, same priority, both pinned to CPU 0: over a
        // fixed number of slices neither starves.
        let mut queues = RunQueues::new();
        let a = Thread::allocate();
        let b = Thread::allocate();
        a.set_affinity(1).unwrap();
        b.set_affinity(1).unwrap();
        queues.enqueue(a.clone());
        queues.enqueue(b.clone());

        let mut runs = [0u32; 2];
        for _ in 0..100 {
            let next = queues.pick(0).unwrap();
            if next.tid == a.tid {
                runs[0] += 1;
            } else {
                runs[1] += 1;
            }
            queues.enqueue(next);
        }
        assert!(runs[0] >= 40 && runs[1] >= 40);
    }
}

mod dpc_tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static DPC_RUNS: AtomicUsize = AtomicUsize::new(0);

    fn bump(arg: usize) {
        DPC_RUNS.fetch_add(arg, Ordering::Relaxed);
    }

    #[test]
    fn dpcs_drain_in_order() {
        let cpu = cpu::current_cpu();
        DPC_RUNS.store(0, Ordering::Relaxed);
        dpc::queue_on(cpu, Dpc::new(bump, 1));
        dpc::queue_on(cpu, Dpc::new(bump, 2));
        dpc::drain(cpu);
        assert_eq!(DPC_RUNS.load(Ordering::Relaxed), 3);
        assert!(cpu.dpcs.lock().is_empty());
    }
}

mod thread_tests {
    use super::*;
    use crate::sched::thread::{WakeReason, ThreadState};

    #[test]
    fn wait_cell_resolves_once() {
        let thr = Thread::allocate();
        let seq = thr.begin_wait();
        assert!(thr.wait_outcome(seq).is_none());
        assert!(thr.resolve_wait(seq, WakeReason::Signaled(2)));
        // Second resolution of the same wait must lose.
        assert!(!thr.resolve_wait(seq, WakeReason::Aborted));
        assert_eq!(thr.wait_outcome(seq), Some(WakeReason::Signaled(2)));
    }

    #[test]
    fn stale_seq_cannot_resolve_new_wait() {
        let thr = Thread::allocate();
        let old = thr.begin_wait();
        let new = thr.begin_wait();
        assert!(!thr.resolve_wait(old, WakeReason::Aborted));
        assert!(thr.resolve_wait(new, WakeReason::Signaled(0)));
    }

    #[test]
    fn zero_affinity_is_rejected() {
        let thr = Thread::allocate();
        assert!(thr.set_affinity(0).is_err());
    }

    #[test]
    fn retire_signals_exit_header() {
        let thr = Thread::allocate();
        thread::retire(&thr);
        assert_eq!(thr.state(), ThreadState::Dead);
        assert!(thr.exit_hdr.is_signaled());
    }
}

mod process_tests {
    use super::*;
    use crate::error::Status;
    use crate::sched::process::{self, WaitOptions};

    #[test]
    fn wait_with_wnohang_returns_retry_until_exit() {
        crate::test_support::init();
        let mm = crate::mm::context::MmContext::new(1).unwrap();
        let proc = Process::allocate(mm);
        assert_eq!(
            process::wait_process(&proc, WaitOptions::WNOHANG),
            Err(Status::Retry)
        );
        proc.exit(7);
        let (pid, wstatus) = process::wait_process(&proc, WaitOptions::WNOHANG).unwrap();
        assert_eq!(pid, proc.pid);
        assert_eq!(wstatus, 7 << 8);
    }

    #[test]
    fn continued_wakes_without_reap() {
        crate::test_support::init();
        let mm = crate::mm::context::MmContext::new(1).unwrap();
        let proc = Process::allocate(mm);
        proc.mark_continued();
        let (_, wstatus) =
            process::wait_process(&proc, WaitOptions::WCONTINUED).unwrap();
        assert_eq!(wstatus, process::WSTATUS_CONTINUED);
        assert!(!proc.has_exited());
    }

    #[test]
    fn fork_clones_credentials_and_cwd() {
        let parent_proc = crate::test_support::adopt_process();
        parent_proc.creds.write().uid = 1000;
        parent_proc.cwd.lock().path = alloc::string::String::from("/tmp");
        let mm = crate::mm::context::MmContext::new(0).unwrap();
        let child = Process::fork_from(&parent_proc, mm);
        assert_eq!(child.creds.read().uid, 1000);
        assert_eq!(child.cwd.lock().path, "/tmp");
        crate::test_support::drop_process();
    }
}
