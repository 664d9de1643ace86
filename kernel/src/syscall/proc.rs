//! Process and thread syscalls

use alloc::sync::Arc;

use super::handle::Handle;
use super::current_process;
use crate::arch::context::{setup_thread_context, ThreadContext};
use crate::error::{Result, Status};
use crate::sched::process::{self, WaitOptions};
use crate::sched::queue::Priority;
use crate::sched::thread::{self, Thread};
use crate::sync::wait;

pub(super) fn dispatch(nr: usize, args: [usize; 6]) -> Result<usize> {
    let proc = current_process()?;
    match nr {
        super::SYS_THREAD_CONTEXT_CREATE => {
            // args: entry, arg, user stack base, stack size
            let mut ctx = ThreadContext::empty();
            setup_thread_context(
                &mut ctx,
                args[0],
                args[1],
                true,
                args[2],
                args[3],
                proc.mm.page_table_root(),
            );
            let thr = Thread::allocate();
            *thr.context.lock() = ctx;
            Ok(proc.handles.lock().insert(Handle::Thread(thr)) as usize)
        }
        super::SYS_THREAD_CREATE => {
            let thr = proc.handles.lock().thread(args[0] as u32)?;
            let priority = Priority::from_raw(args[1] as u8);
            let affinity = if args[2] == 0 { !0u64 } else { args[2] as u64 };
            let ctx = thr.context.lock().clone();
            thr.initialize(priority, affinity, ctx)?;
            proc.append_thread(thr);
            Ok(0)
        }
        super::SYS_THREAD_READY => {
            let thr = proc.handles.lock().thread(args[0] as u32)?;
            thread::ready(&thr);
            Ok(0)
        }
        super::SYS_THREAD_BLOCK => {
            let thr = proc.handles.lock().thread(args[0] as u32)?;
            thread::block(&thr, args[1] != 0);
            Ok(0)
        }
        super::SYS_THREAD_GET_PRIORITY => {
            let thr = proc.handles.lock().thread(args[0] as u32)?;
            Ok(thr.priority() as usize)
        }
        super::SYS_THREAD_SET_PRIORITY => {
            let thr = proc.handles.lock().thread(args[0] as u32)?;
            thr.set_priority(Priority::from_raw(args[1] as u8));
            Ok(0)
        }
        super::SYS_THREAD_GET_AFFINITY => {
            let thr = proc.handles.lock().thread(args[0] as u32)?;
            Ok(thr.affinity() as usize)
        }
        super::SYS_THREAD_SET_AFFINITY => {
            let thr = proc.handles.lock().thread(args[0] as u32)?;
            thr.set_affinity(args[1] as u64)?;
            Ok(0)
        }
        super::SYS_PROCESS_OPEN => {
            let target = process::by_pid(args[0] as u32)?;
            // Only the parent chain may open a process handle.
            let allowed = target.ppid() == proc.pid || target.pid == proc.pid;
            if !allowed && proc.creds.read().euid != 0 {
                return Err(Status::AccessDenied);
            }
            Ok(proc.handles.lock().insert(Handle::Process(target)) as usize)
        }
        super::SYS_PROCESS_START => {
            let target = proc.handles.lock().process(args[0] as u32)?;
            let main = proc.handles.lock().thread(args[1] as u32)?;
            target.start(main)?;
            Ok(0)
        }
        super::SYS_PROCESS_GET_STATUS => {
            let target = proc.handles.lock().process(args[0] as u32)?;
            if target.has_exited() {
                Ok(process::encode_exit_status(target.exit_code()) as usize)
            } else {
                Err(Status::Retry)
            }
        }
        super::SYS_PROCESS_GET_PID => Ok(proc.pid as usize),
        super::SYS_PROCESS_GET_PPID => Ok(proc.ppid() as usize),
        super::SYS_WAIT_PROCESS => {
            let target = resolve_wait_target(&proc, args[0] as u32)?;
            let opts = WaitOptions::from_bits_truncate(args[1] as u32);
            let (pid, wstatus) = process::wait_process(&target, opts)?;
            if args[2] != 0 {
                crate::mm::usercopy::copy_to_user(&proc.mm, args[2], &wstatus.to_le_bytes())?;
            }
            Ok(pid as usize)
        }
        super::SYS_WAIT_ON_OBJECT => {
            // Wait on a handle's natural waitable: thread exit or
            // process exit.
            let handles = proc.handles.lock();
            match handles.get(args[0] as u32) {
                Some(Handle::Thread(t)) => {
                    let t = t.clone();
                    drop(handles);
                    wait::wait_on(&t.exit_hdr)?;
                    Ok(0)
                }
                Some(Handle::Process(p)) => {
                    let p = p.clone();
                    drop(handles);
                    wait::wait_on(&p.exited)?;
                    Ok(0)
                }
                Some(_) => Err(Status::InvalidArgument),
                None => Err(Status::NotFound),
            }
        }
        super::SYS_EXIT_PROCESS => {
            proc.exit(args[0] as u32);
            Ok(0)
        }
        _ => Err(Status::Unimplemented),
    }
}

fn resolve_wait_target(
    proc: &Arc<process::Process>,
    handle: u32,
) -> Result<Arc<process::Process>> {
    // Accept either a process handle or a raw child pid.
    if let Ok(target) = proc.handles.lock().process(handle) {
        return Ok(target);
    }
    let target = process::by_pid(handle)?;
    if target.ppid() != proc.pid {
        return Err(Status::AccessDenied);
    }
    Ok(target)
}
