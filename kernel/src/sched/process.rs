//! Processes
//!
//! The process tree (parent/children), thread membership, credentials,
//! working directory, process group and session, the handle table, and
//! POSIX-style wait semantics. The tree is protected by a global blocking
//! mutex; per-process mutable state sits behind its own locks.

use alloc::{
    collections::BTreeMap,
    string::String,
    sync::{Arc, Weak},
    vec::Vec,
};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::thread::{self, Thread};
use crate::error::{Result, Status};
use crate::fs::dirent::Dirent;
use crate::fs::vnode::Vnode;
use crate::mm::context::MmContext;
use crate::sync::wait::{self, SignalKind, WaitHeader};
use crate::syscall::handle::HandleTable;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitOptions: u32 {
        const WNOHANG = 1 << 0;
        const WUNTRACED = 1 << 1;
        const WCONTINUED = 1 << 3;
    }
}

/// Credential set consulted by the VFS access check.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub egid: u32,
    pub groups: Vec<u32>,
}

impl Credentials {
    pub fn root() -> Self {
        Self {
            uid: 0,
            gid: 0,
            euid: 0,
            egid: 0,
            groups: Vec::new(),
        }
    }

    pub fn in_group(&self, gid: u32) -> bool {
        self.egid == gid || self.groups.contains(&gid)
    }
}

/// Working directory: the cached dirent plus the textual path.
pub struct Cwd {
    pub dent: Option<Arc<Dirent>>,
    pub path: String,
}

static NEXT_PID: AtomicU32 = AtomicU32::new(1);

pub struct Process {
    pub pid: u32,
    pub parent: spin::RwLock<Weak<Process>>,
    pub children: spin::Mutex<Vec<Arc<Process>>>,
    threads: spin::Mutex<Vec<Arc<Thread>>>,
    pub mm: Arc<MmContext>,
    pub handles: spin::Mutex<HandleTable>,
    pub creds: spin::RwLock<Credentials>,
    pub cwd: spin::Mutex<Cwd>,
    pub pgrp: AtomicU32,
    pub session: AtomicU32,
    pub ctty: spin::Mutex<Option<Arc<Vnode>>>,
    exit_code: AtomicU32,
    exited_flag: AtomicBool,
    /// Signals on exit; what `wait_process` blocks on.
    pub exited: WaitHeader,
    /// Signals on SIGCONT delivery; consulted by WCONTINUED waits.
    pub continued: WaitHeader,
}

lazy_static::lazy_static! {
    /// Global process table. The tree structure (parent/children edges)
    /// is mutated only while holding this mutex.
    pub static ref PROCESS_TABLE: crate::sync::Mutex<BTreeMap<u32, Arc<Process>>> =
        crate::sync::Mutex::new(BTreeMap::new());
}

impl Process {
    /// Allocate a process with a fresh address space and empty handle
    /// table. Not visible in the table until `start`.
    pub fn allocate(mm: Arc<MmContext>) -> Arc<Process> {
        let pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
        Arc::new(Process {
            pid,
            parent: spin::RwLock::new(Weak::new()),
            children: spin::Mutex::new(Vec::new()),
            threads: spin::Mutex::new(Vec::new()),
            mm,
            handles: spin::Mutex::new(HandleTable::new()),
            creds: spin::RwLock::new(Credentials::root()),
            cwd: spin::Mutex::new(Cwd {
                dent: None,
                path: String::from("/"),
            }),
            pgrp: AtomicU32::new(pid),
            session: AtomicU32::new(pid),
            ctty: spin::Mutex::new(None),
            exit_code: AtomicU32::new(0),
            exited_flag: AtomicBool::new(false),
            exited: WaitHeader::new(SignalKind::Notification),
            continued: WaitHeader::new(SignalKind::Notification),
        })
    }

    /// Clone for fork: same credentials, cwd, pgrp/session/ctty, and a
    /// duplicated handle table (fresh open-file objects carrying the
    /// parent's current offsets, so later parent closes cannot disturb
    /// the child).
    pub fn fork_from(parent: &Arc<Process>, mm: Arc<MmContext>) -> Arc<Process> {
        let child = Self::allocate(mm);
        *child.creds.write() = parent.creds.read().clone();
        {
            let pcwd = parent.cwd.lock();
            let mut ccwd = child.cwd.lock();
            ccwd.dent = pcwd.dent.clone();
            ccwd.path = pcwd.path.clone();
        }
        child
            .pgrp
            .store(parent.pgrp.load(Ordering::Relaxed), Ordering::Relaxed);
        child
            .session
            .store(parent.session.load(Ordering::Relaxed), Ordering::Relaxed);
        *child.ctty.lock() = parent.ctty.lock().clone();
        *child.handles.lock() = parent.handles.lock().clone_for_fork();
        child
    }

    /// Enter the process into the table and the parent's child list, then
    /// ready its main thread.
    pub fn start(self: &Arc<Process>, main_thread: Arc<Thread>) -> Result<()> {
        self.append_thread(main_thread.clone());
        {
            let mut table = PROCESS_TABLE.lock()?;
            if table.contains_key(&self.pid) {
                return Err(Status::AlreadyInitialized);
            }
            table.insert(self.pid, self.clone());
        }
        if let Some(cur) = current() {
            *self.parent.write() = Arc::downgrade(&cur);
            cur.children.lock().push(self.clone());
        }
        thread::ready(&main_thread);
        Ok(())
    }

    pub fn append_thread(self: &Arc<Process>, thr: Arc<Thread>) {
        *thr.process.write() = Arc::downgrade(self);
        self.threads.lock().push(thr);
    }

    pub fn find_thread(&self, tid: u64) -> Option<Arc<Thread>> {
        self.threads.lock().iter().find(|t| t.tid == tid).cloned()
    }

    pub fn first_thread(&self) -> Option<Arc<Thread>> {
        self.threads.lock().first().cloned()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn ppid(&self) -> u32 {
        self.parent.read().upgrade().map(|p| p.pid).unwrap_or(0)
    }

    pub fn has_exited(&self) -> bool {
        self.exited_flag.load(Ordering::Acquire)
    }

    pub fn exit_code(&self) -> u32 {
        self.exit_code.load(Ordering::Acquire)
    }

    /// Called by a dying thread; the last thread out finishes the exit.
    pub(super) fn on_thread_exit(self: &Arc<Process>, thr: &Arc<Thread>) {
        let mut threads = self.threads.lock();
        threads.retain(|t| t.tid != thr.tid);
        let all_dead = threads
            .iter()
            .all(|t| t.state() == super::thread::ThreadState::Dead);
        drop(threads);
        if all_dead {
            self.finish_exit(self.exit_code.load(Ordering::Acquire));
        }
    }

    /// Terminate the whole process with `code`. Threads still on queues
    /// are retired; their contexts are freed once the last reference
    /// drops.
    pub fn exit(self: &Arc<Process>, code: u32) {
        self.exit_code.store(code, Ordering::Release);
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for t in threads {
            thread::retire(&t);
        }
        self.finish_exit(code);
    }

    fn finish_exit(self: &Arc<Process>, code: u32) {
        self.exit_code.store(code, Ordering::Release);
        if !self.exited_flag.swap(true, Ordering::AcqRel) {
            self.handles.lock().clear();
            self.exited.signal();
        }
    }

    /// Mark the process continued (SIGCONT); wakes WCONTINUED waiters
    /// without making the process reapable.
    pub fn mark_continued(&self) {
        self.continued.signal();
    }
}

/// Process of the thread executing on this CPU.
pub fn current() -> Option<Arc<Process>> {
    thread::current().and_then(|t| t.process.read().upgrade())
}

pub fn by_pid(pid: u32) -> Result<Arc<Process>> {
    PROCESS_TABLE
        .lock()?
        .get(&pid)
        .cloned()
        .ok_or(Status::NotFound)
}

/// Encode a waitpid-style status word for a normal exit.
pub fn encode_exit_status(code: u32) -> u32 {
    (code & 0xff) << 8
}

/// Status word reported for a WCONTINUED wakeup.
pub const WSTATUS_CONTINUED: u32 = 0xffff;

/// POSIX-style wait: blocks until `proc` exits (or, with WCONTINUED, is
/// continued). WNOHANG returns RETRY instead of blocking. On exit the
/// zombie is reaped from the parent's child list and the table.
pub fn wait_process(proc: &Arc<Process>, opts: WaitOptions) -> Result<(u32, u32)> {
    loop {
        if proc.has_exited() {
            reap(proc)?;
            return Ok((proc.pid, encode_exit_status(proc.exit_code())));
        }
        if opts.contains(WaitOptions::WNOHANG) {
            return Err(Status::Retry);
        }
        if opts.contains(WaitOptions::WCONTINUED) {
            let idx = wait::wait_on_many(&[&proc.exited, &proc.continued])?;
            if idx == 1 {
                proc.continued.reset();
                return Ok((proc.pid, WSTATUS_CONTINUED));
            }
        } else {
            wait::wait_on(&proc.exited)?;
        }
    }
}

fn reap(proc: &Arc<Process>) -> Result<()> {
    PROCESS_TABLE.lock()?.remove(&proc.pid);
    if let Some(parent) = proc.parent.read().upgrade() {
        parent.children.lock().retain(|c| c.pid != proc.pid);
    }
    Ok(())
}

/// Deliver a signal to every process in a process group (TTY line
/// discipline uses this for VINTR/VQUIT/VSUSP).
pub fn signal_pgrp(pgid: u32, signum: u8) -> Result<()> {
    let table = PROCESS_TABLE.lock()?;
    for proc in table.values() {
        if proc.pgrp.load(Ordering::Relaxed) == pgid {
            for t in proc.threads.lock().iter() {
                thread::post_signal(t, signum);
            }
        }
    }
    Ok(())
}
