//! System call surface
//!
//! Numbered entry points, argument marshalling through the explicit
//! cross-address-space helpers, and handle-table resolution. Every user
//! pointer is bounded and copied; nothing below this layer ever touches
//! user memory directly. Failures translate to negative errno values at
//! this boundary and nowhere else.

pub mod handle;

mod memory;
mod net;
mod proc;
mod vfs;

#[cfg(test)]
mod tests;

use alloc::sync::Arc;

use crate::error::{Result, Status};
use crate::sched::process::{self, Process};

// --- syscall numbers ---------------------------------------------------
// Process / threading
pub const SYS_THREAD_CONTEXT_CREATE: usize = 0;
pub const SYS_THREAD_CREATE: usize = 1;
pub const SYS_THREAD_READY: usize = 2;
pub const SYS_THREAD_BLOCK: usize = 3;
pub const SYS_THREAD_GET_PRIORITY: usize = 4;
pub const SYS_THREAD_SET_PRIORITY: usize = 5;
pub const SYS_THREAD_GET_AFFINITY: usize = 6;
pub const SYS_THREAD_SET_AFFINITY: usize = 7;
pub const SYS_PROCESS_OPEN: usize = 8;
pub const SYS_PROCESS_START: usize = 9;
pub const SYS_PROCESS_GET_STATUS: usize = 10;
pub const SYS_PROCESS_GET_PID: usize = 11;
pub const SYS_PROCESS_GET_PPID: usize = 12;
pub const SYS_WAIT_PROCESS: usize = 13;
pub const SYS_WAIT_ON_OBJECT: usize = 14;
pub const SYS_EXIT_PROCESS: usize = 15;
// VFS
pub const SYS_OPEN: usize = 32;
pub const SYS_CLOSE: usize = 33;
pub const SYS_READ: usize = 34;
pub const SYS_WRITE: usize = 35;
pub const SYS_SEEK: usize = 36;
pub const SYS_TELL: usize = 37;
pub const SYS_IOCTL: usize = 38;
pub const SYS_STAT: usize = 39;
pub const SYS_MKDIR: usize = 40;
pub const SYS_UNLINK: usize = 41;
pub const SYS_RENAME: usize = 42;
pub const SYS_READLINK: usize = 43;
pub const SYS_SYMLINK: usize = 44;
pub const SYS_CHMOD: usize = 45;
pub const SYS_CHOWN: usize = 46;
pub const SYS_ACCESS: usize = 47;
pub const SYS_DUP: usize = 48;
pub const SYS_DUP2: usize = 49;
pub const SYS_CHDIR: usize = 50;
pub const SYS_FCHDIR: usize = 51;
pub const SYS_GETCWD: usize = 52;
pub const SYS_READ_ENTRIES: usize = 53;
pub const SYS_MOUNT: usize = 54;
pub const SYS_UNMOUNT: usize = 55;
// Sockets
pub const SYS_SOCKET: usize = 64;
pub const SYS_BIND: usize = 65;
pub const SYS_LISTEN: usize = 66;
pub const SYS_ACCEPT: usize = 67;
pub const SYS_CONNECT: usize = 68;
pub const SYS_SENDTO: usize = 69;
pub const SYS_RECVFROM: usize = 70;
pub const SYS_SHUTDOWN: usize = 71;
pub const SYS_SETSOCKOPT: usize = 72;
pub const SYS_GETSOCKOPT: usize = 73;
pub const SYS_GETSOCKNAME: usize = 74;
pub const SYS_GETPEERNAME: usize = 75;
// VMM
pub const SYS_VIRTUAL_ALLOC: usize = 96;
pub const SYS_VIRTUAL_FREE: usize = 97;
pub const SYS_VIRTUAL_PROTECT: usize = 98;
pub const SYS_MAP_VIEW_OF_USER_MEMORY: usize = 99;
// Networking control
pub const SYS_GET_HOSTNAME: usize = 112;
pub const SYS_SET_HOSTNAME: usize = 113;
pub const SYS_INTERFACE_IOCTL: usize = 114;

/// Largest single I/O a syscall will marshal.
pub const IO_MAX: usize = 1 << 20;

pub(crate) fn current_process() -> Result<Arc<Process>> {
    process::current().ok_or(Status::InvalidOperation)
}

/// Top-level dispatch: returns the raw result or the negated errno.
pub fn dispatch(nr: usize, args: [usize; 6]) -> isize {
    let result = match nr {
        SYS_THREAD_CONTEXT_CREATE..=SYS_EXIT_PROCESS => proc::dispatch(nr, args),
        SYS_OPEN..=SYS_UNMOUNT => vfs::dispatch(nr, args),
        SYS_SOCKET..=SYS_GETPEERNAME => net::dispatch_socket(nr, args),
        SYS_VIRTUAL_ALLOC..=SYS_MAP_VIEW_OF_USER_MEMORY => memory::dispatch(nr, args),
        SYS_GET_HOSTNAME..=SYS_INTERFACE_IOCTL => net::dispatch_control(nr, args),
        _ => Err(Status::Unimplemented),
    };
    match result {
        Ok(value) => value as isize,
        Err(status) => -(status.errno() as isize),
    }
}
