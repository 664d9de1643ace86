//! Kernel status codes
//!
//! Every fallible kernel API returns [`Status`] through the [`Result`]
//! alias; `Ok` is the SUCCESS case. Drivers and core subsystems share one
//! enumeration so that statuses cross the driver boundary unchanged.

use core::fmt;

/// Kernel-wide status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "status codes must be handled, not silently discarded"]
pub enum Status {
    InvalidArgument,
    NotFound,
    AlreadyInitialized,
    AccessDenied,
    NoSpace,
    OutOfMemory,
    ReadOnly,
    WouldBlock,
    TimedOut,
    Aborted,
    PageFault,
    Unimplemented,
    Internal,
    /// Caller should retry the whole operation (e.g. WNOHANG wait on a
    /// still-running child).
    Retry,
    Eof,
    InUse,
    InvalidIoctl,
    InvalidOperation,
    InvalidInitPhase,
    /// Driver-private: an IRP completion callback wants another wait
    /// cycle. Consumed by the IRP wait loop, never surfaced to callers.
    IrpRetry,
    NotADirectory,
    IsADirectory,
    NotAMountpoint,
    SymlinkLoop,
    // Network statuses
    HostUnreachable,
    PortUnreachable,
    NetDown,
    AddressInUse,
    NotConnected,
    AlreadyConnected,
    ConnectionRefused,
    ConnectionReset,
    MessageTooLarge,
    PortExhausted,
}

/// Result type alias for kernel operations.
pub type Result<T> = core::result::Result<T, Status>;

impl Status {
    /// Translate to the POSIX errno equivalent for the syscall boundary.
    pub fn errno(self) -> i32 {
        match self {
            Status::InvalidArgument => 22,   // EINVAL
            Status::NotFound => 2,           // ENOENT
            Status::AlreadyInitialized => 17, // EEXIST
            Status::AccessDenied => 13,      // EACCES
            Status::NoSpace => 28,           // ENOSPC
            Status::OutOfMemory => 12,       // ENOMEM
            Status::ReadOnly => 30,          // EROFS
            Status::WouldBlock | Status::Retry => 11, // EAGAIN
            Status::TimedOut => 110,         // ETIMEDOUT
            Status::Aborted => 4,            // EINTR
            Status::PageFault => 14,         // EFAULT
            Status::Unimplemented => 38,     // ENOSYS
            Status::Eof => 0,
            Status::InUse => 16,             // EBUSY
            Status::InvalidIoctl => 25,      // ENOTTY
            Status::InvalidOperation => 95,  // EOPNOTSUPP
            Status::NotADirectory => 20,     // ENOTDIR
            Status::IsADirectory => 21,      // EISDIR
            Status::NotAMountpoint => 22,    // EINVAL
            Status::SymlinkLoop => 40,       // ELOOP
            Status::HostUnreachable => 113,  // EHOSTUNREACH
            Status::PortUnreachable => 111,  // ECONNREFUSED
            Status::NetDown => 100,          // ENETDOWN
            Status::AddressInUse => 98,      // EADDRINUSE
            Status::NotConnected => 107,     // ENOTCONN
            Status::AlreadyConnected => 106, // EISCONN
            Status::ConnectionRefused => 111, // ECONNREFUSED
            Status::ConnectionReset => 104,  // ECONNRESET
            Status::MessageTooLarge => 90,   // EMSGSIZE
            Status::PortExhausted => 98,     // EADDRINUSE
            Status::Internal | Status::InvalidInitPhase | Status::IrpRetry => 5, // EIO
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Status::InvalidArgument => "invalid argument",
            Status::NotFound => "not found",
            Status::AlreadyInitialized => "already initialized",
            Status::AccessDenied => "access denied",
            Status::NoSpace => "no space left on device",
            Status::OutOfMemory => "out of memory",
            Status::ReadOnly => "read-only file system",
            Status::WouldBlock => "operation would block",
            Status::TimedOut => "timed out",
            Status::Aborted => "wait aborted",
            Status::PageFault => "page fault",
            Status::Unimplemented => "unimplemented",
            Status::Internal => "internal error",
            Status::Retry => "retry",
            Status::Eof => "end of file",
            Status::InUse => "resource in use",
            Status::InvalidIoctl => "invalid ioctl request",
            Status::InvalidOperation => "invalid operation",
            Status::InvalidInitPhase => "wrong init phase",
            Status::IrpRetry => "irp retry requested",
            Status::NotADirectory => "not a directory",
            Status::IsADirectory => "is a directory",
            Status::NotAMountpoint => "not a mountpoint",
            Status::SymlinkLoop => "too many levels of symbolic links",
            Status::HostUnreachable => "host unreachable",
            Status::PortUnreachable => "port unreachable",
            Status::NetDown => "network is down",
            Status::AddressInUse => "address in use",
            Status::NotConnected => "socket not connected",
            Status::AlreadyConnected => "socket already connected",
            Status::ConnectionRefused => "connection refused",
            Status::ConnectionReset => "connection reset",
            Status::MessageTooLarge => "message too large",
            Status::PortExhausted => "ephemeral ports exhausted",
        };
        f.write_str(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_covers_common_codes() {
        assert_eq!(Status::NotFound.errno(), 2);
        assert_eq!(Status::AccessDenied.errno(), 13);
        assert_eq!(Status::WouldBlock.errno(), 11);
        assert_eq!(Status::PageFault.errno(), 14);
    }
}
