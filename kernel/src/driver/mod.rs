//! Driver model
//!
//! Drivers implement the [`DriverOps`] capability trait — the function
//! table of the driver ABI. Optional slots are default methods that
//! report `Unimplemented` (or a benign default), which is the weak-symbol
//! discipline: callers treat that status as "slot absent". Registration
//! produces a [`DriverObject`] carrying a symbol table for inter-driver
//! linkage; file-system-capable drivers additionally join the probe list
//! consulted by mount, in registration order.

pub mod irp;
pub mod registry;

#[cfg(test)]
mod tests;

pub use irp::{Irp, IrpBuffer, IrpOp};
pub use registry::{register_driver, DriverObject, Vdev};

use alloc::{string::String, sync::Arc};

use crate::error::{Result, Status};
use crate::fs::vnode::{Vnode, VnodeType};

/// Directory iteration callback verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterDecision {
    Continue,
    Stop,
}

/// One entry produced by [`DriverOps::list_dir`].
pub struct DirItem {
    pub name: String,
    pub inode: u64,
    pub vtype: VnodeType,
    /// Driver descriptor for the child.
    pub desc: u64,
}

/// Attributes a driver reports for one of its descriptors.
#[derive(Debug, Clone, Copy)]
pub struct DriverVnodeInfo {
    pub vtype: VnodeType,
    pub size: u64,
    pub blk_size: usize,
    pub inode: u64,
    pub uid: u32,
    pub gid: u32,
    /// Unix permission bits (lower 12 bits: rwxrwxrwx + setuid/setgid).
    pub mode: u16,
}

/// File-system-wide information.
#[derive(Debug, Clone, Copy)]
pub struct FsInfo {
    pub block_size: usize,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub max_name_len: usize,
    pub read_only: bool,
}

/// The driver function table.
///
/// `read_sync`/`write_sync` and `submit_irp` are the data plane; the
/// rest is the file-system plane only fs-capable drivers implement.
pub trait DriverOps: Send + Sync {
    fn name(&self) -> &str;

    /// Logical block size; 1 for byte-addressable devices.
    fn get_blk_size(&self, _desc: u64) -> Result<usize> {
        Ok(1)
    }

    /// Device size in blocks.
    fn get_max_blk_count(&self, _desc: u64) -> Result<u64> {
        Err(Status::Unimplemented)
    }

    /// Synchronous read; may block the calling thread.
    fn read_sync(&self, desc: u64, buf: &mut [u8], blk_offset: u64) -> Result<usize>;

    fn write_sync(&self, _desc: u64, _buf: &[u8], _blk_offset: u64) -> Result<usize> {
        Err(Status::ReadOnly)
    }

    /// Size of the argument blob `request` takes, so the syscall layer
    /// can copy it in safely before dispatch.
    fn ioctl_argp_size(&self, _request: u32) -> Result<usize> {
        Err(Status::InvalidIoctl)
    }

    fn ioctl(&self, _desc: u64, _request: u32, _arg: &mut [u8]) -> Result<usize> {
        Err(Status::InvalidIoctl)
    }

    /// Start an asynchronous operation. Either the IRP completes during
    /// submit (no event, no callback), or the driver installs both an
    /// event and a completion callback and the submitter waits.
    fn submit_irp(&self, irp: &Arc<Irp>) -> Result<()>;

    /// Called exactly once per IRP after all waiting is over.
    fn finalize_irp(&self, _irp: &Arc<Irp>) -> Result<()> {
        Ok(())
    }

    // --- file-system plane ---

    /// Whether this driver claims the file system on `dev`.
    fn probe(&self, _dev: &Arc<Vnode>) -> bool {
        false
    }

    /// Descriptor of the root directory after a successful probe.
    fn root_desc(&self, _dev: Option<&Arc<Vnode>>) -> Result<u64> {
        Err(Status::Unimplemented)
    }

    /// Resolve one path component inside `parent_desc`.
    fn path_search(&self, _parent_desc: u64, _name: &str) -> Result<u64> {
        Err(Status::NotFound)
    }

    fn list_dir(
        &self,
        _desc: u64,
        _cb: &mut dyn FnMut(&DirItem) -> IterDecision,
    ) -> Result<()> {
        Err(Status::Unimplemented)
    }

    fn mk_file(&self, _parent: u64, _name: &str, _vtype: VnodeType, _mode: u16) -> Result<u64> {
        Err(Status::ReadOnly)
    }

    fn remove_file(&self, _desc: u64) -> Result<()> {
        Err(Status::ReadOnly)
    }

    fn move_desc_to(&self, _desc: u64, _new_parent: u64, _name: &str) -> Result<()> {
        Err(Status::Unimplemented)
    }

    fn get_file_perms(&self, _desc: u64) -> Result<u16> {
        Err(Status::Unimplemented)
    }

    fn set_file_perms(&self, _desc: u64, _mode: u16) -> Result<()> {
        Err(Status::ReadOnly)
    }

    fn get_file_type(&self, _desc: u64) -> Result<VnodeType> {
        Err(Status::Unimplemented)
    }

    /// Symlink target path for LNK descriptors.
    fn get_linked_path(&self, _desc: u64) -> Result<String> {
        Err(Status::Unimplemented)
    }

    /// Point a fresh LNK descriptor at its target.
    fn set_linked_path(&self, _desc: u64, _target: &str) -> Result<()> {
        Err(Status::ReadOnly)
    }

    fn stat_fs_info(&self) -> Result<FsInfo> {
        Err(Status::Unimplemented)
    }

    /// Full attribute set for a descriptor (vnode construction).
    fn vnode_info(&self, _desc: u64) -> Result<DriverVnodeInfo> {
        Err(Status::Unimplemented)
    }

    /// Name comparator; file systems with case rules override this.
    fn compare_names(&self, a: &str, b: &str) -> bool {
        a == b
    }

    fn is_read_only(&self) -> bool {
        false
    }
}
