//! Vnodes
//!
//! The in-core inode. A vnode belongs to a mount (referenced by table
//! index, never by pointer — the mount owns the dirent tree, dirents own
//! vnodes, and the index breaks the cycle) and is operated on through its
//! driver's function table. Devices, mountpoints, symlink targets,
//! sockets and TTYs hang off the data union.

use alloc::{
    string::String,
    sync::{Arc, Weak},
    vec::Vec,
};
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::pagecache::PageCache;
use crate::driver::registry::Vdev;
use crate::driver::DriverOps;
use crate::error::{Result, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeType {
    Regular,
    Directory,
    Symlink,
    CharDev,
    BlockDev,
    Fifo,
    Socket,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VnodeFlags: u32 {
        /// A file system is mounted on this vnode.
        const MOUNTPOINT = 1 << 0;
        const IS_TTY = 1 << 1;
        /// The owning driver went away; all operations fail.
        const DRIVER_DEAD = 1 << 2;
        /// Event-style device: readiness only, no data plane.
        const EVENT_DEV = 1 << 3;
    }
}

/// Mode bits beyond the rwx triads.
pub const MODE_SETUID: u16 = 0o4000;
pub const MODE_SETGID: u16 = 0o2000;

#[derive(Debug, Clone, Copy)]
pub struct Timestamps {
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub birth: u64,
}

impl Timestamps {
    pub const fn zero() -> Self {
        Self {
            atime: 0,
            mtime: 0,
            ctime: 0,
            birth: 0,
        }
    }
}

/// Mutable attribute block.
#[derive(Debug, Clone)]
pub struct VnodeAttr {
    pub size: u64,
    pub blk_size: usize,
    pub inode: u64,
    pub uid: u32,
    pub gid: u32,
    pub mode: u16,
    pub times: Timestamps,
}

/// Type-specific payload.
pub enum VnodeData {
    None,
    /// Char/block device instance.
    Device(Arc<Vdev>),
    /// A mount covers this vnode; index into the mount table.
    MountedOn(usize),
    /// Symlink target path.
    Link(String),
    /// Socket state (see `net::socket`).
    Socket(Arc<crate::net::socket::SocketState>),
    /// TTY line discipline state.
    Tty(Arc<super::tty::Tty>),
}

pub struct Vnode {
    pub vtype: VnodeType,
    /// Driver descriptor; opaque to the VFS.
    pub desc: u64,
    /// Index of the owning mount in the mount table.
    pub mount: spin::RwLock<Option<usize>>,
    pub flags: AtomicU32,
    pub attr: spin::RwLock<VnodeAttr>,
    pub data: spin::RwLock<VnodeData>,
    /// Open file descriptions referencing this vnode.
    pub open_files: spin::Mutex<Vec<Weak<super::fd::OpenFile>>>,
    refcount: AtomicU64,
    pub pagecache: Arc<PageCache>,
}

impl Vnode {
    pub fn new(vtype: VnodeType, desc: u64, attr: VnodeAttr) -> Arc<Vnode> {
        let vn = Arc::new(Vnode {
            vtype,
            desc,
            mount: spin::RwLock::new(None),
            flags: AtomicU32::new(0),
            attr: spin::RwLock::new(attr),
            data: spin::RwLock::new(VnodeData::None),
            open_files: spin::Mutex::new(Vec::new()),
            refcount: AtomicU64::new(1),
            pagecache: PageCache::new(),
        });
        vn.pagecache.attach(&vn);
        vn
    }

    pub fn new_device(vtype: VnodeType, vdev: Arc<Vdev>, attr: VnodeAttr) -> Arc<Vnode> {
        let vn = Self::new(vtype, vdev.desc, attr);
        *vn.data.write() = VnodeData::Device(vdev);
        vn
    }

    pub fn flags(&self) -> VnodeFlags {
        VnodeFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flag(&self, flag: VnodeFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    pub fn clear_flag(&self, flag: VnodeFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
    }

    pub fn is_mountpoint(&self) -> bool {
        self.flags().contains(VnodeFlags::MOUNTPOINT)
    }

    pub fn size(&self) -> u64 {
        self.attr.read().size
    }

    pub fn set_size(&self, size: u64) {
        self.attr.write().size = size;
    }

    pub fn reference(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unreference(&self) -> u64 {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// The driver servicing this vnode: the device driver for device
    /// nodes, otherwise the owning mount's file-system driver.
    pub fn ops(&self) -> Result<Arc<dyn DriverOps>> {
        if self.flags().contains(VnodeFlags::DRIVER_DEAD) {
            return Err(Status::InvalidOperation);
        }
        if let VnodeData::Device(vdev) = &*self.data.read() {
            return Ok(vdev.driver.ops.clone());
        }
        let mount_idx = self.mount.read().ok_or(Status::InvalidOperation)?;
        let mount = super::mount::mount_by_id(mount_idx).ok_or(Status::InvalidOperation)?;
        Ok(mount.driver.ops.clone())
    }

    /// Mount this vnode belongs to.
    pub fn mount(&self) -> Option<Arc<super::mount::Mount>> {
        let idx = (*self.mount.read())?;
        super::mount::mount_by_id(idx)
    }

    /// Whether writes are categorically refused (read-only mount or
    /// read-only driver).
    pub fn is_read_only(&self) -> bool {
        if let Some(mount) = self.mount() {
            if mount.read_only {
                return true;
            }
        }
        self.ops().map(|ops| ops.is_read_only()).unwrap_or(false)
    }
}

/// Default attributes for a fresh node.
pub fn default_attr(vtype: VnodeType, inode: u64, mode: u16) -> VnodeAttr {
    VnodeAttr {
        size: 0,
        blk_size: 1,
        inode,
        uid: 0,
        gid: 0,
        mode: if vtype == VnodeType::Directory {
            mode | 0o111
        } else {
            mode
        },
        times: Timestamps::zero(),
    }
}
