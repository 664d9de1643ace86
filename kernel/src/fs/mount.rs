//! Mount table
//!
//! A mount binds a device vnode to a subtree of the namespace through a
//! file-system driver. The mount owns every dirent populated under its
//! root; structural changes to the tree (mount, unmount, rename across
//! directories) serialize on the reentrant mount lock.

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::dirent::{Dirent, DirentFlags};
use super::vnode::{Vnode, VnodeData, VnodeType};
use crate::driver::registry::{self, DriverObject};
use crate::error::{Result, Status};
use crate::sync::wait::{self, SignalKind, WaitHeader};

/// Reentrant lock: the owning thread may re-acquire freely. Serializes
/// namespace structure changes, where rename and mount paths nest
/// resolution inside mutation.
pub struct ReentrantLock {
    owner: AtomicU64,
    depth: AtomicUsize,
    hdr: WaitHeader,
}

impl ReentrantLock {
    pub const fn new() -> Self {
        Self {
            owner: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
            hdr: WaitHeader::new(SignalKind::Synchronization),
        }
    }

    pub fn acquire(&self) -> Result<ReentrantGuard<'_>> {
        // Thread id, or a per-CPU sentinel when no thread context exists
        // (boot, host test harness) so distinct callers never alias.
        let me = crate::sched::thread::current()
            .map(|t| t.tid)
            .unwrap_or_else(|| u64::MAX - crate::sched::cpu::current_cpu().id() as u64);
        loop {
            let owner = self.owner.load(Ordering::Acquire);
            if owner == me {
                self.depth.fetch_add(1, Ordering::Relaxed);
                return Ok(ReentrantGuard { lock: self });
            }
            if owner == 0
                && self
                    .owner
                    .compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                self.depth.store(1, Ordering::Relaxed);
                return Ok(ReentrantGuard { lock: self });
            }
            wait::wait_on(&self.hdr)?;
        }
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ReentrantGuard<'a> {
    lock: &'a ReentrantLock,
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        if self.lock.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.lock.owner.store(0, Ordering::Release);
            self.lock.hdr.signal();
        }
    }
}

pub struct Mount {
    pub id: usize,
    /// Root dirent of the mounted file system; the mount owns the whole
    /// dirent subtree below it.
    pub root: Arc<Dirent>,
    /// Dirent this mount covers; `None` for the root mount.
    pub mountpoint: Option<Arc<Dirent>>,
    pub device: Option<Arc<Vnode>>,
    pub driver: Arc<DriverObject>,
    pub read_only: bool,
}

lazy_static::lazy_static! {
    static ref MOUNTS: spin::RwLock<Vec<Option<Arc<Mount>>>> = spin::RwLock::new(Vec::new());
    /// Serializes mount/unmount/rename against resolution-driven cache
    /// population.
    pub static ref MOUNT_LOCK: ReentrantLock = ReentrantLock::new();
}

pub fn mount_by_id(id: usize) -> Option<Arc<Mount>> {
    MOUNTS.read().get(id).and_then(|m| m.clone())
}

/// Root dirent of the namespace (the root mount's root).
pub fn root_dirent() -> Result<Arc<Dirent>> {
    mount_by_id(0).map(|m| m.root.clone()).ok_or(Status::InvalidInitPhase)
}

fn build_root(driver: &Arc<DriverObject>, device: Option<&Arc<Vnode>>, id: usize) -> Result<Arc<Dirent>> {
    let ops = &driver.ops;
    let desc = ops.root_desc(device)?;
    let info = ops.vnode_info(desc)?;
    if info.vtype != VnodeType::Directory {
        return Err(Status::NotADirectory);
    }
    let vn = Vnode::new(
        VnodeType::Directory,
        desc,
        super::vnode::VnodeAttr {
            size: info.size,
            blk_size: info.blk_size,
            inode: info.inode,
            uid: info.uid,
            gid: info.gid,
            mode: info.mode,
            times: super::vnode::Timestamps::zero(),
        },
    );
    *vn.mount.write() = Some(id);
    let root = Dirent::new("", Some(vn));
    root.set_flag(DirentFlags::MOUNT_ROOT);
    Ok(root)
}

fn probe_driver(device: Option<&Arc<Vnode>>) -> Result<Arc<DriverObject>> {
    for driver in registry::fs_drivers() {
        let claimed = match device {
            Some(dev) => driver.ops.probe(dev),
            // Device-less file systems (ramfs) claim a missing device.
            None => driver.ops.root_desc(None).is_ok(),
        };
        if claimed {
            return Ok(driver);
        }
    }
    Err(Status::NotFound)
}

fn insert_mount(
    mountpoint: Option<Arc<Dirent>>,
    device: Option<Arc<Vnode>>,
    driver: Arc<DriverObject>,
) -> Result<Arc<Mount>> {
    let mut mounts = MOUNTS.write();
    let id = mounts.len();
    let root = build_root(&driver, device.as_ref(), id)?;
    let read_only = driver.ops.is_read_only()
        || driver
            .ops
            .stat_fs_info()
            .map(|i| i.read_only)
            .unwrap_or(false);
    let mount = Arc::new(Mount {
        id,
        root,
        mountpoint,
        device,
        driver,
        read_only,
    });
    mounts.push(Some(mount.clone()));
    Ok(mount)
}

/// Mount the root file system. Must happen before any resolution.
pub fn mount_root(driver: Arc<DriverObject>) -> Result<Arc<Mount>> {
    let _guard = MOUNT_LOCK.acquire()?;
    if !MOUNTS.read().is_empty() {
        return Err(Status::AlreadyInitialized);
    }
    insert_mount(None, None, driver)
}

/// Mount a file system at `at_path`.
///
/// The path must resolve to a directory that is not already a
/// mountpoint. With no explicit driver, the FS-probe list is walked in
/// registration order and the first driver to claim the device wins.
pub fn mount(
    at_path: &str,
    device: Option<Arc<Vnode>>,
    driver: Option<Arc<DriverObject>>,
) -> Result<Arc<Mount>> {
    let _guard = MOUNT_LOCK.acquire()?;

    let at = super::dirent::lookup(at_path)?;
    let at_vn = at.vnode().ok_or(Status::NotFound)?;
    if at_vn.vtype != VnodeType::Directory {
        return Err(Status::NotADirectory);
    }
    if at_vn.is_mountpoint() {
        return Err(Status::InUse);
    }

    let driver = match driver {
        Some(d) => d,
        None => probe_driver(device.as_ref())?,
    };

    let mount = insert_mount(Some(at.clone()), device, driver)?;

    // Flag the covered vnode; the dirent subtree beneath it is shadowed
    // from now on (cache invalidation is lazy).
    *at_vn.data.write() = VnodeData::MountedOn(mount.id);
    at_vn.set_flag(super::vnode::VnodeFlags::MOUNTPOINT);
    Ok(mount)
}

/// Unmount the file system covering `at_path`.
pub fn unmount(at_path: &str) -> Result<()> {
    let _guard = MOUNT_LOCK.acquire()?;

    let at = super::dirent::lookup(at_path)?;
    let at_vn = at.vnode().ok_or(Status::NotFound)?;
    if !at_vn.is_mountpoint() {
        return Err(Status::NotAMountpoint);
    }
    let id = match &*at_vn.data.read() {
        VnodeData::MountedOn(id) => *id,
        _ => return Err(Status::Internal),
    };
    if id == 0 {
        return Err(Status::InvalidOperation);
    }
    let mount = mount_by_id(id).ok_or(Status::NotFound)?;

    // Refuse while anything under the mount is still open.
    if dirent_subtree_busy(&mount.root) {
        return Err(Status::InUse);
    }
    flush_subtree(&mount.root)?;

    at_vn.clear_flag(super::vnode::VnodeFlags::MOUNTPOINT);
    *at_vn.data.write() = VnodeData::None;
    MOUNTS.write()[id] = None;
    Ok(())
}

fn dirent_subtree_busy(dent: &Arc<Dirent>) -> bool {
    if let Some(vn) = dent.vnode() {
        let mut open_files = vn.open_files.lock();
        open_files.retain(|w| w.strong_count() > 0);
        if !open_files.is_empty() {
            return true;
        }
    }
    dent.children.read().iter().any(dirent_subtree_busy)
}

fn flush_subtree(dent: &Arc<Dirent>) -> Result<()> {
    if let Some(vn) = dent.vnode() {
        vn.pagecache.flush()?;
        vn.pagecache.invalidate();
    }
    for child in dent.children.read().iter() {
        flush_subtree(child)?;
    }
    Ok(())
}

/// Active mounts, for statfs-style reporting.
pub fn all_mounts() -> Vec<Arc<Mount>> {
    MOUNTS.read().iter().flatten().cloned().collect()
}
