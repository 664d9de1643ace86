//! Virtual file system
//!
//! Vnodes, the dirent cache, mounts, file descriptions, the page cache,
//! the TTY subsystem, and the path-level operations the syscall layer
//! exposes. Concrete on-disk file systems are external drivers; the
//! in-tree ramfs is the reference implementation and the boot root.

pub mod dirent;
pub mod fd;
pub mod mount;
pub mod pagecache;
pub mod ramfs;
pub mod tty;
pub mod vnode;

#[cfg(test)]
mod tests;

use alloc::{string::String, sync::Arc};

use dirent::{Dirent, DirentFlags};
use vnode::{Timestamps, Vnode, VnodeData, VnodeType};

use crate::driver::registry::{self, Vdev};
use crate::error::{Result, Status};
use crate::sched::process;

pub const PATH_MAX: usize = 4096;
pub const NAME_MAX: usize = 255;

/// Bring up the VFS: register the boot ramfs, mount it as root, create
/// the standard tree. Idempotent so the host test harness can call it
/// from every test.
pub fn init() -> Result<()> {
    static INIT: spin::Once<()> = spin::Once::new();
    let mut result = Ok(());
    INIT.call_once(|| {
        result = (|| {
            let driver = registry::register_driver("ramfs", ramfs::RamFs::new(), true)?;
            mount::mount_root(driver)?;
            mkdir("/dev", 0o755)?;
            mkdir("/tmp", 0o777)?;
            // `/dev/tty` resolves to the caller's controlling terminal.
            let dev = dirent::lookup("/dev")?;
            let tty_dent = Dirent::new("tty", None);
            tty_dent.set_flag(DirentFlags::CTTY);
            dev.append_child(tty_dent)?;
            Ok(())
        })();
    });
    result
}

fn split_parent(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Status::InvalidArgument);
    }
    match trimmed.rfind('/') {
        Some(0) => Ok(("/", &trimmed[1..])),
        Some(pos) => Ok((&trimmed[..pos], &trimmed[pos + 1..])),
        None => Ok((".", trimmed)),
    }
}

fn writable_dir(path: &str) -> Result<(Arc<Dirent>, Arc<Vnode>)> {
    let dir = dirent::graft(&dirent::lookup(path)?)?;
    let vn = dir.vnode().ok_or(Status::NotFound)?;
    if vn.vtype != VnodeType::Directory {
        return Err(Status::NotADirectory);
    }
    if vn.is_read_only() {
        return Err(Status::ReadOnly);
    }
    Ok((dir, vn))
}

pub fn mkdir(path: &str, mode: u16) -> Result<()> {
    let (dir_path, name) = split_parent(path)?;
    let (_, parent_vn) = writable_dir(dir_path)?;
    let ops = parent_vn.ops()?;
    ops.mk_file(parent_vn.desc, name, VnodeType::Directory, mode)?;
    Ok(())
}

pub fn unlink(path: &str) -> Result<()> {
    let _guard = mount::MOUNT_LOCK.acquire()?;
    let (dir_path, name) = split_parent(path)?;
    let (parent, parent_vn) = writable_dir(dir_path)?;
    let dent = dirent::lookup_at(name, Some(parent.clone()), false)?;
    let vn = dent.vnode().ok_or(Status::NotFound)?;
    if vn.is_mountpoint() {
        return Err(Status::InUse);
    }
    let ops = parent_vn.ops()?;
    ops.remove_file(vn.desc)?;
    let _ = parent.remove_child(&dent.name.read().clone());
    Ok(())
}

pub fn rename(from: &str, to: &str) -> Result<()> {
    let _guard = mount::MOUNT_LOCK.acquire()?;
    let (from_dir_path, _) = split_parent(from)?;
    let (to_dir_path, to_name) = split_parent(to)?;
    let (from_dir, from_dir_vn) = writable_dir(from_dir_path)?;
    let (to_dir, to_dir_vn) = writable_dir(to_dir_path)?;

    // Cross-mount renames would need a copy; drivers only move within
    // their own tree.
    if *from_dir_vn.mount.read() != *to_dir_vn.mount.read() {
        return Err(Status::InvalidOperation);
    }

    let dent = dirent::lookup_at(from, None, false)?;
    let vn = dent.vnode().ok_or(Status::NotFound)?;
    if vn.is_mountpoint() {
        return Err(Status::InUse);
    }
    let ops = from_dir_vn.ops()?;
    ops.move_desc_to(vn.desc, to_dir_vn.desc, to_name)?;

    let old_name = dent.name.read().clone();
    let _ = from_dir.remove_child(&old_name);
    *dent.name.write() = String::from(to_name);
    to_dir.append_child(dent)?;
    Ok(())
}

pub fn symlink(target: &str, linkpath: &str) -> Result<()> {
    let (dir_path, name) = split_parent(linkpath)?;
    let (_, parent_vn) = writable_dir(dir_path)?;
    let ops = parent_vn.ops()?;
    let desc = ops.mk_file(parent_vn.desc, name, VnodeType::Symlink, 0o777)?;
    ops.set_linked_path(desc, target)
}

pub fn readlink(path: &str) -> Result<String> {
    let dent = dirent::lookup_at(path, None, false)?;
    let vn = dent.vnode().ok_or(Status::NotFound)?;
    if vn.vtype != VnodeType::Symlink {
        return Err(Status::InvalidArgument);
    }
    let result = match &*vn.data.read() {
        VnodeData::Link(t) => Ok(t.clone()),
        _ => vn.ops()?.get_linked_path(vn.desc),
    };
    result
}

pub fn chmod(path: &str, mode: u16) -> Result<()> {
    let dent = dirent::lookup(path)?;
    let vn = dent.vnode().ok_or(Status::NotFound)?;
    if vn.is_read_only() {
        return Err(Status::ReadOnly);
    }
    if let Ok(ops) = vn.ops() {
        ops.set_file_perms(vn.desc, mode)?;
    }
    vn.attr.write().mode = mode;
    Ok(())
}

pub fn chown(path: &str, uid: u32, gid: u32) -> Result<()> {
    let dent = dirent::lookup(path)?;
    let vn = dent.vnode().ok_or(Status::NotFound)?;
    if vn.is_read_only() {
        return Err(Status::ReadOnly);
    }
    let mut attr = vn.attr.write();
    attr.uid = uid;
    attr.gid = gid;
    Ok(())
}

/// stat(2)-shaped snapshot.
#[derive(Debug, Clone)]
pub struct Stat {
    pub vtype: VnodeType,
    pub size: u64,
    pub blk_size: usize,
    pub inode: u64,
    pub uid: u32,
    pub gid: u32,
    pub mode: u16,
    pub times: Timestamps,
    pub nlink: u32,
}

pub fn stat(path: &str) -> Result<Stat> {
    let dent = dirent::lookup(path)?;
    let vn = dent.vnode().ok_or(Status::NotFound)?;
    let attr = vn.attr.read();
    Ok(Stat {
        vtype: vn.vtype,
        size: attr.size,
        blk_size: attr.blk_size,
        inode: attr.inode,
        uid: attr.uid,
        gid: attr.gid,
        mode: attr.mode,
        times: attr.times,
        nlink: 1,
    })
}

/// access(2): check against the caller's effective credentials.
pub fn check_access(path: &str, read: bool, write: bool, exec: bool) -> Result<()> {
    let dent = dirent::lookup(path)?;
    let vn = dent.vnode().ok_or(Status::NotFound)?;
    let creds = process::current()
        .map(|p| p.creds.read().clone())
        .unwrap_or_else(process::Credentials::root);
    fd::access(&vn, &creds, read, write, exec)
}

pub fn chdir(path: &str) -> Result<()> {
    let dent = dirent::lookup(path)?;
    let grafted = dirent::graft(&dent)?;
    let vn = grafted.vnode().ok_or(Status::NotFound)?;
    if vn.vtype != VnodeType::Directory {
        return Err(Status::NotADirectory);
    }
    let proc = process::current().ok_or(Status::InvalidOperation)?;
    let mut cwd = proc.cwd.lock();
    cwd.path = dirent::dirent_path(&dent);
    cwd.dent = Some(dent);
    Ok(())
}

pub fn getcwd() -> Result<String> {
    let proc = process::current().ok_or(Status::InvalidOperation)?;
    let path = proc.cwd.lock().path.clone();
    Ok(path)
}

/// Register a device node under `/dev`.
pub fn register_device(name: &str, vtype: VnodeType, vdev: Arc<Vdev>) -> Result<Arc<Vnode>> {
    if !matches!(vtype, VnodeType::CharDev | VnodeType::BlockDev) {
        return Err(Status::InvalidArgument);
    }
    let dev_dir = dirent::lookup("/dev")?;
    let vn = Vnode::new_device(vtype, vdev, vnode::default_attr(vtype, 0, 0o666));
    dev_dir.append_child(Dirent::new(name, Some(vn.clone())))?;
    Ok(vn)
}

/// Register a TTY device (console, PTY subordinate) under `/dev`.
pub fn register_tty(name: &str, tty: Arc<tty::Tty>) -> Result<Arc<Vnode>> {
    let dev_dir = dirent::lookup("/dev")?;
    let vn = Vnode::new(
        VnodeType::CharDev,
        0,
        vnode::default_attr(VnodeType::CharDev, 0, 0o620),
    );
    *vn.data.write() = VnodeData::Tty(tty);
    vn.set_flag(vnode::VnodeFlags::IS_TTY);
    dev_dir.append_child(Dirent::new(name, Some(vn.clone())))?;
    Ok(vn)
}
