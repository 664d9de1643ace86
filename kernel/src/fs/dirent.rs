//! Dirent cache and path resolution
//!
//! The in-memory name tree. Dirents hold strong references to their
//! vnode; the mount that populated a dirent owns it and outlives it.
//! Resolution walks the cache first and asks the owning mount's driver
//! (`path_search`) on a miss, inserting the answer under the parent.
//!
//! Traversal rules: `.` is skipped; `..` moves to the parent and never
//! crosses the global root — from the top of a mount it steps back
//! through the covering dirent; entering a MOUNTPOINT vnode grafts the
//! mounted file system's root; symlinks resolve relative to their
//! parent with a fixed depth bound; a CTTY dirent resolves to the
//! calling session's controlling terminal.

use alloc::{
    string::String,
    sync::{Arc, Weak},
    vec::Vec,
};
use core::sync::atomic::{AtomicU32, Ordering};

use super::vnode::{Vnode, VnodeData, VnodeType};
use crate::error::{Result, Status};

/// Deepest symlink chain resolution will follow.
pub const SYMLOOP_MAX: usize = 8;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DirentFlags: u32 {
        /// Resolves to the calling session's controlling terminal.
        const CTTY = 1 << 0;
        /// PTY subordinate is locked (unlockpt not called yet).
        const PTS_LOCKED = 1 << 1;
        /// Root dirent of a mount.
        const MOUNT_ROOT = 1 << 2;
    }
}

pub struct Dirent {
    pub name: spin::RwLock<String>,
    pub parent: spin::RwLock<Weak<Dirent>>,
    pub children: spin::RwLock<Vec<Arc<Dirent>>>,
    pub vnode: spin::RwLock<Option<Arc<Vnode>>>,
    pub flags: AtomicU32,
}

impl Dirent {
    pub fn new(name: &str, vnode: Option<Arc<Vnode>>) -> Arc<Dirent> {
        Arc::new(Dirent {
            name: spin::RwLock::new(String::from(name)),
            parent: spin::RwLock::new(Weak::new()),
            children: spin::RwLock::new(Vec::new()),
            vnode: spin::RwLock::new(vnode),
            flags: AtomicU32::new(0),
        })
    }

    pub fn flags(&self) -> DirentFlags {
        DirentFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flag(&self, flag: DirentFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    pub fn vnode(&self) -> Option<Arc<Vnode>> {
        self.vnode.read().clone()
    }

    pub fn parent(&self) -> Option<Arc<Dirent>> {
        self.parent.read().upgrade()
    }

    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    /// Link `child` under `self`. Names are unique among siblings.
    pub fn append_child(self: &Arc<Dirent>, child: Arc<Dirent>) -> Result<()> {
        let name = child.name.read().clone();
        let mut children = self.children.write();
        if children.iter().any(|c| *c.name.read() == name) {
            return Err(Status::AlreadyInitialized);
        }
        *child.parent.write() = Arc::downgrade(self);
        children.push(child);
        Ok(())
    }

    pub fn remove_child(self: &Arc<Dirent>, name: &str) -> Result<Arc<Dirent>> {
        let mut children = self.children.write();
        let pos = children
            .iter()
            .position(|c| *c.name.read() == name)
            .ok_or(Status::NotFound)?;
        Ok(children.remove(pos))
    }

    /// Cache-only child search with the driver's comparator.
    pub fn find_child(&self, name: &str, cmp: &dyn Fn(&str, &str) -> bool) -> Option<Arc<Dirent>> {
        self.children
            .read()
            .iter()
            .find(|c| cmp(&c.name.read(), name))
            .cloned()
    }
}

/// Textual absolute path of a dirent; walking up through mount roots
/// continues at the covering dirent so mounted names read naturally.
pub fn dirent_path(dent: &Arc<Dirent>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut cur = dent.clone();
    loop {
        if cur.flags().contains(DirentFlags::MOUNT_ROOT) {
            match covering_dirent(&cur) {
                Some(covering) => {
                    cur = covering;
                    continue;
                }
                None => break, // global root
            }
        }
        let Some(parent) = cur.parent() else { break };
        parts.push(cur.name.read().clone());
        cur = parent;
    }
    if parts.is_empty() {
        return String::from("/");
    }
    let mut path = String::new();
    for part in parts.iter().rev() {
        path.push('/');
        path.push_str(part);
    }
    path
}

/// The dirent a mount root covers (its mountpoint).
fn covering_dirent(mount_root: &Arc<Dirent>) -> Option<Arc<Dirent>> {
    let vn = mount_root.vnode()?;
    let mount = vn.mount()?;
    mount.mountpoint.clone()
}

/// If `dent`'s vnode is covered by a mount, the mounted root; otherwise
/// `dent` itself.
pub fn graft(dent: &Arc<Dirent>) -> Result<Arc<Dirent>> {
    let Some(vn) = dent.vnode() else {
        return Ok(dent.clone());
    };
    if !vn.is_mountpoint() {
        return Ok(dent.clone());
    }
    let result = match &*vn.data.read() {
        VnodeData::MountedOn(idx) => {
            let mount = super::mount::mount_by_id(*idx).ok_or(Status::Internal)?;
            Ok(mount.root.clone())
        }
        _ => Err(Status::Internal),
    };
    result
}

/// Ask the driver for `name` inside the (grafted) directory `dir` and
/// cache the answer.
fn search_uncached(dir: &Arc<Dirent>, name: &str) -> Result<Arc<Dirent>> {
    let dir_vn = dir.vnode().ok_or(Status::NotFound)?;
    let ops = dir_vn.ops()?;
    let desc = ops.path_search(dir_vn.desc, name)?;
    let info = ops.vnode_info(desc)?;
    let vn = Vnode::new(
        info.vtype,
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
    *vn.mount.write() = *dir_vn.mount.read();
    if info.vtype == VnodeType::Symlink {
        if let Ok(target) = ops.get_linked_path(desc) {
            *vn.data.write() = VnodeData::Link(target);
        }
    }
    let child = Dirent::new(name, Some(vn));
    dir.append_child(child.clone())?;
    Ok(child)
}

/// Resolve one component inside `dir`, consulting the cache first.
fn resolve_component(dir: &Arc<Dirent>, name: &str) -> Result<Arc<Dirent>> {
    let dir_vn = dir.vnode().ok_or(Status::NotFound)?;
    let ops = dir_vn.ops()?;
    if let Some(hit) = dir.find_child(name, &|a, b| ops.compare_names(a, b)) {
        return Ok(hit);
    }
    search_uncached(dir, name)
}

/// Controlling terminal of the calling session, as a detached dirent.
fn resolve_ctty() -> Result<Arc<Dirent>> {
    let proc = crate::sched::process::current().ok_or(Status::NotFound)?;
    let ctty = proc.ctty.lock().clone().ok_or(Status::NotFound)?;
    Ok(Dirent::new("tty", Some(ctty)))
}

/// Resolve `path` starting at `start` (or the calling process's cwd, or
/// the global root for absolute paths). `follow_last` controls symlink
/// traversal of the final component.
pub fn lookup_at(
    path: &str,
    start: Option<Arc<Dirent>>,
    follow_last: bool,
) -> Result<Arc<Dirent>> {
    resolve(path, start, follow_last, 0)
}

pub fn lookup(path: &str) -> Result<Arc<Dirent>> {
    lookup_at(path, None, true)
}

fn resolve(
    path: &str,
    start: Option<Arc<Dirent>>,
    follow_last: bool,
    depth: usize,
) -> Result<Arc<Dirent>> {
    if depth > SYMLOOP_MAX {
        return Err(Status::SymlinkLoop);
    }
    if path.is_empty() {
        return Err(Status::InvalidArgument);
    }

    let root = super::mount::root_dirent()?;
    let mut cur = if path.starts_with('/') {
        root.clone()
    } else {
        match start {
            Some(s) => s,
            None => crate::sched::process::current()
                .and_then(|p| p.cwd.lock().dent.clone())
                .unwrap_or_else(|| root.clone()),
        }
    };

    // A component is the bytes up to the next '/' or the end of the
    // string; empty components (doubled slashes, trailing slash) are
    // skipped rather than treated as zero-length names.
    let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();

    while let Some(component) = components.next() {
        let last = components.peek().is_none();

        if component == "." {
            continue;
        }
        if component == ".." {
            // Step out of a mount before going up, so the parent is the
            // covering file system's directory, never the mount's root
            // again.
            if cur.flags().contains(DirentFlags::MOUNT_ROOT) {
                if let Some(covering) = covering_dirent(&cur) {
                    cur = covering;
                }
            }
            if let Some(parent) = cur.parent() {
                cur = parent;
            }
            continue;
        }

        let dir = graft(&cur)?;
        let dir_vn = dir.vnode().ok_or(Status::NotFound)?;
        if dir_vn.vtype != VnodeType::Directory {
            return Err(Status::NotADirectory);
        }

        let child = resolve_component(&dir, component)?;

        if child.flags().contains(DirentFlags::CTTY) {
            return resolve_ctty();
        }

        let child_vn = child.vnode().ok_or(Status::NotFound)?;
        if child_vn.vtype == VnodeType::Symlink && (!last || follow_last) {
            let target = match &*child_vn.data.read() {
                VnodeData::Link(t) => t.clone(),
                _ => child_vn.ops()?.get_linked_path(child_vn.desc)?,
            };
            cur = resolve(&target, Some(dir.clone()), true, depth + 1)?;
            continue;
        }

        cur = child;
    }

    Ok(cur)
}
