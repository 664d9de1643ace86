//! File descriptors
//!
//! An `OpenFile` is one open description: vnode + offset + open flags.
//! The handle table maps fd numbers to these; fork duplicates the
//! description (fresh object, same vnode, copied offset) so the child's
//! cursor is independent from the moment of the clone.
//!
//! Reads and writes construct IRPs against the vnode's driver — or
//! dispatch into socket/TTY ops for those vnode types. Cached mode routes
//! through the page cache; O_DIRECT-style uncached mode goes straight to
//! the driver.

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use super::dirent::{self, Dirent};
use super::vnode::{Vnode, VnodeData, VnodeType};
use crate::driver::irp::{self, Irp, IrpBuffer, IrpOp};
use crate::error::{Result, Status};
use crate::sched::process::{self, Credentials};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const CREATE = 1 << 2;
        const TRUNCATE = 1 << 3;
        const APPEND = 1 << 4;
        /// Bypass the page cache.
        const UNCACHED = 1 << 5;
        const NONBLOCK = 1 << 6;
        const DIRECTORY = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Set,
    Current,
    End,
}

pub struct OpenFile {
    pub vn: Arc<Vnode>,
    pub dent: Option<Arc<Dirent>>,
    offset: AtomicU64,
    pub flags: OpenFlags,
}

impl OpenFile {
    pub fn new(vn: Arc<Vnode>, dent: Option<Arc<Dirent>>, flags: OpenFlags) -> Arc<OpenFile> {
        let file = Arc::new(OpenFile {
            vn: vn.clone(),
            dent,
            offset: AtomicU64::new(0),
            flags,
        });
        vn.reference();
        vn.open_files.lock().push(Arc::downgrade(&file));
        file
    }

    /// Fork support: same vnode and flags, copied offset, fresh object.
    pub fn duplicate(&self) -> Arc<OpenFile> {
        let file = Arc::new(OpenFile {
            vn: self.vn.clone(),
            dent: self.dent.clone(),
            offset: AtomicU64::new(self.offset.load(Ordering::Acquire)),
            flags: self.flags,
        });
        self.vn.reference();
        self.vn.open_files.lock().push(Arc::downgrade(&file));
        file
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn seek(&self, pos: i64, whence: SeekFrom) -> Result<u64> {
        let base = match whence {
            SeekFrom::Set => 0i64,
            SeekFrom::Current => self.offset() as i64,
            SeekFrom::End => self.vn.size() as i64,
        };
        let target = base.checked_add(pos).ok_or(Status::InvalidArgument)?;
        if target < 0 {
            return Err(Status::InvalidArgument);
        }
        self.offset.store(target as u64, Ordering::Release);
        Ok(target as u64)
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.flags.contains(OpenFlags::READ) {
            return Err(Status::AccessDenied);
        }
        let n = read_at(&self.vn, self.offset(), buf, self.flags)?;
        self.offset.fetch_add(n as u64, Ordering::AcqRel);
        Ok(n)
    }

    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(Status::AccessDenied);
        }
        if self.vn.is_read_only() {
            return Err(Status::ReadOnly);
        }
        let off = if self.flags.contains(OpenFlags::APPEND) {
            self.vn.size()
        } else {
            self.offset()
        };
        let n = write_at(&self.vn, off, data, self.flags)?;
        self.offset.store(off + n as u64, Ordering::Release);
        Ok(n)
    }

    pub fn ioctl(&self, request: u32, arg: &mut [u8]) -> Result<usize> {
        if let Some(SpecialNode::Tty(tty)) = special_node(&self.vn) {
            return tty.ioctl(request, arg);
        }
        let ops = self.vn.ops()?;
        ops.ioctl(self.vn.desc, request, arg)
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        self.vn.open_files.lock().retain(|w| w.strong_count() > 0);
        self.vn.unreference();
    }
}

enum SpecialNode {
    Socket(Arc<crate::net::socket::SocketState>),
    Tty(Arc<super::tty::Tty>),
}

/// Clone out socket/TTY payloads so no vnode lock is held across a
/// potentially blocking call.
fn special_node(vn: &Arc<Vnode>) -> Option<SpecialNode> {
    match &*vn.data.read() {
        VnodeData::Socket(s) => Some(SpecialNode::Socket(s.clone())),
        VnodeData::Tty(t) => Some(SpecialNode::Tty(t.clone())),
        _ => None,
    }
}

/// Positional read dispatching on vnode type.
pub fn read_at(vn: &Arc<Vnode>, off: u64, buf: &mut [u8], flags: OpenFlags) -> Result<usize> {
    match special_node(vn) {
        Some(SpecialNode::Socket(sock)) => {
            return crate::net::socket::read(&sock, buf, flags.contains(OpenFlags::NONBLOCK));
        }
        Some(SpecialNode::Tty(tty)) => {
            return tty.read(buf, flags.contains(OpenFlags::NONBLOCK));
        }
        None => {}
    }
    if vn.vtype == VnodeType::Directory {
        return Err(Status::IsADirectory);
    }

    if !flags.contains(OpenFlags::UNCACHED) && vn.vtype == VnodeType::Regular {
        return vn.pagecache.read(off, buf);
    }

    // Uncached: a real IRP against the driver.
    let ops = vn.ops()?;
    let blk_size = ops.get_blk_size(vn.desc)?.max(1);
    let irp = Irp::new(
        Some(vn.clone()),
        vn.desc,
        IrpOp::Read,
        off / blk_size as u64,
        buf.len() / blk_size.max(1),
        IrpBuffer::for_read(buf.len()),
    );
    let n = irp::run(&*ops, &irp)?;
    let data = irp.buffer.take_read();
    let n = n.min(buf.len()).min(data.len());
    buf[..n].copy_from_slice(&data[..n]);
    Ok(n)
}

/// Positional write dispatching on vnode type.
pub fn write_at(vn: &Arc<Vnode>, off: u64, data: &[u8], flags: OpenFlags) -> Result<usize> {
    match special_node(vn) {
        Some(SpecialNode::Socket(sock)) => {
            return crate::net::socket::write(&sock, data, flags.contains(OpenFlags::NONBLOCK));
        }
        Some(SpecialNode::Tty(tty)) => {
            return tty.write(data);
        }
        None => {}
    }
    if vn.vtype == VnodeType::Directory {
        return Err(Status::IsADirectory);
    }

    if !flags.contains(OpenFlags::UNCACHED) && vn.vtype == VnodeType::Regular {
        let end = off + data.len() as u64;
        if end > vn.size() {
            vn.set_size(end);
        }
        let n = vn.pagecache.write(off, data)?;
        // Write-through keeps the driver's copy current; dirty tracking
        // still allows a later flush to no-op.
        vn.pagecache.flush()?;
        return Ok(n);
    }

    let ops = vn.ops()?;
    let blk_size = ops.get_blk_size(vn.desc)?.max(1);
    let irp = Irp::new(
        Some(vn.clone()),
        vn.desc,
        IrpOp::Write,
        off / blk_size as u64,
        data.len() / blk_size.max(1),
        IrpBuffer::for_write(data.to_vec()),
    );
    let n = irp::run(&*ops, &irp)?;
    let end = off + n as u64;
    if end > vn.size() {
        vn.set_size(end);
    }
    Ok(n)
}

/// The classic Unix access check: uid 0 short-circuits, then owner,
/// group (including supplementary groups), other. Writes additionally
/// require a writable file system.
pub fn access(vn: &Arc<Vnode>, creds: &Credentials, read: bool, write: bool, exec: bool) -> Result<()> {
    if write && vn.is_read_only() {
        return Err(Status::ReadOnly);
    }
    if creds.euid == 0 {
        return Ok(());
    }
    let attr = vn.attr.read();
    let mode = attr.mode;
    let triad = if creds.euid == attr.uid {
        (mode >> 6) & 0o7
    } else if creds.in_group(attr.gid) {
        (mode >> 3) & 0o7
    } else {
        mode & 0o7
    };
    if (read && triad & 0o4 == 0) || (write && triad & 0o2 == 0) || (exec && triad & 0o1 == 0) {
        return Err(Status::AccessDenied);
    }
    Ok(())
}

/// Open `path` relative to the caller's cwd, honoring CREATE/TRUNCATE.
pub fn open(path: &str, flags: OpenFlags, mode: u16) -> Result<Arc<OpenFile>> {
    let creds = process::current()
        .map(|p| p.creds.read().clone())
        .unwrap_or_else(Credentials::root);

    let dent = match dirent::lookup(path) {
        Ok(d) => d,
        Err(Status::NotFound) if flags.contains(OpenFlags::CREATE) => create_file(path, mode)?,
        Err(e) => return Err(e),
    };
    let dent = dirent::graft(&dent)?;
    let vn = dent.vnode().ok_or(Status::NotFound)?;

    if flags.contains(OpenFlags::DIRECTORY) && vn.vtype != VnodeType::Directory {
        return Err(Status::NotADirectory);
    }
    access(
        &vn,
        &creds,
        flags.contains(OpenFlags::READ),
        flags.contains(OpenFlags::WRITE),
        false,
    )?;

    if flags.contains(OpenFlags::TRUNCATE) && vn.vtype == VnodeType::Regular {
        vn.set_size(0);
        vn.pagecache.invalidate();
    }
    Ok(OpenFile::new(vn, Some(dent), flags))
}

fn create_file(path: &str, mode: u16) -> Result<Arc<Dirent>> {
    let (dir_path, name) = match path.rfind('/') {
        Some(pos) => (&path[..pos.max(1)], &path[pos + 1..]),
        None => (".", path),
    };
    if name.is_empty() {
        return Err(Status::InvalidArgument);
    }
    let parent = dirent::graft(&dirent::lookup(dir_path)?)?;
    let parent_vn = parent.vnode().ok_or(Status::NotFound)?;
    if parent_vn.vtype != VnodeType::Directory {
        return Err(Status::NotADirectory);
    }
    if parent_vn.is_read_only() {
        return Err(Status::ReadOnly);
    }
    let ops = parent_vn.ops()?;
    ops.mk_file(parent_vn.desc, name, VnodeType::Regular, mode)?;
    dirent::lookup_at(name, Some(parent), true)
}

/// One packed record of the directory-entry binary layout:
/// `{inode: u64, offset: u64, reclen: u16, type: u8, name, NUL}`.
pub const DIRENT_RECORD_FIXED: usize = 8 + 8 + 2 + 1;

pub fn record_type(vtype: VnodeType) -> u8 {
    match vtype {
        VnodeType::Fifo => 1,
        VnodeType::CharDev => 2,
        VnodeType::Directory => 4,
        VnodeType::BlockDev => 6,
        VnodeType::Regular => 8,
        VnodeType::Symlink => 10,
        VnodeType::Socket => 12,
    }
}

/// Fill `buf` with packed records starting at entry index `cursor`.
/// Returns (bytes written, next cursor).
pub fn read_entries(dent: &Arc<Dirent>, buf: &mut [u8], cursor: usize) -> Result<(usize, usize)> {
    let dir = dirent::graft(dent)?;
    let vn = dir.vnode().ok_or(Status::NotFound)?;
    if vn.vtype != VnodeType::Directory {
        return Err(Status::NotADirectory);
    }

    // Populate the cache from the driver on first traversal.
    let ops = vn.ops()?;
    let mut listed: Vec<crate::driver::DirItem> = Vec::new();
    ops.list_dir(vn.desc, &mut |item| {
        listed.push(crate::driver::DirItem {
            name: item.name.clone(),
            inode: item.inode,
            vtype: item.vtype,
            desc: item.desc,
        });
        crate::driver::IterDecision::Continue
    })?;
    for item in &listed {
        if dir.find_child(&item.name, &|a, b| ops.compare_names(a, b)).is_none() {
            let child_vn = Vnode::new(
                item.vtype,
                item.desc,
                super::vnode::default_attr(item.vtype, item.inode, 0o644),
            );
            *child_vn.mount.write() = *vn.mount.read();
            let _ = dir.append_child(Dirent::new(&item.name, Some(child_vn)));
        }
    }

    let mut written = 0;
    let mut index = cursor;
    for item in listed.iter().skip(cursor) {
        let reclen = DIRENT_RECORD_FIXED + item.name.len() + 1;
        if written + reclen > buf.len() {
            break;
        }
        let rec = &mut buf[written..written + reclen];
        rec[0..8].copy_from_slice(&item.inode.to_le_bytes());
        rec[8..16].copy_from_slice(&(index as u64).to_le_bytes());
        rec[16..18].copy_from_slice(&(reclen as u16).to_le_bytes());
        rec[18] = record_type(item.vtype);
        rec[19..19 + item.name.len()].copy_from_slice(item.name.as_bytes());
        rec[19 + item.name.len()] = 0;
        written += reclen;
        index += 1;
    }
    Ok((written, index))
}
