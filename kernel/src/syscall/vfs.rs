//! VFS syscalls

use alloc::{sync::Arc, vec::Vec};

use super::handle::Handle;
use super::{current_process, IO_MAX};
use crate::error::{Result, Status};
use crate::fs::{self, fd};
use crate::mm::usercopy;
use crate::sched::process::Process;

fn user_string(proc: &Arc<Process>, ptr: usize) -> Result<alloc::string::String> {
    usercopy::copy_string_from_user(&proc.mm, ptr, fs::PATH_MAX)
}

pub(super) fn dispatch(nr: usize, args: [usize; 6]) -> Result<usize> {
    let proc = current_process()?;
    match nr {
        super::SYS_OPEN => {
            let path = user_string(&proc, args[0])?;
            let flags = fd::OpenFlags::from_bits_truncate(args[1] as u32);
            let file = fd::open(&path, flags, args[2] as u16)?;
            Ok(proc.handles.lock().insert(Handle::File(file)) as usize)
        }
        super::SYS_CLOSE => {
            proc.handles.lock().close(args[0] as u32)?;
            Ok(0)
        }
        super::SYS_READ => {
            let file = proc.handles.lock().file(args[0] as u32)?;
            let len = args[2].min(IO_MAX);
            let mut buf = alloc::vec![0u8; len];
            let n = file.read(&mut buf)?;
            usercopy::copy_to_user(&proc.mm, args[1], &buf[..n])?;
            Ok(n)
        }
        super::SYS_WRITE => {
            let file = proc.handles.lock().file(args[0] as u32)?;
            let len = args[2].min(IO_MAX);
            let mut buf = alloc::vec![0u8; len];
            usercopy::copy_from_user(&proc.mm, args[1], &mut buf)?;
            file.write(&buf)
        }
        super::SYS_SEEK => {
            let file = proc.handles.lock().file(args[0] as u32)?;
            let whence = match args[2] {
                0 => fd::SeekFrom::Set,
                1 => fd::SeekFrom::Current,
                2 => fd::SeekFrom::End,
                _ => return Err(Status::InvalidArgument),
            };
            file.seek(args[1] as i64, whence).map(|o| o as usize)
        }
        super::SYS_TELL => {
            let file = proc.handles.lock().file(args[0] as u32)?;
            Ok(file.offset() as usize)
        }
        super::SYS_IOCTL => {
            let file = proc.handles.lock().file(args[0] as u32)?;
            let request = args[1] as u32;
            // The driver names its argument size so the copy is bounded.
            let size = match file.vn.ops() {
                Ok(ops) => ops.ioctl_argp_size(request).unwrap_or(args[3].min(256)),
                Err(_) => args[3].min(256),
            };
            let mut arg = alloc::vec![0u8; size];
            if args[2] != 0 && size != 0 {
                usercopy::copy_from_user(&proc.mm, args[2], &mut arg)?;
            }
            let n = file.ioctl(request, &mut arg)?;
            if args[2] != 0 && n != 0 {
                usercopy::copy_to_user(&proc.mm, args[2], &arg[..n.min(size)])?;
            }
            Ok(n)
        }
        super::SYS_STAT => {
            let path = user_string(&proc, args[0])?;
            let stat = fs::stat(&path)?;
            let mut packed = [0u8; 40];
            packed[0..8].copy_from_slice(&stat.size.to_le_bytes());
            packed[8..16].copy_from_slice(&stat.inode.to_le_bytes());
            packed[16..20].copy_from_slice(&stat.uid.to_le_bytes());
            packed[20..24].copy_from_slice(&stat.gid.to_le_bytes());
            packed[24..26].copy_from_slice(&stat.mode.to_le_bytes());
            packed[26] = fd::record_type(stat.vtype);
            packed[32..40].copy_from_slice(&(stat.blk_size as u64).to_le_bytes());
            usercopy::copy_to_user(&proc.mm, args[1], &packed)?;
            Ok(0)
        }
        super::SYS_MKDIR => {
            let path = user_string(&proc, args[0])?;
            fs::mkdir(&path, args[1] as u16)?;
            Ok(0)
        }
        super::SYS_UNLINK => {
            let path = user_string(&proc, args[0])?;
            fs::unlink(&path)?;
            Ok(0)
        }
        super::SYS_RENAME => {
            let from = user_string(&proc, args[0])?;
            let to = user_string(&proc, args[1])?;
            fs::rename(&from, &to)?;
            Ok(0)
        }
        super::SYS_READLINK => {
            let path = user_string(&proc, args[0])?;
            let target = fs::readlink(&path)?;
            let n = target.len().min(args[2]);
            usercopy::copy_to_user(&proc.mm, args[1], &target.as_bytes()[..n])?;
            Ok(n)
        }
        super::SYS_SYMLINK => {
            let target = user_string(&proc, args[0])?;
            let linkpath = user_string(&proc, args[1])?;
            fs::symlink(&target, &linkpath)?;
            Ok(0)
        }
        super::SYS_CHMOD => {
            let path = user_string(&proc, args[0])?;
            fs::chmod(&path, args[1] as u16)?;
            Ok(0)
        }
        super::SYS_CHOWN => {
            let path = user_string(&proc, args[0])?;
            fs::chown(&path, args[1] as u32, args[2] as u32)?;
            Ok(0)
        }
        super::SYS_ACCESS => {
            let path = user_string(&proc, args[0])?;
            let mode = args[1];
            fs::check_access(&path, mode & 4 != 0, mode & 2 != 0, mode & 1 != 0)?;
            Ok(0)
        }
        super::SYS_DUP => {
            let file = proc.handles.lock().file(args[0] as u32)?;
            Ok(proc
                .handles
                .lock()
                .insert(Handle::File(file.duplicate())) as usize)
        }
        super::SYS_DUP2 => {
            let file = proc.handles.lock().file(args[0] as u32)?;
            Ok(proc
                .handles
                .lock()
                .insert_at(args[1] as u32, Handle::File(file.duplicate())) as usize)
        }
        super::SYS_CHDIR => {
            let path = user_string(&proc, args[0])?;
            fs::chdir(&path)?;
            Ok(0)
        }
        super::SYS_FCHDIR => {
            let file = proc.handles.lock().file(args[0] as u32)?;
            let dent = file.dent.clone().ok_or(Status::InvalidArgument)?;
            let path = fs::dirent::dirent_path(&dent);
            fs::chdir(&path)?;
            Ok(0)
        }
        super::SYS_GETCWD => {
            let cwd = fs::getcwd()?;
            let n = cwd.len().min(args[1]);
            usercopy::copy_to_user(&proc.mm, args[0], &cwd.as_bytes()[..n])?;
            Ok(n)
        }
        super::SYS_READ_ENTRIES => {
            let file = proc.handles.lock().file(args[0] as u32)?;
            let dent = file.dent.clone().ok_or(Status::NotADirectory)?;
            let len = args[2].min(IO_MAX);
            let mut buf = alloc::vec![0u8; len];
            let (written, next) = fd::read_entries(&dent, &mut buf, args[3])?;
            usercopy::copy_to_user(&proc.mm, args[1], &buf[..written])?;
            // Next cursor returns in the high half so callers can resume.
            Ok(written | (next << 32))
        }
        super::SYS_MOUNT => {
            let at = user_string(&proc, args[0])?;
            let device = if args[1] != 0 {
                let dev_path = user_string(&proc, args[1])?;
                let dent = fs::dirent::lookup(&dev_path)?;
                dent.vnode()
            } else {
                None
            };
            fs::mount::mount(&at, device, None)?;
            Ok(0)
        }
        super::SYS_UNMOUNT => {
            let at = user_string(&proc, args[0])?;
            fs::mount::unmount(&at)?;
            Ok(0)
        }
        _ => Err(Status::Unimplemented),
    }
}

/// Pack a socket address for copy-out: family u16 + payload.
pub(super) fn pack_sockaddr(addr: &crate::net::socket::SockAddr) -> Vec<u8> {
    let mut out = Vec::new();
    match addr {
        crate::net::socket::SockAddr::Inet(a) => {
            out.extend_from_slice(&(crate::net::socket::AF_INET as u16).to_le_bytes());
            out.extend_from_slice(&a.port.to_be_bytes());
            out.extend_from_slice(&a.addr.0);
        }
        crate::net::socket::SockAddr::Unix(path) => {
            out.extend_from_slice(&(crate::net::socket::AF_UNIX as u16).to_le_bytes());
            out.extend_from_slice(path.as_bytes());
            out.push(0);
        }
    }
    out
}

/// Unpack a user-provided socket address blob.
pub(super) fn unpack_sockaddr(bytes: &[u8]) -> Result<crate::net::socket::SockAddr> {
    if bytes.len() < 2 {
        return Err(Status::InvalidArgument);
    }
    let family = u16::from_le_bytes([bytes[0], bytes[1]]) as u32;
    match family {
        crate::net::socket::AF_INET => {
            if bytes.len() < 8 {
                return Err(Status::InvalidArgument);
            }
            let port = u16::from_be_bytes([bytes[2], bytes[3]]);
            let addr = crate::net::Ipv4Address([bytes[4], bytes[5], bytes[6], bytes[7]]);
            Ok(crate::net::socket::SockAddr::Inet(
                crate::net::SocketAddrV4::new(addr, port),
            ))
        }
        crate::net::socket::AF_UNIX => {
            let end = bytes[2..]
                .iter()
                .position(|&b| b == 0)
                .map(|p| p + 2)
                .unwrap_or(bytes.len());
            let path = core::str::from_utf8(&bytes[2..end])
                .map_err(|_| Status::InvalidArgument)?;
            Ok(crate::net::socket::SockAddr::Unix(alloc::string::String::from(path)))
        }
        _ => Err(Status::InvalidArgument),
    }
}
