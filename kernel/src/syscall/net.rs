//! Socket and network-control syscalls

use alloc::sync::Arc;

use super::handle::Handle;
use super::vfs::{pack_sockaddr, unpack_sockaddr};
use super::{current_process, IO_MAX};
use crate::error::{Result, Status};
use crate::fs::fd::{OpenFile, OpenFlags};
use crate::mm::usercopy;
use crate::net::{self, socket};
use crate::sched::process::Process;

fn socket_of(proc: &Arc<Process>, handle: u32) -> Result<Arc<socket::SocketState>> {
    let file = proc.handles.lock().file(handle)?;
    socket::state_of(&file.vn)
}

fn user_addr(proc: &Arc<Process>, ptr: usize, len: usize) -> Result<socket::SockAddr> {
    if ptr == 0 || len == 0 || len > 512 {
        return Err(Status::InvalidArgument);
    }
    let mut buf = alloc::vec![0u8; len];
    usercopy::copy_from_user(&proc.mm, ptr, &mut buf)?;
    unpack_sockaddr(&buf)
}

fn copy_addr_out(proc: &Arc<Process>, addr: &socket::SockAddr, ptr: usize, cap: usize) -> Result<usize> {
    if ptr == 0 {
        return Ok(0);
    }
    let packed = pack_sockaddr(addr);
    let n = packed.len().min(cap);
    usercopy::copy_to_user(&proc.mm, ptr, &packed[..n])?;
    Ok(n)
}

pub(super) fn dispatch_socket(nr: usize, args: [usize; 6]) -> Result<usize> {
    let proc = current_process()?;
    match nr {
        super::SYS_SOCKET => {
            let vn = socket::create(args[0] as u32, args[1] as u32, args[2] as u32)?;
            let file = OpenFile::new(vn, None, OpenFlags::READ | OpenFlags::WRITE);
            Ok(proc.handles.lock().insert(Handle::File(file)) as usize)
        }
        super::SYS_BIND => {
            let sock = socket_of(&proc, args[0] as u32)?;
            let addr = user_addr(&proc, args[1], args[2])?;
            socket::bind(&sock, &addr)?;
            Ok(0)
        }
        super::SYS_LISTEN => {
            let sock = socket_of(&proc, args[0] as u32)?;
            socket::listen(&sock, args[1])?;
            Ok(0)
        }
        super::SYS_ACCEPT => {
            let sock = socket_of(&proc, args[0] as u32)?;
            let (vn, peer) = socket::accept(&sock, args[3] != 0)?;
            let file = OpenFile::new(vn, None, OpenFlags::READ | OpenFlags::WRITE);
            let id = proc.handles.lock().insert(Handle::File(file));
            if let Some(peer) = peer {
                copy_addr_out(&proc, &peer, args[1], args[2])?;
            }
            Ok(id as usize)
        }
        super::SYS_CONNECT => {
            let sock = socket_of(&proc, args[0] as u32)?;
            let addr = user_addr(&proc, args[1], args[2])?;
            socket::connect(&sock, &addr)?;
            Ok(0)
        }
        super::SYS_SENDTO => {
            let sock = socket_of(&proc, args[0] as u32)?;
            let len = args[2].min(IO_MAX);
            let mut data = alloc::vec![0u8; len];
            usercopy::copy_from_user(&proc.mm, args[1], &mut data)?;
            let addr = if args[3] != 0 {
                Some(user_addr(&proc, args[3], args[4])?)
            } else {
                None
            };
            socket::send_to(&sock, &data, addr.as_ref())
        }
        super::SYS_RECVFROM => {
            let sock = socket_of(&proc, args[0] as u32)?;
            let len = args[2].min(IO_MAX);
            let mut buf = alloc::vec![0u8; len];
            let (n, from) = socket::recv_from(&sock, &mut buf, args[5] & 1 != 0)?;
            usercopy::copy_to_user(&proc.mm, args[1], &buf[..n])?;
            if let Some(from) = from {
                copy_addr_out(&proc, &from, args[3], args[4])?;
            }
            Ok(n)
        }
        super::SYS_SHUTDOWN => {
            let sock = socket_of(&proc, args[0] as u32)?;
            socket::shutdown(&sock)?;
            Ok(0)
        }
        super::SYS_SETSOCKOPT => {
            let sock = socket_of(&proc, args[0] as u32)?;
            socket::setsockopt(&sock, args[1] as u32, args[2] as u32)?;
            Ok(0)
        }
        super::SYS_GETSOCKOPT => {
            let sock = socket_of(&proc, args[0] as u32)?;
            let value = socket::getsockopt(&sock, args[1] as u32)?;
            if args[2] != 0 {
                usercopy::copy_to_user(&proc.mm, args[2], &value.to_le_bytes())?;
            }
            Ok(value as usize)
        }
        super::SYS_GETSOCKNAME => {
            let sock = socket_of(&proc, args[0] as u32)?;
            let addr = socket::getsockname(&sock)?;
            copy_addr_out(&proc, &addr, args[1], args[2])
        }
        super::SYS_GETPEERNAME => {
            let sock = socket_of(&proc, args[0] as u32)?;
            let addr = socket::getpeername(&sock)?;
            copy_addr_out(&proc, &addr, args[1], args[2])
        }
        _ => Err(Status::Unimplemented),
    }
}

// Interface ioctl sub-operations.
const IFACE_ADD_IP: usize = 1;
const IFACE_REMOVE_IP: usize = 2;
const IFACE_ADD_ROUTE: usize = 3;
const IFACE_REMOVE_ROUTE: usize = 4;
const IFACE_SET_DEFAULT_GW: usize = 5;
const IFACE_UNSET_DEFAULT_GW: usize = 6;
const IFACE_CLEAR_ARP: usize = 7;
const IFACE_CLEAR_ROUTE_CACHE: usize = 8;

pub(super) fn dispatch_control(nr: usize, args: [usize; 6]) -> Result<usize> {
    let proc = current_process()?;
    match nr {
        super::SYS_GET_HOSTNAME => {
            let name = net::hostname();
            let n = name.len().min(args[1]);
            usercopy::copy_to_user(&proc.mm, args[0], &name.as_bytes()[..n])?;
            Ok(n)
        }
        super::SYS_SET_HOSTNAME => {
            if proc.creds.read().euid != 0 {
                return Err(Status::AccessDenied);
            }
            let name = usercopy::copy_string_from_user(&proc.mm, args[0], 64)?;
            net::set_hostname(&name)?;
            Ok(0)
        }
        super::SYS_INTERFACE_IOCTL => {
            if proc.creds.read().euid != 0 {
                return Err(Status::AccessDenied);
            }
            let iface = net::interfaces()
                .get(args[1])
                .cloned()
                .ok_or(Status::NotFound)?;
            match args[0] {
                IFACE_ADD_IP => {
                    let addr = net::Ipv4Address((args[2] as u32).to_be_bytes());
                    let prefix = (args[3] as u8).min(32);
                    let bcast =
                        u32::from(addr) | !(if prefix == 0 { 0 } else { u32::MAX << (32 - prefix as u32) });
                    iface.ips.write().push(net::IpEntry {
                        addr,
                        prefix,
                        broadcast: net::Ipv4Address::from(bcast),
                    });
                    Ok(0)
                }
                IFACE_REMOVE_IP => {
                    let addr = net::Ipv4Address((args[2] as u32).to_be_bytes());
                    iface.ips.write().retain(|e| e.addr != addr);
                    Ok(0)
                }
                IFACE_ADD_ROUTE => {
                    net::route::add_route(net::route::Route {
                        dest: net::Ipv4Address((args[2] as u32).to_be_bytes()),
                        prefix: (args[3] as u8).min(32),
                        gateway: Some(net::Ipv4Address((args[4] as u32).to_be_bytes())),
                        iface: iface.index,
                    });
                    Ok(0)
                }
                IFACE_REMOVE_ROUTE => {
                    net::route::remove_route(
                        net::Ipv4Address((args[2] as u32).to_be_bytes()),
                        (args[3] as u8).min(32),
                    );
                    Ok(0)
                }
                IFACE_SET_DEFAULT_GW => {
                    net::route::set_default_gateway(
                        net::Ipv4Address((args[2] as u32).to_be_bytes()),
                        iface.index,
                    );
                    Ok(0)
                }
                IFACE_UNSET_DEFAULT_GW => {
                    net::route::unset_default_gateway();
                    Ok(0)
                }
                IFACE_CLEAR_ARP => {
                    iface.arp.clear();
                    Ok(0)
                }
                IFACE_CLEAR_ROUTE_CACHE => {
                    net::route::clear_route_cache();
                    Ok(0)
                }
                _ => Err(Status::InvalidIoctl),
            }
        }
        _ => Err(Status::Unimplemented),
    }
}
