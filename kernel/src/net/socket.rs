//! Socket layer
//!
//! Sockets live in the vnode graph: every socket is a SOCK vnode whose
//! data points at a [`SocketState`], so they participate in fd
//! read/write and IRP dispatch like any other file. Operations go
//! through a vtable selected by (domain, type): AF_INET dgram → UDP,
//! AF_INET stream → TCP, AF_UNIX stream/dgram → local sockets.

use alloc::{string::String, sync::Arc};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use super::ip::{Ipv4Address, SocketAddrV4};
use super::{tcp, udp, unix};
use crate::driver::irp::{Irp, IrpBuffer, IrpOp};
use crate::error::{Result, Status};
use crate::fs::vnode::{default_attr, Vnode, VnodeData, VnodeType};

pub const AF_UNIX: u32 = 1;
pub const AF_INET: u32 = 2;
pub const SOCK_STREAM: u32 = 1;
pub const SOCK_DGRAM: u32 = 2;

/// Address argument crossing the socket boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockAddr {
    Inet(SocketAddrV4),
    Unix(String),
}

enum SocketKind {
    InetDgram {
        bind: Option<Arc<udp::UdpBind>>,
        peer: Option<SocketAddrV4>,
    },
    InetStream {
        local: Option<SocketAddrV4>,
        listener: Option<Arc<tcp::TcpListener>>,
        conn: Option<Arc<tcp::TcpConn>>,
    },
    UnixStream {
        path: Option<String>,
        listener: Option<Arc<unix::Listener>>,
        end: Option<Arc<unix::StreamEnd>>,
    },
    UnixDgram {
        sock: Arc<unix::DgramSocket>,
    },
}

pub struct SocketState {
    pub domain: u32,
    pub stype: u32,
    pub protocol: u32,
    /// IP_TTL option.
    pub ttl: AtomicU8,
    /// IP_HDRINCL option.
    pub hdrincl: AtomicBool,
    kind: spin::Mutex<SocketKind>,
    ops: &'static dyn SocketOps,
}

/// The per-(domain, type) operation table.
trait SocketOps: Send + Sync {
    fn bind(&self, s: &SocketState, addr: &SockAddr) -> Result<()>;
    fn connect(&self, s: &SocketState, addr: &SockAddr) -> Result<()>;
    fn listen(&self, s: &SocketState, backlog: usize) -> Result<()>;
    fn accept(&self, s: &SocketState, nonblock: bool) -> Result<(Arc<Vnode>, Option<SockAddr>)>;
    fn send_to(&self, s: &SocketState, data: &[u8], addr: Option<&SockAddr>) -> Result<usize>;
    fn recv_from(
        &self,
        s: &SocketState,
        buf: &mut [u8],
        nonblock: bool,
    ) -> Result<(usize, Option<SockAddr>)>;
    fn shutdown(&self, s: &SocketState) -> Result<()>;
    fn sockname(&self, s: &SocketState) -> Result<SockAddr>;
    fn peername(&self, s: &SocketState) -> Result<SockAddr>;
}

fn ops_for(domain: u32, stype: u32) -> Result<&'static dyn SocketOps> {
    match (domain, stype) {
        (AF_INET, SOCK_DGRAM) => Ok(&InetDgramOps),
        (AF_INET, SOCK_STREAM) => Ok(&InetStreamOps),
        (AF_UNIX, SOCK_STREAM) => Ok(&UnixStreamOps),
        (AF_UNIX, SOCK_DGRAM) => Ok(&UnixDgramOps),
        _ => Err(Status::Unimplemented),
    }
}

fn initial_kind(domain: u32, stype: u32) -> SocketKind {
    match (domain, stype) {
        (AF_INET, SOCK_DGRAM) => SocketKind::InetDgram {
            bind: None,
            peer: None,
        },
        (AF_INET, SOCK_STREAM) => SocketKind::InetStream {
            local: None,
            listener: None,
            conn: None,
        },
        (AF_UNIX, SOCK_STREAM) => SocketKind::UnixStream {
            path: None,
            listener: None,
            end: None,
        },
        _ => SocketKind::UnixDgram {
            sock: unix::DgramSocket::new(),
        },
    }
}

fn wrap_in_vnode(state: Arc<SocketState>) -> Arc<Vnode> {
    let vn = Vnode::new(VnodeType::Socket, 0, default_attr(VnodeType::Socket, 0, 0o666));
    *vn.data.write() = VnodeData::Socket(state);
    vn
}

/// socket(2): a fresh SOCK vnode.
pub fn create(domain: u32, stype: u32, protocol: u32) -> Result<Arc<Vnode>> {
    let ops = ops_for(domain, stype)?;
    super::init(); // the loopback must exist before any bind
    let state = Arc::new(SocketState {
        domain,
        stype,
        protocol,
        ttl: AtomicU8::new(64),
        hdrincl: AtomicBool::new(false),
        kind: spin::Mutex::new(initial_kind(domain, stype)),
        ops,
    });
    Ok(wrap_in_vnode(state))
}

pub fn state_of(vn: &Arc<Vnode>) -> Result<Arc<SocketState>> {
    match &*vn.data.read() {
        VnodeData::Socket(s) => Ok(s.clone()),
        _ => Err(Status::InvalidArgument),
    }
}

pub fn bind(s: &Arc<SocketState>, addr: &SockAddr) -> Result<()> {
    s.ops.bind(s, addr)
}

pub fn connect(s: &Arc<SocketState>, addr: &SockAddr) -> Result<()> {
    s.ops.connect(s, addr)
}

pub fn listen(s: &Arc<SocketState>, backlog: usize) -> Result<()> {
    s.ops.listen(s, backlog)
}

pub fn accept(s: &Arc<SocketState>, nonblock: bool) -> Result<(Arc<Vnode>, Option<SockAddr>)> {
    s.ops.accept(s, nonblock)
}

pub fn send_to(s: &Arc<SocketState>, data: &[u8], addr: Option<&SockAddr>) -> Result<usize> {
    s.ops.send_to(s, data, addr)
}

pub fn recv_from(
    s: &Arc<SocketState>,
    buf: &mut [u8],
    nonblock: bool,
) -> Result<(usize, Option<SockAddr>)> {
    s.ops.recv_from(s, buf, nonblock)
}

pub fn shutdown(s: &Arc<SocketState>) -> Result<()> {
    s.ops.shutdown(s)
}

pub fn getsockname(s: &Arc<SocketState>) -> Result<SockAddr> {
    s.ops.sockname(s)
}

pub fn getpeername(s: &Arc<SocketState>) -> Result<SockAddr> {
    s.ops.peername(s)
}

/// fd-layer read: stream bytes or one datagram, peer address dropped.
pub fn read(s: &Arc<SocketState>, buf: &mut [u8], nonblock: bool) -> Result<usize> {
    recv_from(s, buf, nonblock).map(|(n, _)| n)
}

/// fd-layer write: send to the connected peer.
pub fn write(s: &Arc<SocketState>, data: &[u8], _nonblock: bool) -> Result<usize> {
    send_to(s, data, None)
}

/// IRP entry: sockets honor the same submit/complete protocol as any
/// driver; the operation completes during submit.
pub fn submit_irp(s: &Arc<SocketState>, irp: &Arc<Irp>) -> Result<()> {
    let (flags, addr) = {
        let socket_data = irp.socket.lock();
        match &*socket_data {
            Some(d) => (d.flags, d.addr),
            None => (0, None),
        }
    };
    let nonblock = flags & 1 != 0;
    let result = match (&irp.op, &irp.buffer) {
        (IrpOp::Read, IrpBuffer::Read(buf)) => {
            let mut data = buf.lock();
            recv_from(s, &mut data, nonblock).map(|(n, from)| {
                if let Some(SockAddr::Inet(peer)) = from {
                    let mut socket_data = irp.socket.lock();
                    if let Some(d) = socket_data.as_mut() {
                        d.addr = Some(peer);
                        d.addr_len = 6;
                    }
                }
                n
            })
        }
        (IrpOp::Write, IrpBuffer::Write(data)) => {
            let target = addr.map(SockAddr::Inet);
            send_to(s, data, target.as_ref())
        }
        _ => Err(Status::InvalidArgument),
    };
    match result {
        Ok(n) => {
            irp.set_transferred(n);
            irp.set_status(Ok(()));
        }
        Err(e) => irp.set_status(Err(e)),
    }
    Ok(())
}

// ---------------------------------------------------------------- UDP --

struct InetDgramOps;

fn inet_addr(addr: &SockAddr) -> Result<SocketAddrV4> {
    match addr {
        SockAddr::Inet(a) => Ok(*a),
        SockAddr::Unix(_) => Err(Status::InvalidArgument),
    }
}

impl InetDgramOps {
    /// Bind to an ephemeral port if the socket has no binding yet.
    fn ensure_bound(&self, s: &SocketState) -> Result<Arc<udp::UdpBind>> {
        let mut kind = s.kind.lock();
        let SocketKind::InetDgram { bind, .. } = &mut *kind else {
            return Err(Status::Internal);
        };
        if let Some(b) = bind {
            return Ok(b.clone());
        }
        let fresh = udp::bind(SocketAddrV4::new(Ipv4Address::UNSPECIFIED, 0))?;
        *bind = Some(fresh.clone());
        Ok(fresh)
    }
}

impl SocketOps for InetDgramOps {
    fn bind(&self, s: &SocketState, addr: &SockAddr) -> Result<()> {
        let addr = inet_addr(addr)?;
        let mut kind = s.kind.lock();
        let SocketKind::InetDgram { bind, .. } = &mut *kind else {
            return Err(Status::Internal);
        };
        if bind.is_some() {
            return Err(Status::InvalidOperation);
        }
        *bind = Some(udp::bind(addr)?);
        Ok(())
    }

    fn connect(&self, s: &SocketState, addr: &SockAddr) -> Result<()> {
        let addr = inet_addr(addr)?;
        self.ensure_bound(s)?;
        let mut kind = s.kind.lock();
        let SocketKind::InetDgram { peer, .. } = &mut *kind else {
            return Err(Status::Internal);
        };
        *peer = Some(addr);
        Ok(())
    }

    fn listen(&self, _s: &SocketState, _backlog: usize) -> Result<()> {
        Err(Status::InvalidOperation)
    }

    fn accept(&self, _s: &SocketState, _nonblock: bool) -> Result<(Arc<Vnode>, Option<SockAddr>)> {
        Err(Status::InvalidOperation)
    }

    fn send_to(&self, s: &SocketState, data: &[u8], addr: Option<&SockAddr>) -> Result<usize> {
        let bind = self.ensure_bound(s)?;
        let dest = match addr {
            Some(a) => inet_addr(a)?,
            None => {
                let kind = s.kind.lock();
                let SocketKind::InetDgram { peer, .. } = &*kind else {
                    return Err(Status::Internal);
                };
                peer.ok_or(Status::NotConnected)?
            }
        };
        udp::send_to(
            bind.local,
            dest,
            data,
            Some(s.ttl.load(Ordering::Relaxed)),
        )
    }

    fn recv_from(
        &self,
        s: &SocketState,
        buf: &mut [u8],
        nonblock: bool,
    ) -> Result<(usize, Option<SockAddr>)> {
        let bind = self.ensure_bound(s)?;
        let datagram = bind.recv(nonblock)?;
        let n = buf.len().min(datagram.data.len());
        buf[..n].copy_from_slice(&datagram.data[..n]);
        Ok((n, Some(SockAddr::Inet(datagram.src))))
    }

    fn shutdown(&self, s: &SocketState) -> Result<()> {
        let mut kind = s.kind.lock();
        if let SocketKind::InetDgram { bind, .. } = &mut *kind {
            if let Some(b) = bind.take() {
                udp::unbind(&b);
            }
        }
        Ok(())
    }

    fn sockname(&self, s: &SocketState) -> Result<SockAddr> {
        let kind = s.kind.lock();
        let SocketKind::InetDgram { bind, .. } = &*kind else {
            return Err(Status::Internal);
        };
        let bound = bind.as_ref().ok_or(Status::NotConnected)?;
        Ok(SockAddr::Inet(bound.local))
    }

    fn peername(&self, s: &SocketState) -> Result<SockAddr> {
        let kind = s.kind.lock();
        let SocketKind::InetDgram { peer, .. } = &*kind else {
            return Err(Status::Internal);
        };
        peer.map(SockAddr::Inet).ok_or(Status::NotConnected)
    }
}

// ---------------------------------------------------------------- TCP --

struct InetStreamOps;

impl SocketOps for InetStreamOps {
    fn bind(&self, s: &SocketState, addr: &SockAddr) -> Result<()> {
        let addr = inet_addr(addr)?;
        let mut kind = s.kind.lock();
        let SocketKind::InetStream { local, .. } = &mut *kind else {
            return Err(Status::Internal);
        };
        if local.is_some() {
            return Err(Status::InvalidOperation);
        }
        *local = Some(addr);
        Ok(())
    }

    fn connect(&self, s: &SocketState, addr: &SockAddr) -> Result<()> {
        let addr = inet_addr(addr)?;
        let local = {
            let kind = s.kind.lock();
            let SocketKind::InetStream { local, conn, .. } = &*kind else {
                return Err(Status::Internal);
            };
            if conn.is_some() {
                return Err(Status::AlreadyConnected);
            }
            *local
        };
        let established = tcp::connect(local, addr)?;
        let mut kind = s.kind.lock();
        if let SocketKind::InetStream { conn, .. } = &mut *kind {
            *conn = Some(established);
        }
        Ok(())
    }

    fn listen(&self, s: &SocketState, backlog: usize) -> Result<()> {
        let mut kind = s.kind.lock();
        let SocketKind::InetStream {
            local, listener, ..
        } = &mut *kind
        else {
            return Err(Status::Internal);
        };
        if listener.is_some() {
            return Err(Status::InvalidOperation);
        }
        let addr = local.ok_or(Status::InvalidOperation)?;
        *listener = Some(tcp::listen(addr, backlog)?);
        Ok(())
    }

    fn accept(&self, s: &SocketState, nonblock: bool) -> Result<(Arc<Vnode>, Option<SockAddr>)> {
        let listener = {
            let kind = s.kind.lock();
            let SocketKind::InetStream { listener, .. } = &*kind else {
                return Err(Status::Internal);
            };
            listener.clone().ok_or(Status::InvalidOperation)?
        };
        let conn = tcp::accept(&listener, nonblock)?;
        let peer = conn.remote;
        let state = Arc::new(SocketState {
            domain: s.domain,
            stype: s.stype,
            protocol: s.protocol,
            ttl: AtomicU8::new(64),
            hdrincl: AtomicBool::new(false),
            kind: spin::Mutex::new(SocketKind::InetStream {
                local: Some(conn.local),
                listener: None,
                conn: Some(conn),
            }),
            ops: &InetStreamOps,
        });
        Ok((wrap_in_vnode(state), Some(SockAddr::Inet(peer))))
    }

    fn send_to(&self, s: &SocketState, data: &[u8], _addr: Option<&SockAddr>) -> Result<usize> {
        let conn = {
            let kind = s.kind.lock();
            let SocketKind::InetStream { conn, .. } = &*kind else {
                return Err(Status::Internal);
            };
            conn.clone().ok_or(Status::NotConnected)?
        };
        tcp::send(&conn, data)
    }

    fn recv_from(
        &self,
        s: &SocketState,
        buf: &mut [u8],
        nonblock: bool,
    ) -> Result<(usize, Option<SockAddr>)> {
        let conn = {
            let kind = s.kind.lock();
            let SocketKind::InetStream { conn, .. } = &*kind else {
                return Err(Status::Internal);
            };
            conn.clone().ok_or(Status::NotConnected)?
        };
        let n = tcp::recv(&conn, buf, nonblock)?;
        Ok((n, Some(SockAddr::Inet(conn.remote))))
    }

    fn shutdown(&self, s: &SocketState) -> Result<()> {
        let conn = {
            let kind = s.kind.lock();
            let SocketKind::InetStream { conn, .. } = &*kind else {
                return Err(Status::Internal);
            };
            conn.clone()
        };
        match conn {
            Some(c) => tcp::shutdown(&c),
            None => Ok(()),
        }
    }

    fn sockname(&self, s: &SocketState) -> Result<SockAddr> {
        let kind = s.kind.lock();
        let SocketKind::InetStream { local, conn, .. } = &*kind else {
            return Err(Status::Internal);
        };
        if let Some(c) = conn {
            return Ok(SockAddr::Inet(c.local));
        }
        local.map(SockAddr::Inet).ok_or(Status::NotConnected)
    }

    fn peername(&self, s: &SocketState) -> Result<SockAddr> {
        let kind = s.kind.lock();
        let SocketKind::InetStream { conn, .. } = &*kind else {
            return Err(Status::Internal);
        };
        conn.as_ref()
            .map(|c| SockAddr::Inet(c.remote))
            .ok_or(Status::NotConnected)
    }
}

// --------------------------------------------------------- AF_UNIX ----

struct UnixStreamOps;

fn unix_path(addr: &SockAddr) -> Result<&str> {
    match addr {
        SockAddr::Unix(p) => Ok(p),
        SockAddr::Inet(_) => Err(Status::InvalidArgument),
    }
}

impl SocketOps for UnixStreamOps {
    fn bind(&self, s: &SocketState, addr: &SockAddr) -> Result<()> {
        let path = unix_path(addr)?;
        let mut kind = s.kind.lock();
        let SocketKind::UnixStream { path: bound, .. } = &mut *kind else {
            return Err(Status::Internal);
        };
        if bound.is_some() {
            return Err(Status::InvalidOperation);
        }
        *bound = Some(String::from(path));
        Ok(())
    }

    fn connect(&self, s: &SocketState, addr: &SockAddr) -> Result<()> {
        let path = unix_path(addr)?;
        let client = unix::connect_stream(path)?;
        let mut kind = s.kind.lock();
        if let SocketKind::UnixStream { end, .. } = &mut *kind {
            *end = Some(client);
        }
        Ok(())
    }

    fn listen(&self, s: &SocketState, _backlog: usize) -> Result<()> {
        let mut kind = s.kind.lock();
        let SocketKind::UnixStream {
            path, listener, ..
        } = &mut *kind
        else {
            return Err(Status::Internal);
        };
        if listener.is_some() {
            return Err(Status::InvalidOperation);
        }
        let bound = path.clone().ok_or(Status::InvalidOperation)?;
        *listener = Some(unix::bind_listener(&bound)?);
        Ok(())
    }

    fn accept(&self, s: &SocketState, nonblock: bool) -> Result<(Arc<Vnode>, Option<SockAddr>)> {
        let listener = {
            let kind = s.kind.lock();
            let SocketKind::UnixStream { listener, .. } = &*kind else {
                return Err(Status::Internal);
            };
            listener.clone().ok_or(Status::InvalidOperation)?
        };
        let end = unix::accept(&listener, nonblock)?;
        let state = Arc::new(SocketState {
            domain: s.domain,
            stype: s.stype,
            protocol: s.protocol,
            ttl: AtomicU8::new(64),
            hdrincl: AtomicBool::new(false),
            kind: spin::Mutex::new(SocketKind::UnixStream {
                path: Some(listener.path.clone()),
                listener: None,
                end: Some(end),
            }),
            ops: &UnixStreamOps,
        });
        Ok((wrap_in_vnode(state), None))
    }

    fn send_to(&self, s: &SocketState, data: &[u8], _addr: Option<&SockAddr>) -> Result<usize> {
        let end = {
            let kind = s.kind.lock();
            let SocketKind::UnixStream { end, .. } = &*kind else {
                return Err(Status::Internal);
            };
            end.clone().ok_or(Status::NotConnected)?
        };
        end.send(data)
    }

    fn recv_from(
        &self,
        s: &SocketState,
        buf: &mut [u8],
        nonblock: bool,
    ) -> Result<(usize, Option<SockAddr>)> {
        let end = {
            let kind = s.kind.lock();
            let SocketKind::UnixStream { end, .. } = &*kind else {
                return Err(Status::Internal);
            };
            end.clone().ok_or(Status::NotConnected)?
        };
        let n = end.recv(buf, nonblock)?;
        Ok((n, end.peer_path().map(SockAddr::Unix)))
    }

    fn shutdown(&self, s: &SocketState) -> Result<()> {
        let kind = s.kind.lock();
        if let SocketKind::UnixStream { end, listener, .. } = &*kind {
            if let Some(e) = end {
                e.shutdown();
            }
            if let Some(l) = listener {
                unix::unbind(&l.path);
            }
        }
        Ok(())
    }

    fn sockname(&self, s: &SocketState) -> Result<SockAddr> {
        let kind = s.kind.lock();
        let SocketKind::UnixStream { path, .. } = &*kind else {
            return Err(Status::Internal);
        };
        path.clone().map(SockAddr::Unix).ok_or(Status::NotConnected)
    }

    fn peername(&self, s: &SocketState) -> Result<SockAddr> {
        let kind = s.kind.lock();
        let SocketKind::UnixStream { end, .. } = &*kind else {
            return Err(Status::Internal);
        };
        end.as_ref()
            .and_then(|e| e.peer_path())
            .map(SockAddr::Unix)
            .ok_or(Status::NotConnected)
    }
}

struct UnixDgramOps;

impl SocketOps for UnixDgramOps {
    fn bind(&self, s: &SocketState, addr: &SockAddr) -> Result<()> {
        let path = unix_path(addr)?;
        let kind = s.kind.lock();
        let SocketKind::UnixDgram { sock } = &*kind else {
            return Err(Status::Internal);
        };
        unix::bind_dgram(path, sock)
    }

    fn connect(&self, s: &SocketState, addr: &SockAddr) -> Result<()> {
        let path = unix_path(addr)?;
        let kind = s.kind.lock();
        let SocketKind::UnixDgram { sock } = &*kind else {
            return Err(Status::Internal);
        };
        *sock.peer.write() = Some(String::from(path));
        Ok(())
    }

    fn listen(&self, _s: &SocketState, _backlog: usize) -> Result<()> {
        Err(Status::InvalidOperation)
    }

    fn accept(&self, _s: &SocketState, _nonblock: bool) -> Result<(Arc<Vnode>, Option<SockAddr>)> {
        Err(Status::InvalidOperation)
    }

    fn send_to(&self, s: &SocketState, data: &[u8], addr: Option<&SockAddr>) -> Result<usize> {
        let (from, to) = {
            let kind = s.kind.lock();
            let SocketKind::UnixDgram { sock } = &*kind else {
                return Err(Status::Internal);
            };
            let to = match addr {
                Some(a) => String::from(unix_path(a)?),
                None => sock.peer.read().clone().ok_or(Status::NotConnected)?,
            };
            let from = sock.path.read().clone();
            (from, to)
        };
        unix::send_dgram(from.as_deref(), &to, data)
    }

    fn recv_from(
        &self,
        s: &SocketState,
        buf: &mut [u8],
        nonblock: bool,
    ) -> Result<(usize, Option<SockAddr>)> {
        let sock = {
            let kind = s.kind.lock();
            let SocketKind::UnixDgram { sock } = &*kind else {
                return Err(Status::Internal);
            };
            sock.clone()
        };
        let (n, from) = sock.recv_from(buf, nonblock)?;
        Ok((n, from.map(SockAddr::Unix)))
    }

    fn shutdown(&self, s: &SocketState) -> Result<()> {
        let kind = s.kind.lock();
        if let SocketKind::UnixDgram { sock } = &*kind {
            if let Some(path) = sock.path.read().clone() {
                unix::unbind(&path);
            }
        }
        Ok(())
    }

    fn sockname(&self, s: &SocketState) -> Result<SockAddr> {
        let kind = s.kind.lock();
        let SocketKind::UnixDgram { sock } = &*kind else {
            return Err(Status::Internal);
        };
        let result = sock.path
            .read()
            .clone()
            .map(SockAddr::Unix)
            .ok_or(Status::NotConnected);
        result
    }

    fn peername(&self, s: &SocketState) -> Result<SockAddr> {
        let kind = s.kind.lock();
        let SocketKind::UnixDgram { sock } = &*kind else {
            return Err(Status::Internal);
        };
        let result = sock.peer
            .read()
            .clone()
            .map(SockAddr::Unix)
            .ok_or(Status::NotConnected);
        result
    }
}

/// Options settable through setsockopt.
pub const SO_TTL: u32 = 1;
pub const SO_HDRINCL: u32 = 2;

pub fn setsockopt(s: &Arc<SocketState>, opt: u32, value: u32) -> Result<()> {
    match opt {
        SO_TTL => {
            if value == 0 || value > 255 {
                return Err(Status::InvalidArgument);
            }
            s.ttl.store(value as u8, Ordering::Relaxed);
            Ok(())
        }
        SO_HDRINCL => {
            s.hdrincl.store(value != 0, Ordering::Relaxed);
            Ok(())
        }
        _ => Err(Status::InvalidArgument),
    }
}

pub fn getsockopt(s: &Arc<SocketState>, opt: u32) -> Result<u32> {
    match opt {
        SO_TTL => Ok(s.ttl.load(Ordering::Relaxed) as u32),
        SO_HDRINCL => Ok(s.hdrincl.load(Ordering::Relaxed) as u32),
        _ => Err(Status::InvalidArgument),
    }
}
