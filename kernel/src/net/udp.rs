//! UDP
//!
//! Header codec with the pseudo-header checksum, the per-interface port
//! table, and datagram delivery. Received payloads are refcounted
//! packet buffers so one datagram can sit in several sockets' queues
//! (broadcast) and die with the last reader.

use alloc::{collections::BTreeMap, collections::VecDeque, sync::Arc, vec::Vec};

use super::ip::{self, Ipv4Address, Ipv4Header, SocketAddrV4};
use super::Interface;
use crate::error::{Result, Status};
use crate::sync::event::Event;
use crate::sync::wait;

#[derive(Debug, Clone)]
pub struct UdpHeader {
    pub source_port: u16,
    pub dest_port: u16,
    pub length: u16,
    pub checksum: u16,
}

impl UdpHeader {
    pub const SIZE: usize = 8;

    pub fn new(src_port: u16, dst_port: u16, payload_len: usize) -> Self {
        Self {
            source_port: src_port,
            dest_port: dst_port,
            length: (Self::SIZE + payload_len) as u16,
            checksum: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.source_port.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.dest_port.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.length.to_be_bytes());
        bytes[6..8].copy_from_slice(&self.checksum.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Status::InvalidArgument);
        }
        Ok(Self {
            source_port: u16::from_be_bytes([bytes[0], bytes[1]]),
            dest_port: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            checksum: u16::from_be_bytes([bytes[6], bytes[7]]),
        })
    }

    pub fn fill_checksum(&mut self, src: Ipv4Address, dst: Ipv4Address, payload: &[u8]) {
        self.checksum = 0;
        let mut sum = Ipv4Header::pseudo_sum(src, dst, ip::PROTO_UDP, self.length as usize);
        sum = ip::checksum_fold(sum, &self.to_bytes());
        sum = ip::checksum_fold(sum, payload);
        let folded = ip::checksum_finish(sum);
        // All-zero means "no checksum" on the wire; transmit the
        // ones'-complement representation instead.
        self.checksum = if folded == 0 { 0xFFFF } else { folded };
    }
}

/// One received datagram; shared until every queue drops it.
pub struct Datagram {
    pub data: Vec<u8>,
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
}

/// A bound UDP port: receive queue plus its data event.
pub struct UdpBind {
    pub local: SocketAddrV4,
    queue: spin::Mutex<VecDeque<Arc<Datagram>>>,
    pub data_ready: Event,
}

impl UdpBind {
    fn new(local: SocketAddrV4) -> Arc<UdpBind> {
        Arc::new(UdpBind {
            local,
            queue: spin::Mutex::new(VecDeque::new()),
            data_ready: Event::notification(),
        })
    }

    pub fn deliver(&self, datagram: Arc<Datagram>) {
        self.queue.lock().push_back(datagram);
        self.data_ready.set();
    }

    /// Take the next datagram; blocks on the bind's event unless
    /// `nonblock`.
    pub fn recv(&self, nonblock: bool) -> Result<Arc<Datagram>> {
        loop {
            {
                let mut queue = self.queue.lock();
                if let Some(datagram) = queue.pop_front() {
                    if queue.is_empty() {
                        self.data_ready.clear();
                    }
                    return Ok(datagram);
                }
            }
            if nonblock {
                return Err(Status::WouldBlock);
            }
            wait::wait_on(self.data_ready.header())?;
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Per-interface UDP port map.
pub struct PortTable {
    binds: spin::Mutex<BTreeMap<u16, Arc<UdpBind>>>,
}

impl PortTable {
    pub fn new() -> Self {
        Self {
            binds: spin::Mutex::new(BTreeMap::new()),
        }
    }

    fn lookup(&self, port: u16) -> Option<Arc<UdpBind>> {
        self.binds.lock().get(&port).cloned()
    }
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}

const EPHEMERAL_BASE: u16 = 49152;

/// Bind `local`; the unspecified address binds on every interface.
/// Port 0 picks a free ephemeral port, retrying if a racing bind takes
/// the candidate first.
pub fn bind(local: SocketAddrV4) -> Result<Arc<UdpBind>> {
    let interfaces = super::interfaces();
    let auto = local.port == 0;
    for _ in 0..16 {
        let port = if auto {
            allocate_ephemeral(&interfaces)?
        } else {
            local.port
        };
        match try_bind_port(&interfaces, local.addr, port) {
            Ok(bind) => return Ok(bind),
            Err(Status::AddressInUse) if auto => continue,
            Err(e) => return Err(e),
        }
    }
    Err(Status::PortExhausted)
}

fn try_bind_port(
    interfaces: &[Arc<Interface>],
    addr: Ipv4Address,
    port: u16,
) -> Result<Arc<UdpBind>> {
    let bind = UdpBind::new(SocketAddrV4::new(addr, port));
    let mut claimed: Vec<&Arc<Interface>> = Vec::new();
    for iface in interfaces {
        if addr.is_unspecified() || iface.has_addr(addr) {
            let mut binds = iface.udp_ports.binds.lock();
            if binds.contains_key(&port) {
                // Roll back partial claims before reporting the clash.
                drop(binds);
                for done in claimed {
                    done.udp_ports.binds.lock().remove(&port);
                }
                return Err(Status::AddressInUse);
            }
            binds.insert(port, bind.clone());
            claimed.push(iface);
        }
    }
    if claimed.is_empty() {
        return Err(Status::NotFound);
    }
    Ok(bind)
}

fn allocate_ephemeral(interfaces: &[Arc<Interface>]) -> Result<u16> {
    for port in EPHEMERAL_BASE..u16::MAX {
        if interfaces
            .iter()
            .all(|i| i.udp_ports.lookup(port).is_none())
        {
            return Ok(port);
        }
    }
    Err(Status::PortExhausted)
}

pub fn unbind(bind: &Arc<UdpBind>) {
    for iface in super::interfaces() {
        let mut binds = iface.udp_ports.binds.lock();
        if let Some(existing) = binds.get(&bind.local.port) {
            if Arc::ptr_eq(existing, bind) {
                binds.remove(&bind.local.port);
            }
        }
    }
    bind.data_ready.abort_waiters();
}

/// Send one datagram from `src` to `dst`, routing as needed.
pub fn send_to(src: SocketAddrV4, dst: SocketAddrV4, payload: &[u8], ttl_override: Option<u8>) -> Result<usize> {
    if payload.len() > u16::MAX as usize - UdpHeader::SIZE - Ipv4Header::SIZE {
        return Err(Status::MessageTooLarge);
    }
    let (iface, next_hop, ttl) = super::route::address_route(dst.addr)?;
    let source_addr = if src.addr.is_unspecified() {
        if iface.is_loopback {
            Ipv4Address::LOOPBACK
        } else {
            iface.first_addr()
        }
    } else {
        src.addr
    };

    let mut header = UdpHeader::new(src.port, dst.port, payload.len());
    header.fill_checksum(source_addr, dst.addr, payload);
    let mut packet = Vec::with_capacity(UdpHeader::SIZE + payload.len());
    packet.extend_from_slice(&header.to_bytes());
    packet.extend_from_slice(payload);

    ip::send(
        &iface,
        source_addr,
        dst.addr,
        next_hop,
        ip::PROTO_UDP,
        ttl_override.unwrap_or(ttl),
        &packet,
    )?;
    Ok(payload.len())
}

/// Deliver one received UDP packet to its bound port.
pub fn process(iface: &Arc<Interface>, ip_header: &Ipv4Header, payload: &[u8]) {
    let Ok(header) = UdpHeader::from_bytes(payload) else {
        return;
    };
    let data_len = (header.length as usize)
        .saturating_sub(UdpHeader::SIZE)
        .min(payload.len() - UdpHeader::SIZE);
    let data = &payload[UdpHeader::SIZE..UdpHeader::SIZE + data_len];

    match iface.udp_ports.lookup(header.dest_port) {
        Some(bind) => {
            // Address-bound sockets only accept their own address.
            if !bind.local.addr.is_unspecified() && bind.local.addr != ip_header.dest {
                return;
            }
            bind.deliver(Arc::new(Datagram {
                data: data.to_vec(),
                src: SocketAddrV4::new(ip_header.source, header.source_port),
                dst: SocketAddrV4::new(ip_header.dest, header.dest_port),
            }));
        }
        None => {
            // Closed port: emit the unreachable that traceroute-style
            // discovery (and plain clients) depend on.
            let mut quoted = Vec::with_capacity(Ipv4Header::SIZE + 8);
            quoted.extend_from_slice(&ip_header.to_bytes());
            quoted.extend_from_slice(&payload[..payload.len().min(8)]);
            let msg = super::icmp::IcmpMessage {
                icmp_type: super::icmp::TYPE_DEST_UNREACHABLE,
                code: super::icmp::CODE_PORT_UNREACHABLE,
                rest: 0,
                payload: quoted,
            };
            let _ = super::icmp::send(
                iface,
                ip_header.dest,
                ip_header.source,
                ip_header.source,
                64,
                &msg,
            );
        }
    }
}
