//! TCP
//!
//! Segment codec, per-interface connection/listener tables and a
//! sequence-tracked state machine: three-way handshake, in-order data
//! with cumulative ACKs, FIN teardown. Segments are never transmitted
//! while a TCB lock is held — on the loopback interface delivery is
//! synchronous and re-enters the state machine immediately.

use alloc::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    vec::Vec,
};
use core::sync::atomic::{AtomicU32, Ordering};

use super::ip::{self, Ipv4Address, Ipv4Header, SocketAddrV4};
use super::Interface;
use crate::error::{Result, Status};
use crate::sync::event::Event;
use crate::sync::wait;

pub const FLAG_FIN: u8 = 1 << 0;
pub const FLAG_SYN: u8 = 1 << 1;
pub const FLAG_RST: u8 = 1 << 2;
pub const FLAG_PSH: u8 = 1 << 3;
pub const FLAG_ACK: u8 = 1 << 4;

const DEFAULT_WINDOW: u16 = 0x4000;

#[derive(Debug, Clone)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    pub checksum: u16,
}

impl TcpHeader {
    pub const SIZE: usize = 20;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.seq.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.ack.to_be_bytes());
        bytes[12] = (Self::SIZE as u8 / 4) << 4;
        bytes[13] = self.flags;
        bytes[14..16].copy_from_slice(&self.window.to_be_bytes());
        bytes[16..18].copy_from_slice(&self.checksum.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Status::InvalidArgument);
        }
        Ok(Self {
            src_port: u16::from_be_bytes([bytes[0], bytes[1]]),
            dst_port: u16::from_be_bytes([bytes[2], bytes[3]]),
            seq: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            ack: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            flags: bytes[13],
            window: u16::from_be_bytes([bytes[14], bytes[15]]),
            checksum: u16::from_be_bytes([bytes[16], bytes[17]]),
        })
    }

    pub fn data_offset(bytes: &[u8]) -> usize {
        ((bytes[12] >> 4) as usize) * 4
    }

    fn fill_checksum(&mut self, src: Ipv4Address, dst: Ipv4Address, payload: &[u8]) {
        self.checksum = 0;
        let len = Self::SIZE + payload.len();
        let mut sum = Ipv4Header::pseudo_sum(src, dst, ip::PROTO_TCP, len);
        sum = ip::checksum_fold(sum, &self.to_bytes());
        sum = ip::checksum_fold(sum, payload);
        self.checksum = ip::checksum_finish(sum);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    LastAck,
    Closing,
    TimeWait,
}

struct Tcb {
    state: TcpState,
    snd_nxt: u32,
    snd_una: u32,
    rcv_nxt: u32,
    rx: VecDeque<u8>,
    peer_closed: bool,
}

pub struct TcpConn {
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
    tcb: spin::Mutex<Tcb>,
    pub rx_ready: Event,
    pub state_change: Event,
    /// Listener this connection was spawned from, if any.
    parent: spin::Mutex<Option<Arc<TcpListener>>>,
}

impl TcpConn {
    fn new(local: SocketAddrV4, remote: SocketAddrV4, state: TcpState, iss: u32) -> Arc<TcpConn> {
        Arc::new(TcpConn {
            local,
            remote,
            tcb: spin::Mutex::new(Tcb {
                state,
                snd_nxt: iss,
                snd_una: iss,
                rcv_nxt: 0,
                rx: VecDeque::new(),
                peer_closed: false,
            }),
            rx_ready: Event::notification(),
            state_change: Event::notification(),
            parent: spin::Mutex::new(None),
        })
    }

    pub fn state(&self) -> TcpState {
        self.tcb.lock().state
    }

    pub fn rx_pending(&self) -> usize {
        self.tcb.lock().rx.len()
    }
}

pub struct TcpListener {
    pub local: SocketAddrV4,
    backlog: spin::Mutex<VecDeque<Arc<TcpConn>>>,
    capacity: usize,
    pub pending_ready: Event,
}

/// Per-interface connection and listener tables, keyed the classic way:
/// (local port, remote addr, remote port) for connections.
pub struct ConnTable {
    conns: spin::Mutex<BTreeMap<(u16, Ipv4Address, u16), Arc<TcpConn>>>,
    listeners: spin::Mutex<BTreeMap<u16, Arc<TcpListener>>>,
}

impl ConnTable {
    pub fn new() -> Self {
        Self {
            conns: spin::Mutex::new(BTreeMap::new()),
            listeners: spin::Mutex::new(BTreeMap::new()),
        }
    }
}

impl Default for ConnTable {
    fn default() -> Self {
        Self::new()
    }
}

static NEXT_ISS: AtomicU32 = AtomicU32::new(0x1000);
static NEXT_EPHEMERAL: AtomicU32 = AtomicU32::new(49152);

fn new_iss() -> u32 {
    NEXT_ISS.fetch_add(0x10001, Ordering::Relaxed)
}

fn ephemeral_port() -> u16 {
    (NEXT_EPHEMERAL.fetch_add(1, Ordering::Relaxed) % 16384 + 49152) as u16
}

/// Transmit one segment. Called with no TCB locks held.
fn send_segment(
    src: SocketAddrV4,
    dst: SocketAddrV4,
    seq: u32,
    ack: u32,
    flags: u8,
    payload: &[u8],
) -> Result<()> {
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
    let mut header = TcpHeader {
        src_port: src.port,
        dst_port: dst.port,
        seq,
        ack,
        flags,
        window: DEFAULT_WINDOW,
        checksum: 0,
    };
    header.fill_checksum(source_addr, dst.addr, payload);
    let mut packet = Vec::with_capacity(TcpHeader::SIZE + payload.len());
    packet.extend_from_slice(&header.to_bytes());
    packet.extend_from_slice(payload);
    ip::send(
        &iface,
        source_addr,
        dst.addr,
        next_hop,
        ip::PROTO_TCP,
        ttl,
        &packet,
    )
}

pub fn listen(local: SocketAddrV4, backlog: usize) -> Result<Arc<TcpListener>> {
    let listener = Arc::new(TcpListener {
        local,
        backlog: spin::Mutex::new(VecDeque::new()),
        capacity: backlog.max(1),
        pending_ready: Event::notification(),
    });
    let mut registered = false;
    for iface in super::interfaces() {
        if local.addr.is_unspecified() || iface.has_addr(local.addr) {
            let mut listeners = iface.tcp.listeners.lock();
            if listeners.contains_key(&local.port) {
                return Err(Status::AddressInUse);
            }
            listeners.insert(local.port, listener.clone());
            registered = true;
        }
    }
    if !registered {
        return Err(Status::NotFound);
    }
    Ok(listener)
}

/// Take one established connection off the backlog.
pub fn accept(listener: &Arc<TcpListener>, nonblock: bool) -> Result<Arc<TcpConn>> {
    loop {
        {
            let mut backlog = listener.backlog.lock();
            if let Some(conn) = backlog.pop_front() {
                if backlog.is_empty() {
                    listener.pending_ready.clear();
                }
                return Ok(conn);
            }
        }
        if nonblock {
            return Err(Status::WouldBlock);
        }
        wait::wait_on(listener.pending_ready.header())?;
    }
}

/// Active open; blocks until established (or refused).
pub fn connect(local: Option<SocketAddrV4>, remote: SocketAddrV4) -> Result<Arc<TcpConn>> {
    let local = local.unwrap_or(SocketAddrV4::new(Ipv4Address::UNSPECIFIED, 0));
    let local = SocketAddrV4::new(
        local.addr,
        if local.port == 0 {
            ephemeral_port()
        } else {
            local.port
        },
    );

    let iss = new_iss();
    let conn = TcpConn::new(local, remote, TcpState::SynSent, iss);

    // Register before the SYN goes out: a loopback SYN-ACK arrives
    // inside send_segment.
    let (iface, _, _) = super::route::address_route(remote.addr)?;
    iface
        .tcp
        .conns
        .lock()
        .insert((local.port, remote.addr, remote.port), conn.clone());

    {
        let mut tcb = conn.tcb.lock();
        tcb.snd_nxt = iss.wrapping_add(1);
    }
    send_segment(local, remote, iss, 0, FLAG_SYN, &[])?;

    loop {
        match conn.state() {
            TcpState::Established => return Ok(conn),
            TcpState::Closed => return Err(Status::ConnectionRefused),
            _ => {
                conn.state_change.clear();
                if conn.state() == TcpState::Established {
                    return Ok(conn);
                }
                wait::wait_on(conn.state_change.header())?;
            }
        }
    }
}

/// Send application data; appends to the peer in order.
pub fn send(conn: &Arc<TcpConn>, data: &[u8]) -> Result<usize> {
    let (seq, ack) = {
        let mut tcb = conn.tcb.lock();
        match tcb.state {
            TcpState::Established | TcpState::CloseWait => {}
            _ => return Err(Status::NotConnected),
        }
        let seq = tcb.snd_nxt;
        tcb.snd_nxt = tcb.snd_nxt.wrapping_add(data.len() as u32);
        (seq, tcb.rcv_nxt)
    };
    send_segment(
        conn.local,
        conn.remote,
        seq,
        ack,
        FLAG_ACK | FLAG_PSH,
        data,
    )?;
    Ok(data.len())
}

/// Receive in-order data; EOF (Ok(0)) once the peer's FIN is consumed.
pub fn recv(conn: &Arc<TcpConn>, buf: &mut [u8], nonblock: bool) -> Result<usize> {
    loop {
        {
            let mut tcb = conn.tcb.lock();
            if !tcb.rx.is_empty() {
                let n = buf.len().min(tcb.rx.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = tcb.rx.pop_front().unwrap_or(0);
                }
                if tcb.rx.is_empty() {
                    conn.rx_ready.clear();
                }
                return Ok(n);
            }
            if tcb.peer_closed {
                return Ok(0);
            }
            if tcb.state == TcpState::Closed {
                return Err(Status::ConnectionReset);
            }
        }
        if nonblock {
            return Err(Status::WouldBlock);
        }
        wait::wait_on(conn.rx_ready.header())?;
    }
}

/// Close our sending side (FIN); full teardown completes via the state
/// machine.
pub fn shutdown(conn: &Arc<TcpConn>) -> Result<()> {
    let (seq, ack, proceed) = {
        let mut tcb = conn.tcb.lock();
        let proceed = match tcb.state {
            TcpState::Established => {
                tcb.state = TcpState::FinWait1;
                true
            }
            TcpState::CloseWait => {
                tcb.state = TcpState::LastAck;
                true
            }
            _ => false,
        };
        let seq = tcb.snd_nxt;
        if proceed {
            tcb.snd_nxt = tcb.snd_nxt.wrapping_add(1);
        }
        (seq, tcb.rcv_nxt, proceed)
    };
    if proceed {
        send_segment(conn.local, conn.remote, seq, ack, FLAG_FIN | FLAG_ACK, &[])?;
    }
    Ok(())
}

/// Demux one received TCP segment.
pub fn process(iface: &Arc<Interface>, ip_header: &Ipv4Header, payload: &[u8]) {
    let Ok(header) = TcpHeader::from_bytes(payload) else {
        return;
    };
    let doff = TcpHeader::data_offset(payload);
    if doff < TcpHeader::SIZE || payload.len() < doff {
        return;
    }
    let data = &payload[doff..];

    let key = (header.dst_port, ip_header.source, header.src_port);
    let conn = iface.tcp.conns.lock().get(&key).cloned();
    if let Some(conn) = conn {
        handle_segment(iface, &conn, &header, data);
        return;
    }

    if header.flags & FLAG_SYN != 0 && header.flags & FLAG_ACK == 0 {
        let listener = iface.tcp.listeners.lock().get(&header.dst_port).cloned();
        if let Some(listener) = listener {
            handle_passive_open(iface, &listener, ip_header, &header);
            return;
        }
    }

    // No socket: answer with RST (unless this already was one).
    if header.flags & FLAG_RST == 0 {
        let _ = send_segment(
            SocketAddrV4::new(ip_header.dest, header.dst_port),
            SocketAddrV4::new(ip_header.source, header.src_port),
            header.ack,
            header.seq.wrapping_add(1),
            FLAG_RST | FLAG_ACK,
            &[],
        );
    }
}

fn handle_passive_open(
    iface: &Arc<Interface>,
    listener: &Arc<TcpListener>,
    ip_header: &Ipv4Header,
    header: &TcpHeader,
) {
    if listener.backlog.lock().len() >= listener.capacity {
        return; // drop; client retries
    }
    let local = SocketAddrV4::new(ip_header.dest, header.dst_port);
    let remote = SocketAddrV4::new(ip_header.source, header.src_port);
    let iss = new_iss();
    let conn = TcpConn::new(local, remote, TcpState::SynReceived, iss);
    *conn.parent.lock() = Some(listener.clone());
    {
        let mut tcb = conn.tcb.lock();
        tcb.rcv_nxt = header.seq.wrapping_add(1);
        tcb.snd_nxt = iss.wrapping_add(1);
    }
    iface
        .tcp
        .conns
        .lock()
        .insert((local.port, remote.addr, remote.port), conn.clone());
    let ack = conn.tcb.lock().rcv_nxt;
    let _ = send_segment(local, remote, iss, ack, FLAG_SYN | FLAG_ACK, &[]);
}

fn handle_segment(iface: &Arc<Interface>, conn: &Arc<TcpConn>, header: &TcpHeader, data: &[u8]) {
    enum Reply {
        None,
        Ack,
    }
    let mut reply = Reply::None;
    let mut notify_listener = false;

    {
        let mut tcb = conn.tcb.lock();

        if header.flags & FLAG_RST != 0 {
            tcb.state = TcpState::Closed;
            drop(tcb);
            conn.state_change.set();
            conn.rx_ready.set();
            remove_conn(iface, conn);
            return;
        }

        match tcb.state {
            TcpState::SynSent => {
                if header.flags & (FLAG_SYN | FLAG_ACK) == FLAG_SYN | FLAG_ACK {
                    tcb.rcv_nxt = header.seq.wrapping_add(1);
                    tcb.snd_una = header.ack;
                    tcb.state = TcpState::Established;
                    reply = Reply::Ack;
                }
            }
            TcpState::SynReceived => {
                if header.flags & FLAG_ACK != 0 {
                    tcb.snd_una = header.ack;
                    tcb.state = TcpState::Established;
                    notify_listener = true;
                }
            }
            TcpState::Established
            | TcpState::FinWait1
            | TcpState::FinWait2
            | TcpState::CloseWait => {
                if header.flags & FLAG_ACK != 0 {
                    tcb.snd_una = header.ack;
                    // ACK of our FIN advances the close states.
                    if tcb.state == TcpState::FinWait1 && tcb.snd_una == tcb.snd_nxt {
                        tcb.state = TcpState::FinWait2;
                    }
                }
                if !data.is_empty() && header.seq == tcb.rcv_nxt {
                    tcb.rx.extend(data.iter().copied());
                    tcb.rcv_nxt = tcb.rcv_nxt.wrapping_add(data.len() as u32);
                    reply = Reply::Ack;
                }
                // The FIN occupies the sequence slot right after any
                // data it rode in with.
                if header.flags & FLAG_FIN != 0
                    && header.seq.wrapping_add(data.len() as u32) == tcb.rcv_nxt
                {
                    tcb.rcv_nxt = tcb.rcv_nxt.wrapping_add(1);
                    tcb.peer_closed = true;
                    tcb.state = match tcb.state {
                        TcpState::Established => TcpState::CloseWait,
                        TcpState::FinWait1 => TcpState::Closing,
                        TcpState::FinWait2 => TcpState::TimeWait,
                        other => other,
                    };
                    reply = Reply::Ack;
                }
            }
            TcpState::LastAck => {
                if header.flags & FLAG_ACK != 0 && header.ack == tcb.snd_nxt {
                    tcb.state = TcpState::Closed;
                }
            }
            TcpState::Closing => {
                if header.flags & FLAG_ACK != 0 && header.ack == tcb.snd_nxt {
                    tcb.state = TcpState::TimeWait;
                }
            }
            _ => {}
        }
    }

    conn.state_change.set();
    if conn.rx_pending() > 0 || conn.tcb.lock().peer_closed {
        conn.rx_ready.set();
    }
    if notify_listener {
        if let Some(listener) = conn.parent.lock().clone() {
            listener.backlog.lock().push_back(conn.clone());
            listener.pending_ready.set();
        }
    }

    if matches!(reply, Reply::Ack) {
        let (seq, ack) = {
            let tcb = conn.tcb.lock();
            (tcb.snd_nxt, tcb.rcv_nxt)
        };
        let _ = send_segment(conn.local, conn.remote, seq, ack, FLAG_ACK, &[]);
    }

    let final_state = conn.state();
    if matches!(final_state, TcpState::Closed | TcpState::TimeWait) {
        remove_conn(iface, conn);
    }
}

fn remove_conn(iface: &Arc<Interface>, conn: &Arc<TcpConn>) {
    iface
        .tcp
        .conns
        .lock()
        .remove(&(conn.local.port, conn.remote.addr, conn.remote.port));
}
