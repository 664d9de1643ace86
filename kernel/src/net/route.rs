//! Routing
//!
//! Static routes plus traceroute-derived route discovery: when several
//! gateways could reach a destination, each is probed with UDP datagrams
//! to an unlikely port at chosen TTLs and the returned ICMP classifies
//! it — TIME_EXCEEDED means the probe died too close, PORT_UNREACHABLE
//! means the route reaches the destination host, and the hop count is
//! `initial_ttl - response_ttl`. The best route (largest observed hop
//! count among reachable gateways) wins and is cached per destination.

use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU16, Ordering};

use super::icmp::{self, IcmpMessage};
use super::ip::{Ipv4Address, Ipv4Header, SocketAddrV4};
use super::udp::UdpHeader;
use super::Interface;
use crate::error::{Result, Status};
use crate::sync::event::Event;

/// Classic traceroute probe port base.
const PROBE_PORT_BASE: u16 = 33434;
const MAX_PROBE_TTL: u8 = 30;

#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub dest: Ipv4Address,
    pub prefix: u8,
    pub gateway: Option<Ipv4Address>,
    pub iface: usize,
}

impl Route {
    fn matches(&self, addr: Ipv4Address) -> bool {
        let mask = if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix as u32)
        };
        (u32::from(self.dest) & mask) == (u32::from(addr) & mask)
    }
}

/// A discovered route: gateway, interface, observed distance.
#[derive(Debug, Clone, Copy)]
pub struct CachedRoute {
    pub gateway: Ipv4Address,
    pub iface: usize,
    pub hops: u8,
    pub ttl: u8,
}

lazy_static::lazy_static! {
    static ref ROUTES: spin::RwLock<Vec<Route>> = spin::RwLock::new(Vec::new());
    static ref CACHE: spin::Mutex<BTreeMap<Ipv4Address, CachedRoute>> =
        spin::Mutex::new(BTreeMap::new());
    static ref PENDING_PROBES: spin::Mutex<BTreeMap<u16, ProbeSlot>> =
        spin::Mutex::new(BTreeMap::new());
}

pub fn add_route(route: Route) {
    ROUTES.write().push(route);
}

pub fn remove_route(dest: Ipv4Address, prefix: u8) {
    ROUTES
        .write()
        .retain(|r| !(r.dest == dest && r.prefix == prefix));
}

pub fn set_default_gateway(gateway: Ipv4Address, iface: usize) {
    let mut routes = ROUTES.write();
    routes.retain(|r| r.prefix != 0);
    routes.push(Route {
        dest: Ipv4Address::UNSPECIFIED,
        prefix: 0,
        gateway: Some(gateway),
        iface,
    });
}

pub fn unset_default_gateway() {
    ROUTES.write().retain(|r| r.prefix != 0);
}

pub fn clear_route_cache() {
    CACHE.lock().clear();
}

/// What one probe's ICMP answer tells us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// TIME_EXCEEDED: the TTL died before the destination — gateway path
    /// is longer than the TTL we gave it.
    TooClose,
    /// PORT_UNREACHABLE from the destination: the route works.
    ReachesDestination { hops: u8 },
    NoReply,
}

/// Classify an ICMP answer to a probe sent with `initial_ttl`.
pub fn classify_probe(initial_ttl: u8, icmp_type: u8, icmp_code: u8, response_ttl: u8) -> ProbeOutcome {
    match (icmp_type, icmp_code) {
        (icmp::TYPE_TIME_EXCEEDED, _) => ProbeOutcome::TooClose,
        (icmp::TYPE_DEST_UNREACHABLE, icmp::CODE_PORT_UNREACHABLE) => {
            ProbeOutcome::ReachesDestination {
                hops: initial_ttl.saturating_sub(response_ttl).max(1),
            }
        }
        _ => ProbeOutcome::NoReply,
    }
}

struct ProbeSlot {
    initial_ttl: u8,
    outcome: Option<ProbeOutcome>,
    answered: Arc<Event>,
}

/// Route `dest`: returns (interface, next hop, ttl to use).
pub fn address_route(dest: Ipv4Address) -> Result<(Arc<Interface>, Ipv4Address, u8)> {
    // 1. Local delivery: an interface owns the subnet (or loopback).
    for iface in super::interfaces() {
        if iface.local_match(dest) {
            return Ok((iface, dest, 64));
        }
    }

    // 2. Cached discovery result.
    if let Some(cached) = CACHE.lock().get(&dest).copied() {
        if let Some(iface) = super::interfaces().get(cached.iface).cloned() {
            return Ok((iface, cached.gateway, cached.ttl));
        }
    }

    // 3. Candidate gateways from the static table, most-specific first.
    let mut candidates: Vec<Route> = ROUTES
        .read()
        .iter()
        .filter(|r| r.matches(dest) && r.gateway.is_some())
        .copied()
        .collect();
    candidates.sort_by(|a, b| b.prefix.cmp(&a.prefix));
    if candidates.is_empty() {
        return Err(Status::HostUnreachable);
    }
    if candidates.len() == 1 {
        let r = candidates[0];
        let iface = super::interfaces()
            .get(r.iface)
            .cloned()
            .ok_or(Status::NetDown)?;
        return Ok((iface, r.gateway.unwrap_or(dest), 64));
    }

    // 4. Several ways out: probe each and keep the one with the largest
    // observed hop count that still reaches the destination.
    let mut best: Option<CachedRoute> = None;
    for route in candidates {
        let Some(iface) = super::interfaces().get(route.iface).cloned() else {
            continue;
        };
        let gateway = match route.gateway {
            Some(g) => g,
            None => continue,
        };
        if let Some(hops) = probe_gateway(&iface, gateway, dest) {
            let better = best.map(|b| hops > b.hops).unwrap_or(true);
            if better {
                best = Some(CachedRoute {
                    gateway,
                    iface: route.iface,
                    hops,
                    ttl: 64,
                });
            }
        }
    }

    let best = best.ok_or(Status::HostUnreachable)?;
    CACHE.lock().insert(dest, best);
    let iface = super::interfaces()
        .get(best.iface)
        .cloned()
        .ok_or(Status::NetDown)?;
    Ok((iface, best.gateway, best.ttl))
}

static NEXT_PROBE_PORT: AtomicU16 = AtomicU16::new(0);

/// Probe one gateway: UDP datagrams to an unlikely port, rising TTLs,
/// classify the ICMP answers. Returns the hop count when the route
/// reaches `dest`.
fn probe_gateway(iface: &Arc<Interface>, gateway: Ipv4Address, dest: Ipv4Address) -> Option<u8> {
    let mut ttl = 1u8;
    while ttl <= MAX_PROBE_TTL {
        let port =
            PROBE_PORT_BASE + (NEXT_PROBE_PORT.fetch_add(1, Ordering::Relaxed) % 512);
        let answered = Arc::new(Event::notification());
        PENDING_PROBES.lock().insert(
            port,
            ProbeSlot {
                initial_ttl: ttl,
                outcome: None,
                answered: answered.clone(),
            },
        );

        let sent = send_probe(iface, gateway, dest, port, ttl);
        let outcome = if sent.is_ok() {
            wait_bounded(&answered);
            PENDING_PROBES
                .lock()
                .remove(&port)
                .and_then(|slot| slot.outcome)
                .unwrap_or(ProbeOutcome::NoReply)
        } else {
            PENDING_PROBES.lock().remove(&port);
            ProbeOutcome::NoReply
        };

        match outcome {
            ProbeOutcome::ReachesDestination { hops } => return Some(hops),
            ProbeOutcome::TooClose => {
                // Died in transit; try again with more headroom.
                ttl = ttl.saturating_mul(2);
            }
            ProbeOutcome::NoReply => return None,
        }
    }
    None
}

fn send_probe(
    iface: &Arc<Interface>,
    gateway: Ipv4Address,
    dest: Ipv4Address,
    port: u16,
    ttl: u8,
) -> Result<()> {
    let src = SocketAddrV4::new(iface.first_addr(), PROBE_PORT_BASE);
    let mut header = UdpHeader::new(src.port, port, 0);
    header.fill_checksum(src.addr, dest, &[]);
    super::ip::send(
        iface,
        src.addr,
        dest,
        gateway,
        super::ip::PROTO_UDP,
        ttl,
        &header.to_bytes(),
    )
}

/// Bounded wait: the prober has no timer source, so it polls the event
/// with a capped spin. Answers on a live network arrive well inside the
/// bound; silence classifies as NoReply.
fn wait_bounded(event: &Arc<Event>) {
    for _ in 0..10_000 {
        if event.is_set() {
            return;
        }
        crate::arch::cpu_relax();
    }
}

/// ICMP error hook: match the quoted probe back to its slot.
pub fn on_icmp_error(outer: &Ipv4Header, msg: &IcmpMessage) {
    // Quoted bytes: offending IPv4 header + first 8 payload bytes.
    let Ok(quoted_ip) = Ipv4Header::from_bytes(&msg.payload) else {
        return;
    };
    if quoted_ip.protocol != super::ip::PROTO_UDP {
        return;
    }
    let hlen = Ipv4Header::header_len(&msg.payload);
    if msg.payload.len() < hlen + 4 {
        return;
    }
    let dest_port = u16::from_be_bytes([msg.payload[hlen + 2], msg.payload[hlen + 3]]);

    let mut pending = PENDING_PROBES.lock();
    if let Some(slot) = pending.get_mut(&dest_port) {
        slot.outcome = Some(classify_probe(
            slot.initial_ttl,
            msg.icmp_type,
            msg.code,
            outer.ttl,
        ));
        slot.answered.set();
    }
}

/// Static routes snapshot (interface ioctl surface).
pub fn routes() -> Vec<Route> {
    ROUTES.read().clone()
}
