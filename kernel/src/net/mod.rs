//! Network core
//!
//! Interface table, ARP cache, IPv4/ICMP/UDP/TCP, route discovery and
//! the socket layer. Frames enter through `process_frame` — on real
//! NICs a per-interface REAL_TIME dispatch thread pulls them via IRPs
//! against the NIC vnode; the loopback interface reflects transmits
//! straight back in.

pub mod arp;
pub mod ether;
pub mod icmp;
pub mod ip;
pub mod loopback;
pub mod route;
pub mod socket;
pub mod tcp;
pub mod udp;
pub mod unix;

#[cfg(test)]
mod tests;

use alloc::{string::String, sync::Arc, vec::Vec};

use crate::error::{Result, Status};

pub use ip::{Ipv4Address, SocketAddrV4};

/// 48-bit hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);
    pub const ZERO: MacAddress = MacAddress([0; 6]);
}

/// One configured address on an interface.
#[derive(Debug, Clone, Copy)]
pub struct IpEntry {
    pub addr: Ipv4Address,
    pub prefix: u8,
    pub broadcast: Ipv4Address,
}

impl IpEntry {
    pub fn contains(&self, other: Ipv4Address) -> bool {
        let mask = if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix as u32)
        };
        (u32::from(self.addr) & mask) == (u32::from(other) & mask)
    }
}

/// How frames leave an interface.
pub trait NicTransmit: Send + Sync {
    fn transmit(&self, frame: &[u8]) -> Result<()>;
}

pub struct Interface {
    pub index: usize,
    pub name: String,
    pub mac: MacAddress,
    pub ips: spin::RwLock<Vec<IpEntry>>,
    pub arp: arp::ArpCache,
    pub udp_ports: udp::PortTable,
    pub tcp: tcp::ConnTable,
    tx: spin::RwLock<Option<Arc<dyn NicTransmit>>>,
    /// Interface is the software loopback; transmits reflect back in.
    pub is_loopback: bool,
}

impl Interface {
    pub fn has_addr(&self, addr: Ipv4Address) -> bool {
        self.ips.read().iter().any(|e| e.addr == addr)
            || (self.is_loopback && addr.is_loopback())
    }

    pub fn local_match(&self, dest: Ipv4Address) -> bool {
        self.ips.read().iter().any(|e| e.contains(dest))
            || (self.is_loopback && dest.is_loopback())
    }

    pub fn first_addr(&self) -> Ipv4Address {
        self.ips
            .read()
            .first()
            .map(|e| e.addr)
            .unwrap_or(Ipv4Address::UNSPECIFIED)
    }

    pub fn transmit(self: &Arc<Interface>, frame: &[u8]) -> Result<()> {
        if self.is_loopback {
            // Reflect synchronously; the loopback has no wire.
            process_frame(self, frame);
            return Ok(());
        }
        let tx = self.tx.read().clone();
        match tx {
            Some(tx) => tx.transmit(frame),
            None => Err(Status::NetDown),
        }
    }
}

lazy_static::lazy_static! {
    static ref INTERFACES: spin::RwLock<Vec<Arc<Interface>>> = spin::RwLock::new(Vec::new());
}

/// Register an interface; returns it with its index assigned.
pub fn register_interface(
    name: &str,
    mac: MacAddress,
    tx: Option<Arc<dyn NicTransmit>>,
    is_loopback: bool,
) -> Arc<Interface> {
    let mut interfaces = INTERFACES.write();
    let iface = Arc::new(Interface {
        index: interfaces.len(),
        name: String::from(name),
        mac,
        ips: spin::RwLock::new(Vec::new()),
        arp: arp::ArpCache::new(),
        udp_ports: udp::PortTable::new(),
        tcp: tcp::ConnTable::new(),
        tx: spin::RwLock::new(tx),
        is_loopback,
    });
    interfaces.push(iface.clone());
    iface
}

pub fn interfaces() -> Vec<Arc<Interface>> {
    INTERFACES.read().clone()
}

pub fn interface_by_name(name: &str) -> Option<Arc<Interface>> {
    INTERFACES.read().iter().find(|i| i.name == name).cloned()
}

/// Interface owning `addr` locally.
pub fn interface_for(addr: Ipv4Address) -> Option<Arc<Interface>> {
    INTERFACES
        .read()
        .iter()
        .find(|i| i.has_addr(addr) || (i.is_loopback && addr.is_loopback()))
        .cloned()
}

/// Entry point for a received Ethernet frame (dispatch thread or
/// loopback reflection).
pub fn process_frame(iface: &Arc<Interface>, frame: &[u8]) {
    let Ok(eth) = ether::EthernetHeader::from_bytes(frame) else {
        return;
    };
    let payload = &frame[ether::EthernetHeader::SIZE..];
    match eth.ethertype {
        ether::ETHERTYPE_ARP => arp::process(iface, payload),
        ether::ETHERTYPE_IPV4 => ip::process(iface, payload),
        _ => {}
    }
}

/// Bring up the loopback interface (idempotent; used by init and every
/// network test).
pub fn init() -> Arc<Interface> {
    static LOOPBACK: spin::Once<Arc<Interface>> = spin::Once::new();
    LOOPBACK
        .call_once(|| {
            let iface = register_interface("lo", MacAddress::ZERO, None, true);
            iface.ips.write().push(IpEntry {
                addr: Ipv4Address::LOOPBACK,
                prefix: 8,
                broadcast: Ipv4Address([127, 255, 255, 255]),
            });
            iface
        })
        .clone()
}

/// Kernel hostname (get/set via syscalls).
lazy_static::lazy_static! {
    static ref HOSTNAME: spin::RwLock<String> = spin::RwLock::new(String::from("onyx"));
}

pub fn hostname() -> String {
    HOSTNAME.read().clone()
}

pub fn set_hostname(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        return Err(Status::InvalidArgument);
    }
    *HOSTNAME.write() = String::from(name);
    Ok(())
}
