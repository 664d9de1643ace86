//! ARP
//!
//! IP→MAC cache with signaling events for in-flight resolutions, plus
//! the request/reply wire codec. A resolve on a miss broadcasts a
//! request and blocks on the entry's event until the reply lands (or the
//! wait aborts on interface teardown).

use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};

use super::ip::Ipv4Address;
use super::{ether, Interface, MacAddress};
use crate::error::{Result, Status};
use crate::sync::event::Event;
use crate::sync::wait;

const OP_REQUEST: u16 = 1;
const OP_REPLY: u16 = 2;

struct ArpEntry {
    mac: Option<MacAddress>,
    resolved: Arc<Event>,
}

pub struct ArpCache {
    entries: spin::Mutex<BTreeMap<Ipv4Address, ArpEntry>>,
}

impl ArpCache {
    pub fn new() -> Self {
        Self {
            entries: spin::Mutex::new(BTreeMap::new()),
        }
    }

    pub fn lookup(&self, ip: Ipv4Address) -> Option<MacAddress> {
        self.entries.lock().get(&ip).and_then(|e| e.mac)
    }

    pub fn insert(&self, ip: Ipv4Address, mac: MacAddress) {
        let mut entries = self.entries.lock();
        match entries.get_mut(&ip) {
            Some(entry) => {
                entry.mac = Some(mac);
                entry.resolved.set();
            }
            None => {
                let resolved = Arc::new(Event::notification());
                resolved.set();
                entries.insert(
                    ip,
                    ArpEntry {
                        mac: Some(mac),
                        resolved,
                    },
                );
            }
        }
    }

    /// Event to wait on for a pending resolution, creating the pending
    /// entry if needed. Returns (event, already_resolved_mac).
    fn pending(&self, ip: Ipv4Address) -> (Arc<Event>, Option<MacAddress>) {
        let mut entries = self.entries.lock();
        match entries.get(&ip) {
            Some(entry) => (entry.resolved.clone(), entry.mac),
            None => {
                let resolved = Arc::new(Event::notification());
                entries.insert(
                    ip,
                    ArpEntry {
                        mac: None,
                        resolved: resolved.clone(),
                    },
                );
                (resolved, None)
            }
        }
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        for entry in entries.values() {
            entry.resolved.abort_waiters();
        }
        entries.clear();
    }
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new()
    }
}

const ARP_IPV4_SIZE: usize = 28;

fn build(op: u16, sender_mac: MacAddress, sender_ip: Ipv4Address, target_mac: MacAddress, target_ip: Ipv4Address) -> [u8; ARP_IPV4_SIZE] {
    let mut p = [0u8; ARP_IPV4_SIZE];
    p[0..2].copy_from_slice(&1u16.to_be_bytes()); // Ethernet
    p[2..4].copy_from_slice(&ether::ETHERTYPE_IPV4.to_be_bytes());
    p[4] = 6;
    p[5] = 4;
    p[6..8].copy_from_slice(&op.to_be_bytes());
    p[8..14].copy_from_slice(&sender_mac.0);
    p[14..18].copy_from_slice(&sender_ip.0);
    p[18..24].copy_from_slice(&target_mac.0);
    p[24..28].copy_from_slice(&target_ip.0);
    p
}

/// Resolve `ip` on `iface`, blocking on a pending entry.
pub fn resolve(iface: &Arc<Interface>, ip: Ipv4Address) -> Result<MacAddress> {
    if iface.is_loopback || ip.is_loopback() {
        return Ok(iface.mac);
    }
    if ip.is_broadcast() {
        return Ok(MacAddress::BROADCAST);
    }
    if let Some(mac) = iface.arp.lookup(ip) {
        return Ok(mac);
    }

    let (event, known) = iface.arp.pending(ip);
    if let Some(mac) = known {
        return Ok(mac);
    }

    // Broadcast the request, then wait for process() to fill the entry.
    let request = build(
        OP_REQUEST,
        iface.mac,
        iface.first_addr(),
        MacAddress::ZERO,
        ip,
    );
    let mut frame = Vec::with_capacity(ether::EthernetHeader::SIZE + ARP_IPV4_SIZE);
    frame.extend_from_slice(
        &ether::EthernetHeader {
            dest: MacAddress::BROADCAST,
            source: iface.mac,
            ethertype: ether::ETHERTYPE_ARP,
        }
        .to_bytes(),
    );
    frame.extend_from_slice(&request);
    iface.transmit(&frame)?;

    wait::wait_on(event.header())?;
    iface.arp.lookup(ip).ok_or(Status::HostUnreachable)
}

/// Handle a received ARP packet: learn the sender, answer requests for
/// our addresses.
pub fn process(iface: &Arc<Interface>, packet: &[u8]) {
    if packet.len() < ARP_IPV4_SIZE {
        return;
    }
    let op = u16::from_be_bytes([packet[6], packet[7]]);
    let mut sender_mac = [0u8; 6];
    sender_mac.copy_from_slice(&packet[8..14]);
    let sender_ip = Ipv4Address([packet[14], packet[15], packet[16], packet[17]]);
    let target_ip = Ipv4Address([packet[24], packet[25], packet[26], packet[27]]);

    iface.arp.insert(sender_ip, MacAddress(sender_mac));

    if op == OP_REQUEST && iface.has_addr(target_ip) {
        let reply = build(
            OP_REPLY,
            iface.mac,
            target_ip,
            MacAddress(sender_mac),
            sender_ip,
        );
        let mut frame = Vec::with_capacity(ether::EthernetHeader::SIZE + ARP_IPV4_SIZE);
        frame.extend_from_slice(
            &ether::EthernetHeader {
                dest: MacAddress(sender_mac),
                source: iface.mac,
                ethertype: ether::ETHERTYPE_ARP,
            }
            .to_bytes(),
        );
        frame.extend_from_slice(&reply);
        let _ = iface.transmit(&frame);
    }
}
