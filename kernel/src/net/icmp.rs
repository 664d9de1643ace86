//! ICMP
//!
//! Echo request/reply plus the error messages route discovery
//! classifies: TIME_EXCEEDED (probe died in transit) and DESTINATION
//! UNREACHABLE with code PORT (probe reached the destination host).

use alloc::{sync::Arc, vec::Vec};

use super::ip::{self, Ipv4Address, Ipv4Header};
use super::Interface;
use crate::error::Result;

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_DEST_UNREACHABLE: u8 = 3;
pub const TYPE_ECHO_REQUEST: u8 = 8;
pub const TYPE_TIME_EXCEEDED: u8 = 11;

pub const CODE_PORT_UNREACHABLE: u8 = 3;
pub const CODE_TTL_EXCEEDED: u8 = 0;

#[derive(Debug, Clone)]
pub struct IcmpMessage {
    pub icmp_type: u8,
    pub code: u8,
    /// Echo id/seq or unused field, as raw rest-of-header.
    pub rest: u32,
    pub payload: Vec<u8>,
}

impl IcmpMessage {
    pub const HEADER_SIZE: usize = 8;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::HEADER_SIZE + self.payload.len());
        bytes.push(self.icmp_type);
        bytes.push(self.code);
        bytes.extend_from_slice(&[0, 0]); // checksum slot
        bytes.extend_from_slice(&self.rest.to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        let csum = ip::checksum_finish(ip::checksum_fold(0, &bytes));
        bytes[2..4].copy_from_slice(&csum.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::HEADER_SIZE {
            return None;
        }
        Some(Self {
            icmp_type: bytes[0],
            code: bytes[1],
            rest: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            payload: bytes[Self::HEADER_SIZE..].to_vec(),
        })
    }
}

/// Handle a received ICMP message.
pub fn process(iface: &Arc<Interface>, header: &Ipv4Header, payload: &[u8]) {
    let Some(msg) = IcmpMessage::from_bytes(payload) else {
        return;
    };
    match msg.icmp_type {
        TYPE_ECHO_REQUEST => {
            let reply = IcmpMessage {
                icmp_type: TYPE_ECHO_REPLY,
                code: 0,
                rest: msg.rest,
                payload: msg.payload,
            };
            let _ = send(iface, header.dest, header.source, header.source, 64, &reply);
        }
        TYPE_TIME_EXCEEDED | TYPE_DEST_UNREACHABLE => {
            // The payload quotes the offending IPv4 header + 8 bytes;
            // route discovery matches its probes there.
            super::route::on_icmp_error(header, &msg);
        }
        _ => {}
    }
}

pub fn send(
    iface: &Arc<Interface>,
    source: Ipv4Address,
    dest: Ipv4Address,
    next_hop: Ipv4Address,
    ttl: u8,
    msg: &IcmpMessage,
) -> Result<()> {
    ip::send(
        iface,
        source,
        dest,
        next_hop,
        ip::PROTO_ICMP,
        ttl,
        &msg.to_bytes(),
    )
}
