//! Network core tests (loopback)

#![cfg(test)]

use super::ip::{Ipv4Address, SocketAddrV4};
use super::socket::{self, SockAddr, AF_INET, AF_UNIX, SOCK_DGRAM, SOCK_STREAM};
use super::*;
use crate::error::Status;

fn setup() {
    crate::test_support::init();
}

mod codec_tests {
    use super::*;

    #[test]
    fn ipv4_header_round_trip() {
        let header = ip::Ipv4Header::new(
            Ipv4Address([10, 0, 0, 1]),
            Ipv4Address([10, 0, 0, 2]),
            ip::PROTO_UDP,
            64,
            100,
        );
        let bytes = header.to_bytes();
        let parsed = ip::Ipv4Header::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.source, header.source);
        assert_eq!(parsed.dest, header.dest);
        assert_eq!(parsed.protocol, ip::PROTO_UDP);
        assert_eq!(parsed.total_len, 120);
        // Header checksum verifies to zero.
        assert_eq!(
            ip::checksum_finish(ip::checksum_fold(0, &bytes)),
            0
        );
    }

    #[test]
    fn udp_checksum_includes_pseudo_header() {
        let src = Ipv4Address([192, 168, 1, 1]);
        let dst = Ipv4Address([192, 168, 1, 2]);
        let payload = b"payload";
        let mut header = udp::UdpHeader::new(1000, 2000, payload.len());
        header.fill_checksum(src, dst, payload);
        assert_ne!(header.checksum, 0);

        // Verify: folding everything with the transmitted checksum
        // yields the all-ones complement.
        let mut sum = ip::Ipv4Header::pseudo_sum(src, dst, ip::PROTO_UDP, header.length as usize);
        sum = ip::checksum_fold(sum, &header.to_bytes());
        sum = ip::checksum_fold(sum, payload);
        assert_eq!(ip::checksum_finish(sum), 0);
    }

    #[test]
    fn ethernet_round_trip() {
        let hdr = ether::EthernetHeader {
            dest: MacAddress([1, 2, 3, 4, 5, 6]),
            source: MacAddress([7, 8, 9, 10, 11, 12]),
            ethertype: ether::ETHERTYPE_IPV4,
        };
        let parsed = ether::EthernetHeader::from_bytes(&hdr.to_bytes()).unwrap();
        assert_eq!(parsed.dest, hdr.dest);
        assert_eq!(parsed.source, hdr.source);
        assert_eq!(parsed.ethertype, ether::ETHERTYPE_IPV4);
    }

    #[test]
    fn tcp_header_round_trip() {
        let hdr = tcp::TcpHeader {
            src_port: 4000,
            dst_port: 80,
            seq: 0xDEADBEEF,
            ack: 0x1234,
            flags: tcp::FLAG_SYN | tcp::FLAG_ACK,
            window: 4096,
            checksum: 0,
        };
        let bytes = hdr.to_bytes();
        let parsed = tcp::TcpHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.seq, 0xDEADBEEF);
        assert_eq!(parsed.flags, tcp::FLAG_SYN | tcp::FLAG_ACK);
        assert_eq!(tcp::TcpHeader::data_offset(&bytes), 20);
    }
}

mod udp_tests {
    use super::*;

    #[test]
    fn loopback_datagram_round_trip() {
        setup();
        // Scenario: bind 0.0.0.0:33535, ping it from another socket.
        let server = socket::state_of(
            &socket::create(AF_INET, SOCK_DGRAM, 0).unwrap(),
        )
        .unwrap();
        socket::bind(
            &server,
            &SockAddr::Inet(SocketAddrV4::new(Ipv4Address::UNSPECIFIED, 33535)),
        )
        .unwrap();

        let client = socket::state_of(
            &socket::create(AF_INET, SOCK_DGRAM, 0).unwrap(),
        )
        .unwrap();
        let dest = SockAddr::Inet(SocketAddrV4::new(Ipv4Address::LOOPBACK, 33535));
        assert_eq!(socket::send_to(&client, b"ping", Some(&dest)).unwrap(), 4);

        let mut buf = [0u8; 16];
        let (n, from) = socket::recv_from(&server, &mut buf, true).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf[..4], b"ping");
        let Some(SockAddr::Inet(peer)) = from else {
            panic!("missing peer address");
        };
        assert_eq!(peer.addr, Ipv4Address::LOOPBACK);
        let SockAddr::Inet(client_local) = socket::getsockname(&client).unwrap() else {
            panic!("client has no name");
        };
        assert_eq!(peer.port, client_local.port);
    }

    #[test]
    fn bind_conflict_is_address_in_use() {
        setup();
        let a = socket::state_of(&socket::create(AF_INET, SOCK_DGRAM, 0).unwrap()).unwrap();
        let b = socket::state_of(&socket::create(AF_INET, SOCK_DGRAM, 0).unwrap()).unwrap();
        let addr = SockAddr::Inet(SocketAddrV4::new(Ipv4Address::UNSPECIFIED, 41000));
        socket::bind(&a, &addr).unwrap();
        assert_eq!(socket::bind(&b, &addr), Err(Status::AddressInUse));
    }

    #[test]
    fn recv_on_empty_nonblocking_socket_would_block() {
        setup();
        let s = socket::state_of(&socket::create(AF_INET, SOCK_DGRAM, 0).unwrap()).unwrap();
        socket::bind(
            &s,
            &SockAddr::Inet(SocketAddrV4::new(Ipv4Address::UNSPECIFIED, 41001)),
        )
        .unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(
            socket::recv_from(&s, &mut buf, true),
            Err(Status::WouldBlock)
        );
    }
}

mod tcp_tests {
    use super::*;

    #[test]
    fn handshake_data_and_close_over_loopback() {
        setup();
        let listener_sock =
            socket::state_of(&socket::create(AF_INET, SOCK_STREAM, 0).unwrap()).unwrap();
        socket::bind(
            &listener_sock,
            &SockAddr::Inet(SocketAddrV4::new(Ipv4Address::LOOPBACK, 8080)),
        )
        .unwrap();
        socket::listen(&listener_sock, 4).unwrap();

        let client =
            socket::state_of(&socket::create(AF_INET, SOCK_STREAM, 0).unwrap()).unwrap();
        socket::connect(
            &client,
            &SockAddr::Inet(SocketAddrV4::new(Ipv4Address::LOOPBACK, 8080)),
        )
        .unwrap();

        let (server_vn, peer) = socket::accept(&listener_sock, true).unwrap();
        let server = socket::state_of(&server_vn).unwrap();
        assert!(matches!(peer, Some(SockAddr::Inet(_))));

        assert_eq!(socket::send_to(&client, b"request", None).unwrap(), 7);
        let mut buf = [0u8; 16];
        let (n, _) = socket::recv_from(&server, &mut buf, true).unwrap();
        assert_eq!(&buf[..n], b"request");

        assert_eq!(socket::send_to(&server, b"reply", None).unwrap(), 5);
        let (n, _) = socket::recv_from(&client, &mut buf, true).unwrap();
        assert_eq!(&buf[..n], b"reply");

        // FIN from the client; the server reads EOF.
        socket::shutdown(&client).unwrap();
        let (n, _) = socket::recv_from(&server, &mut buf, true).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn connect_to_closed_port_is_refused() {
        setup();
        let client =
            socket::state_of(&socket::create(AF_INET, SOCK_STREAM, 0).unwrap()).unwrap();
        assert_eq!(
            socket::connect(
                &client,
                &SockAddr::Inet(SocketAddrV4::new(Ipv4Address::LOOPBACK, 1)),
            ),
            Err(Status::ConnectionRefused)
        );
    }
}

mod unix_tests {
    use super::*;

    #[test]
    fn stream_pair_over_listener() {
        setup();
        let server =
            socket::state_of(&socket::create(AF_UNIX, SOCK_STREAM, 0).unwrap()).unwrap();
        socket::bind(&server, &SockAddr::Unix(alloc::string::String::from("/run/test.sock")))
            .unwrap();
        socket::listen(&server, 1).unwrap();

        let client =
            socket::state_of(&socket::create(AF_UNIX, SOCK_STREAM, 0).unwrap()).unwrap();
        socket::connect(&client, &SockAddr::Unix(alloc::string::String::from("/run/test.sock")))
            .unwrap();
        let (accepted_vn, _) = socket::accept(&server, true).unwrap();
        let accepted = socket::state_of(&accepted_vn).unwrap();

        socket::send_to(&client, b"local", None).unwrap();
        let mut buf = [0u8; 8];
        let (n, _) = socket::recv_from(&accepted, &mut buf, true).unwrap();
        assert_eq!(&buf[..n], b"local");
    }

    #[test]
    fn dgram_delivery_by_path() {
        setup();
        let receiver =
            socket::state_of(&socket::create(AF_UNIX, SOCK_DGRAM, 0).unwrap()).unwrap();
        socket::bind(&receiver, &SockAddr::Unix(alloc::string::String::from("/run/dg.sock")))
            .unwrap();

        let sender =
            socket::state_of(&socket::create(AF_UNIX, SOCK_DGRAM, 0).unwrap()).unwrap();
        socket::send_to(
            &sender,
            b"dgram",
            Some(&SockAddr::Unix(alloc::string::String::from("/run/dg.sock"))),
        )
        .unwrap();
        let mut buf = [0u8; 8];
        let (n, _) = socket::recv_from(&receiver, &mut buf, true).unwrap();
        assert_eq!(&buf[..n], b"dgram");
    }
}

mod icmp_tests {
    use super::*;
    use core::sync::atomic::Ordering;

    #[test]
    fn echo_request_generates_reply() {
        setup();
        let lo = super::super::init();
        let before = crate::sched::cpu::current_cpu()
            .tlb_generation
            .load(Ordering::Relaxed);
        let _ = before;
        // An echo request to the loopback reflects and is answered; the
        // reply to the unspecified "sender" simply loops again, so the
        // absence of a panic and the parse both matter here.
        let msg = icmp::IcmpMessage {
            icmp_type: icmp::TYPE_ECHO_REQUEST,
            code: 0,
            rest: 0x0001_0001,
            payload: alloc::vec![1, 2, 3],
        };
        icmp::send(
            &lo,
            Ipv4Address::LOOPBACK,
            Ipv4Address::LOOPBACK,
            Ipv4Address::LOOPBACK,
            64,
            &msg,
        )
        .unwrap();
    }
}

mod route_tests {
    use super::*;
    use super::super::route::{self, ProbeOutcome};

    #[test]
    fn local_destinations_route_directly() {
        setup();
        let (iface, next_hop, ttl) = route::address_route(Ipv4Address::LOOPBACK).unwrap();
        assert!(iface.is_loopback);
        assert_eq!(next_hop, Ipv4Address::LOOPBACK);
        assert_eq!(ttl, 64);
    }

    #[test]
    fn unroutable_destination_is_unreachable() {
        setup();
        route::clear_route_cache();
        assert_eq!(
            route::address_route(Ipv4Address([203, 0, 113, 9])).map(|_| ()),
            Err(Status::HostUnreachable)
        );
    }

    #[test]
    fn probe_classification_follows_icmp_type() {
        // TIME_EXCEEDED: the probe died in transit.
        assert_eq!(
            route::classify_probe(4, icmp::TYPE_TIME_EXCEEDED, 0, 2),
            ProbeOutcome::TooClose
        );
        // PORT_UNREACHABLE from the destination: route works, hop count
        // is the TTL the probe spent.
        assert_eq!(
            route::classify_probe(8, icmp::TYPE_DEST_UNREACHABLE, icmp::CODE_PORT_UNREACHABLE, 3),
            ProbeOutcome::ReachesDestination { hops: 5 }
        );
        // Anything else tells us nothing.
        assert_eq!(
            route::classify_probe(8, icmp::TYPE_ECHO_REPLY, 0, 8),
            ProbeOutcome::NoReply
        );
    }

    #[test]
    fn hostname_get_set() {
        setup();
        assert!(super::super::set_hostname("").is_err());
        super::super::set_hostname("onyx-test").unwrap();
        assert_eq!(super::super::hostname(), "onyx-test");
    }
}
