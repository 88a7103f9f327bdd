//! Frame decoding
//!
//! Turns a raw link-layer frame into a [`PacketView`]:
//! - no IP layer: dropped
//! - TCP: ports, flags and the raw bytes after the TCP header
//! - UDP: promoted to DNS when the body parses as a DNS message; the
//!   question name is extracted for queries (qr = 0)
//! - ICMP: zero ports, empty flag set
//! - anything else: dropped

use std::net::IpAddr;

use etherparse::SlicedPacket;

use super::packet::{PacketView, Protocol, TcpFlags};

/// Decode a raw ethernet frame captured at `ts` into a packet view.
///
/// Returns `None` for frames the detectors cannot act on (ARP, malformed,
/// non-IP); the caller counts those as decode drops.
pub fn decode_frame(data: &[u8], ts: f64) -> Option<PacketView> {
    let sliced = SlicedPacket::from_ethernet(data).ok()?;

    let (src_ip, dst_ip) = match &sliced.net {
        Some(etherparse::NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            (
                IpAddr::from(header.source_addr()),
                IpAddr::from(header.destination_addr()),
            )
        }
        Some(etherparse::NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            (
                IpAddr::from(header.source_addr()),
                IpAddr::from(header.destination_addr()),
            )
        }
        _ => return None, // ARP, etc.
    };

    let mut view = PacketView::new(ts, src_ip, dst_ip, Protocol::Other);

    match &sliced.transport {
        Some(etherparse::TransportSlice::Tcp(tcp)) => {
            view.proto = Protocol::Tcp;
            view.sport = tcp.source_port();
            view.dport = tcp.destination_port();
            view.flags = TcpFlags {
                fin: tcp.fin(),
                syn: tcp.syn(),
                rst: tcp.rst(),
                psh: tcp.psh(),
                ack: tcp.ack(),
                urg: tcp.urg(),
                ece: tcp.ece(),
                cwr: tcp.cwr(),
            };
            view.payload = tcp.payload().to_vec();
        }
        Some(etherparse::TransportSlice::Udp(udp)) => {
            view.proto = Protocol::Udp;
            view.sport = udp.source_port();
            view.dport = udp.destination_port();
            if let Some(dns) = parse_dns(udp.payload()) {
                view.proto = Protocol::Dns;
                if dns.is_query {
                    view.dns_qname = Some(dns.qname);
                }
            }
        }
        Some(etherparse::TransportSlice::Icmpv4(_))
        | Some(etherparse::TransportSlice::Icmpv6(_)) => {
            view.proto = Protocol::Icmp;
        }
        _ => return None,
    }

    Some(view)
}

/// Minimal DNS message: direction bit and first question name.
struct DnsMessage {
    is_query: bool,
    qname: String,
}

/// Parse a UDP body as a DNS message.
///
/// Accepts a 12-byte header with at least one question, followed by an
/// uncompressed question name as length-prefixed labels. Returns `None` for
/// anything that does not look like DNS so plain UDP keeps its protocol.
fn parse_dns(payload: &[u8]) -> Option<DnsMessage> {
    if payload.len() < 12 {
        return None;
    }

    // qr is the high bit of the first flags byte.
    let is_query = payload[2] & 0x80 == 0;
    let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
    if qdcount == 0 {
        return None;
    }

    let qname = parse_qname(&payload[12..])?;
    Some(DnsMessage { is_query, qname })
}

/// Reassemble a length-prefixed label sequence (`\x03www\x07example\x03com\x00`)
/// into a dot-separated name. Compression pointers never occur in the first
/// question name, so a pointer label means the message is not one we decode.
fn parse_qname(data: &[u8]) -> Option<String> {
    let mut idx = 0;
    let mut name = String::new();

    while idx < data.len() {
        let len = data[idx] as usize;
        if len == 0 {
            break;
        }
        if len & 0xc0 != 0 || idx + len + 1 > data.len() {
            return None;
        }
        if !name.is_empty() {
            name.push('.');
        }
        idx += 1;
        name.push_str(std::str::from_utf8(&data[idx..idx + len]).ok()?);
        idx += len;
    }

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Ethernet + IPv4 header prefix shared by the frame builders.
    fn ipv4_frame(protocol: u8, transport: &[u8]) -> Vec<u8> {
        let mut pkt = vec![
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // dst mac
            0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, // src mac
            0x08, 0x00, // ethertype IPv4
        ];

        let total_len = (20 + transport.len()) as u16;
        pkt.extend_from_slice(&[
            0x45, // version=4, ihl=5
            0x00, // dscp/ecn
        ]);
        pkt.extend_from_slice(&total_len.to_be_bytes());
        pkt.extend_from_slice(&[
            0x12, 0x34, // identification
            0x40, 0x00, // flags (DF), fragment offset
            0x40, // TTL
            protocol, 0x00, 0x00, // checksum (ignored)
            192, 168, 1, 100, // src IP
            10, 0, 0, 1, // dst IP
        ]);
        pkt.extend_from_slice(transport);
        pkt
    }

    fn tcp_segment(sport: u16, dport: u16, flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut seg = Vec::new();
        seg.extend_from_slice(&sport.to_be_bytes());
        seg.extend_from_slice(&dport.to_be_bytes());
        seg.extend_from_slice(&[
            0x00, 0x00, 0x00, 0x01, // seq
            0x00, 0x00, 0x00, 0x00, // ack
            0x50, flags, // data offset=5, flags
            0xff, 0xff, // window
            0x00, 0x00, // checksum
            0x00, 0x00, // urgent pointer
        ]);
        seg.extend_from_slice(payload);
        seg
    }

    fn dns_query_body(labels: &[&str]) -> Vec<u8> {
        let mut body = vec![
            0x12, 0x34, // id
            0x01, 0x00, // flags: standard query, rd
            0x00, 0x01, // qdcount
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        for label in labels {
            body.push(label.len() as u8);
            body.extend_from_slice(label.as_bytes());
        }
        body.push(0);
        body.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // qtype A, qclass IN
        body
    }

    fn udp_datagram(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
        let mut seg = Vec::new();
        seg.extend_from_slice(&sport.to_be_bytes());
        seg.extend_from_slice(&dport.to_be_bytes());
        seg.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
        seg.extend_from_slice(&[0x00, 0x00]); // checksum
        seg.extend_from_slice(payload);
        seg
    }

    #[test]
    fn test_decode_tcp_syn() {
        let frame = ipv4_frame(6, &tcp_segment(12345, 80, 0x02, b""));
        let view = decode_frame(&frame, 1.0).unwrap();

        assert_eq!(view.proto, Protocol::Tcp);
        assert_eq!(view.src_ip.to_string(), "192.168.1.100");
        assert_eq!(view.dst_ip.to_string(), "10.0.0.1");
        assert_eq!(view.sport, 12345);
        assert_eq!(view.dport, 80);
        assert!(view.flags.is_syn_only());
        assert!(view.payload.is_empty());
    }

    #[test]
    fn test_decode_tcp_payload() {
        let frame = ipv4_frame(6, &tcp_segment(40000, 80, 0x18, b"GET / HTTP/1.1"));
        let view = decode_frame(&frame, 1.0).unwrap();
        assert_eq!(view.payload, b"GET / HTTP/1.1");
        assert!(view.flags.psh);
        assert!(view.flags.ack);
    }

    #[test]
    fn test_decode_udp_dns_query() {
        let body = dns_query_body(&["www", "example", "com"]);
        let frame = ipv4_frame(17, &udp_datagram(53000, 53, &body));
        let view = decode_frame(&frame, 1.0).unwrap();

        assert_eq!(view.proto, Protocol::Dns);
        assert_eq!(view.dns_qname.as_deref(), Some("www.example.com"));
    }

    #[test]
    fn test_decode_udp_dns_response_has_no_qname() {
        let mut body = dns_query_body(&["example", "com"]);
        body[2] = 0x81; // qr = 1
        let frame = ipv4_frame(17, &udp_datagram(53, 53000, &body));
        let view = decode_frame(&frame, 1.0).unwrap();

        assert_eq!(view.proto, Protocol::Dns);
        assert!(view.dns_qname.is_none());
    }

    #[test]
    fn test_decode_plain_udp_stays_udp() {
        let frame = ipv4_frame(17, &udp_datagram(5000, 5001, b"hi"));
        let view = decode_frame(&frame, 1.0).unwrap();
        assert_eq!(view.proto, Protocol::Udp);
    }

    #[test]
    fn test_decode_non_ip_dropped() {
        let arp = vec![
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0x08, 0x06,
            0x00, 0x01, 0x08, 0x00, 0x06, 0x04, 0x00, 0x01,
        ];
        assert!(decode_frame(&arp, 1.0).is_none());
    }
}
