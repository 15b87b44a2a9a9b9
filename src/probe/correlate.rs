use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use std::net::IpAddr;

// IP protocol numbers
const IPPROTO_ICMP: u8 = 1;
const IPPROTO_ICMPV6: u8 = 58;

const ICMP_ECHO_REQUEST: u8 = 8;

// ICMPv6 type codes
const ICMPV6_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_TIME_EXCEEDED: u8 = 3;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

const IPV6_HEADER_LEN: usize = 40;

/// What kind of ICMP message answered a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    EchoReply,
    TimeExceeded,
    DestUnreachable(u8),
}

/// An ICMP message matched to one of our echo requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedReply {
    pub responder: IpAddr,
    pub kind: ReplyKind,
    pub sequence: u16,
}

/// Parse an ICMP packet and return it if it answers an echo request with
/// `our_identifier`.
///
/// When `is_dgram` is true, or for IPv6, the data starts directly at the ICMP
/// header. RAW IPv4 sockets deliver the IP header as well.
pub fn parse_reply(
    data: &[u8],
    responder: IpAddr,
    our_identifier: u16,
    is_dgram: bool,
) -> Option<ParsedReply> {
    if data.is_empty() {
        return None;
    }

    if responder.is_ipv6() {
        // Linux strips the IPv6 header for both RAW and DGRAM sockets
        parse_icmpv6(data, responder, our_identifier)
    } else if is_dgram {
        parse_icmpv4(data, responder, our_identifier, is_dgram)
    } else {
        let ip_packet = Ipv4Packet::new(data)?;
        let ip_header_len = (ip_packet.get_header_length() as usize) * 4;
        if data.len() < ip_header_len + 8 {
            return None;
        }
        parse_icmpv4(&data[ip_header_len..], responder, our_identifier, is_dgram)
    }
}

fn parse_icmpv4(
    icmp_data: &[u8],
    responder: IpAddr,
    our_identifier: u16,
    is_dgram: bool,
) -> Option<ParsedReply> {
    let icmp_packet = IcmpPacket::new(icmp_data)?;
    if icmp_data.len() < 8 {
        return None;
    }

    let kind = match icmp_packet.get_icmp_type() {
        IcmpTypes::EchoReply => {
            // The kernel validates checksums on DGRAM sockets
            if !is_dgram && !validate_icmp_checksum(icmp_data) {
                return None;
            }
            let sequence = match_echo(icmp_data, our_identifier, is_dgram)?;
            return Some(ParsedReply {
                responder,
                kind: ReplyKind::EchoReply,
                sequence,
            });
        }
        IcmpTypes::TimeExceeded => ReplyKind::TimeExceeded,
        IcmpTypes::DestinationUnreachable => {
            ReplyKind::DestUnreachable(icmp_packet.get_icmp_code().0)
        }
        _ => return None,
    };

    // Error message: 8 byte ICMP header, then the original IPv4 datagram
    let quoted = &icmp_data[8..];
    let inner_ip = Ipv4Packet::new(quoted)?;
    if inner_ip.get_next_level_protocol().0 != IPPROTO_ICMP {
        return None;
    }
    let inner_header_len = (inner_ip.get_header_length() as usize) * 4;
    let inner_icmp = quoted.get(inner_header_len..)?;
    if inner_icmp.len() < 8 || inner_icmp[0] != ICMP_ECHO_REQUEST {
        return None;
    }

    let sequence = match_echo(inner_icmp, our_identifier, is_dgram)?;
    Some(ParsedReply {
        responder,
        kind,
        sequence,
    })
}

fn parse_icmpv6(icmp_data: &[u8], responder: IpAddr, our_identifier: u16) -> Option<ParsedReply> {
    if icmp_data.len() < 8 {
        return None;
    }

    let kind = match icmp_data[0] {
        ICMPV6_ECHO_REPLY => {
            // DGRAM ICMPv6 sockets may rewrite the identifier, accept the payload copy
            let sequence = match_echo(icmp_data, our_identifier, true)?;
            return Some(ParsedReply {
                responder,
                kind: ReplyKind::EchoReply,
                sequence,
            });
        }
        ICMPV6_TIME_EXCEEDED => ReplyKind::TimeExceeded,
        ICMPV6_DEST_UNREACHABLE => ReplyKind::DestUnreachable(icmp_data[1]),
        _ => return None,
    };

    // Error message: 8 byte ICMPv6 header, then the original IPv6 packet
    let quoted = &icmp_data[8..];
    if quoted.len() < IPV6_HEADER_LEN + 8 || quoted[6] != IPPROTO_ICMPV6 {
        return None;
    }
    let inner_icmp = &quoted[IPV6_HEADER_LEN..];
    if inner_icmp[0] != ICMPV6_ECHO_REQUEST {
        return None;
    }

    let sequence = match_echo(inner_icmp, our_identifier, true)?;
    Some(ParsedReply {
        responder,
        kind,
        sequence,
    })
}

/// Match an echo header (request or reply) against our identifier and return
/// its sequence number.
///
/// With `allow_payload` the identifier/sequence copy at the start of the
/// payload is accepted too, for sockets whose kernel rewrites the header.
fn match_echo(echo: &[u8], our_identifier: u16, allow_payload: bool) -> Option<u16> {
    let identifier = u16::from_be_bytes([echo[4], echo[5]]);
    let sequence = u16::from_be_bytes([echo[6], echo[7]]);
    if identifier == our_identifier {
        return Some(sequence);
    }

    if allow_payload && echo.len() >= 12 {
        let payload_id = u16::from_be_bytes([echo[8], echo[9]]);
        if payload_id == our_identifier {
            return Some(u16::from_be_bytes([echo[10], echo[11]]));
        }
    }

    None
}

/// Calculate ICMP checksum (RFC 1071)
/// Returns true if checksum is valid (sums to 0xFFFF or 0x0000 after folding)
fn validate_icmp_checksum(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }

    let mut sum: u32 = 0;
    let mut i = 0;
    while i + 1 < data.len() {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }
    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    sum == 0xFFFF || sum == 0x0000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::icmp::build_echo_request;
    use std::net::{Ipv4Addr, Ipv6Addr};

    const ID: u16 = 0x4242;

    fn ipv4_header(protocol: u8, total_len: usize) -> Vec<u8> {
        let mut header = vec![0u8; 20];
        header[0] = 0x45;
        header[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        header[8] = 64;
        header[9] = protocol;
        header
    }

    fn fix_checksum(icmp: &mut [u8]) {
        icmp[2] = 0;
        icmp[3] = 0;
        let mut sum: u32 = icmp
            .chunks(2)
            .map(|c| u16::from_be_bytes([c[0], *c.get(1).unwrap_or(&0)]) as u32)
            .sum();
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        icmp[2..4].copy_from_slice(&(!(sum as u16)).to_be_bytes());
    }

    fn echo_reply_v4(identifier: u16, sequence: u16) -> Vec<u8> {
        let mut icmp = build_echo_request(identifier, sequence, 16, false);
        icmp[0] = 0; // Echo Reply
        fix_checksum(&mut icmp);
        icmp
    }

    fn time_exceeded_v4(identifier: u16, sequence: u16) -> Vec<u8> {
        let request = build_echo_request(identifier, sequence, 16, false);
        let mut quoted = ipv4_header(IPPROTO_ICMP, 20 + request.len());
        quoted.extend_from_slice(&request[..8]);

        let mut icmp = vec![11, 0, 0, 0, 0, 0, 0, 0];
        icmp.extend_from_slice(&quoted);
        fix_checksum(&mut icmp);
        icmp
    }

    #[test]
    fn test_echo_reply_raw_ipv4() {
        let icmp = echo_reply_v4(ID, 77);
        let mut packet = ipv4_header(IPPROTO_ICMP, 20 + icmp.len());
        packet.extend_from_slice(&icmp);

        let responder = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        let parsed = parse_reply(&packet, responder, ID, false).unwrap();
        assert_eq!(parsed.kind, ReplyKind::EchoReply);
        assert_eq!(parsed.sequence, 77);
        assert_eq!(parsed.responder, responder);
    }

    #[test]
    fn test_echo_reply_foreign_identifier_ignored() {
        let icmp = echo_reply_v4(0x1111, 77);
        let mut packet = ipv4_header(IPPROTO_ICMP, 20 + icmp.len());
        packet.extend_from_slice(&icmp);

        let responder = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        assert!(parse_reply(&packet, responder, ID, false).is_none());
    }

    #[test]
    fn test_echo_reply_bad_checksum_ignored() {
        let mut icmp = echo_reply_v4(ID, 5);
        icmp[2] ^= 0xFF;
        let mut packet = ipv4_header(IPPROTO_ICMP, 20 + icmp.len());
        packet.extend_from_slice(&icmp);

        let responder = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));
        assert!(parse_reply(&packet, responder, ID, false).is_none());
    }

    #[test]
    fn test_echo_reply_dgram_rewritten_identifier() {
        // Kernel replaced the header identifier, payload still carries ours
        let mut icmp = echo_reply_v4(ID, 9);
        icmp[4..6].copy_from_slice(&0x9999u16.to_be_bytes());

        let responder = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));
        let parsed = parse_reply(&icmp, responder, ID, true).unwrap();
        assert_eq!(parsed.sequence, 9);
    }

    #[test]
    fn test_time_exceeded_raw_ipv4() {
        let icmp = time_exceeded_v4(ID, 300);
        let mut packet = ipv4_header(IPPROTO_ICMP, 20 + icmp.len());
        packet.extend_from_slice(&icmp);

        let router = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let parsed = parse_reply(&packet, router, ID, false).unwrap();
        assert_eq!(parsed.kind, ReplyKind::TimeExceeded);
        assert_eq!(parsed.sequence, 300);
        assert_eq!(parsed.responder, router);
    }

    #[test]
    fn test_dest_unreachable_carries_code() {
        let mut icmp = time_exceeded_v4(ID, 4);
        icmp[0] = 3;
        icmp[1] = 1; // host unreachable
        fix_checksum(&mut icmp);
        let mut packet = ipv4_header(IPPROTO_ICMP, 20 + icmp.len());
        packet.extend_from_slice(&icmp);

        let router = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 254));
        let parsed = parse_reply(&packet, router, ID, false).unwrap();
        assert_eq!(parsed.kind, ReplyKind::DestUnreachable(1));
    }

    #[test]
    fn test_icmpv6_echo_reply_and_time_exceeded() {
        let responder = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));

        let mut reply = build_echo_request(ID, 12, 16, true);
        reply[0] = ICMPV6_ECHO_REPLY;
        let parsed = parse_reply(&reply, responder, ID, false).unwrap();
        assert_eq!(parsed.kind, ReplyKind::EchoReply);
        assert_eq!(parsed.sequence, 12);

        let request = build_echo_request(ID, 13, 16, true);
        let mut inner = vec![0u8; IPV6_HEADER_LEN];
        inner[0] = 0x60;
        inner[6] = IPPROTO_ICMPV6;
        inner.extend_from_slice(&request);
        let mut exceeded = vec![ICMPV6_TIME_EXCEEDED, 0, 0, 0, 0, 0, 0, 0];
        exceeded.extend_from_slice(&inner);

        let parsed = parse_reply(&exceeded, responder, ID, false).unwrap();
        assert_eq!(parsed.kind, ReplyKind::TimeExceeded);
        assert_eq!(parsed.sequence, 13);
    }

    #[test]
    fn test_truncated_packets_rejected() {
        let responder = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        assert!(parse_reply(&[], responder, ID, false).is_none());
        assert!(parse_reply(&[0x45, 0, 0], responder, ID, false).is_none());
        assert!(parse_reply(&[0, 0, 0, 0], responder, ID, true).is_none());
    }
}
