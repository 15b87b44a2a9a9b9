use pnet::packet::MutablePacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpType, IcmpTypes, checksum};
use std::sync::atomic::{AtomicU16, Ordering};

/// ICMP header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;
/// Default payload size (standard ping)
pub const DEFAULT_PAYLOAD_SIZE: usize = 56;
/// Minimum payload size (2 bytes identifier + 2 bytes sequence + 4 bytes timestamp)
pub const MIN_PAYLOAD_SIZE: usize = 8;

/// Get process identifier for ICMP identification field
pub fn get_identifier() -> u16 {
    std::process::id() as u16
}

/// Hands out ICMP sequence numbers. Concurrent probes on RAW sockets see each
/// other's replies, so every in-flight probe needs a distinct sequence.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU16);

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u16 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Build an ICMP Echo Request packet with configurable payload size
///
/// Set ipv6=true to build an ICMPv6 Echo Request (the kernel fills in the
/// ICMPv6 checksum).
///
/// Payload layout (DGRAM sockets may rewrite the header identifier):
/// - Bytes 0-1: identifier
/// - Bytes 2-3: sequence
/// - Bytes 4-7: timestamp (lower 32 bits of microseconds)
/// - Bytes 8+: pattern fill
pub fn build_echo_request(identifier: u16, sequence: u16, payload_size: usize, ipv6: bool) -> Vec<u8> {
    let payload_size = payload_size.max(MIN_PAYLOAD_SIZE);
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + payload_size];

    if let Some(mut packet) = MutableEchoRequestPacket::new(&mut buffer) {
        if ipv6 {
            packet.set_icmp_type(IcmpType::new(128));
        } else {
            packet.set_icmp_type(IcmpTypes::EchoRequest);
        }
        packet.set_icmp_code(IcmpCode::new(0));
        packet.set_identifier(identifier);
        packet.set_sequence_number(sequence);

        let payload = packet.payload_mut();
        payload[0..2].copy_from_slice(&identifier.to_be_bytes());
        payload[2..4].copy_from_slice(&sequence.to_be_bytes());

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u32;
        payload[4..8].copy_from_slice(&timestamp.to_be_bytes());

        for (i, byte) in payload[8..].iter_mut().enumerate() {
            *byte = (i & 0xFF) as u8;
        }
    }

    if !ipv6 {
        let cksum = IcmpPacket::new(&buffer).map(|p| checksum(&p));
        if let (Some(cksum), Some(mut packet)) = (cksum, MutableEchoRequestPacket::new(&mut buffer)) {
            packet.set_checksum(cksum);
        }
    }

    buffer
}
