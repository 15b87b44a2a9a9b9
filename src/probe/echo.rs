//! One blocking echo request/response exchange.
//!
//! Each exchange opens its own socket so concurrent probes share no state.
//! Callers run it on the blocking thread pool.

use std::io;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use super::correlate::{ReplyKind, parse_reply};
use super::icmp::build_echo_request;
use super::socket::{SocketInfo, create_echo_socket, create_trace_socket, recv_icmp, send_icmp, set_ttl};
use crate::error::ProbeError;

const RECV_BUFFER_SIZE: usize = 1500;

/// Parameters of a single echo exchange
#[derive(Debug, Clone, Copy)]
pub struct EchoRequest {
    pub target: IpAddr,
    pub identifier: u16,
    pub sequence: u16,
    pub payload_size: usize,
    pub timeout: Duration,
    /// Set for TTL-limited traceroute probes
    pub ttl: Option<u8>,
}

/// The first matching ICMP message for an [`EchoRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoResponse {
    pub responder: IpAddr,
    pub kind: ReplyKind,
    pub rtt: Duration,
}

/// Send one echo request and wait for the reply (or a matching ICMP error)
pub fn exchange(request: &EchoRequest) -> Result<EchoResponse, ProbeError> {
    let ipv6 = request.target.is_ipv6();
    let timeout_ms = request.timeout.as_millis();

    let socket_info = if request.ttl.is_some() {
        create_trace_socket(ipv6)
    } else {
        create_echo_socket(ipv6)
    }
    .map_err(|e| ProbeError::from_io(&e, timeout_ms))?;

    if let Some(ttl) = request.ttl {
        set_ttl(&socket_info.socket, ttl, ipv6).map_err(|e| ProbeError::from_io(&e, timeout_ms))?;
    }

    let packet = build_echo_request(request.identifier, request.sequence, request.payload_size, ipv6);

    let sent_at = Instant::now();
    send_icmp(&socket_info.socket, &packet, request.target)
        .map_err(|e| ProbeError::from_io(&e, timeout_ms))?;

    wait_for_reply(&socket_info, request, sent_at)
}

fn wait_for_reply(
    socket_info: &SocketInfo,
    request: &EchoRequest,
    sent_at: Instant,
) -> Result<EchoResponse, ProbeError> {
    let timeout_ms = request.timeout.as_millis();
    let deadline = sent_at + request.timeout;
    let mut buffer = [0u8; RECV_BUFFER_SIZE];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ProbeError::Timeout(timeout_ms));
        }

        let (len, source) = match recv_icmp(&socket_info.socket, &mut buffer, remaining) {
            Ok(received) => received,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ProbeError::from_io(&e, timeout_ms)),
        };

        // RAW sockets see every ICMP packet on the host, keep only ours
        let Some(reply) = parse_reply(&buffer[..len], source, request.identifier, socket_info.is_dgram) else {
            continue;
        };
        if reply.sequence != request.sequence {
            continue;
        }
        // Plain pings only trust replies from the target itself
        if request.ttl.is_none() && reply.kind == ReplyKind::EchoReply && reply.responder != request.target {
            continue;
        }

        return Ok(EchoResponse {
            responder: reply.responder,
            kind: reply.kind,
            rtt: sent_at.elapsed(),
        });
    }
}
