use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Socket with metadata about type (for DGRAM-aware parsing)
#[derive(Debug)]
pub struct SocketInfo {
    pub socket: Socket,
    /// True if SOCK_DGRAM (no IP header in received packets)
    pub is_dgram: bool,
}

fn icmp_domain(ipv6: bool) -> (Domain, Protocol) {
    if ipv6 {
        (Domain::IPV6, Protocol::ICMPV6)
    } else {
        (Domain::IPV4, Protocol::ICMPV4)
    }
}

/// Create a raw ICMP socket (needs root or CAP_NET_RAW)
pub fn create_raw_icmp_socket(ipv6: bool) -> io::Result<Socket> {
    let (domain, protocol) = icmp_domain(ipv6);
    let socket = Socket::new(domain, Type::RAW, Some(protocol))?;
    socket.set_nonblocking(false)?;
    Ok(socket)
}

/// Create an unprivileged ICMP socket (SOCK_DGRAM)
///
/// On Linux this requires the caller's group to be inside
/// `net.ipv4.ping_group_range`.
pub fn create_dgram_icmp_socket(ipv6: bool) -> io::Result<Socket> {
    let (domain, protocol) = icmp_domain(ipv6);
    let socket = Socket::new(domain, Type::DGRAM, Some(protocol))?;
    socket.set_nonblocking(false)?;
    Ok(socket)
}

/// Socket for plain echo probes. Prefers unprivileged DGRAM, falls back to RAW.
pub fn create_echo_socket(ipv6: bool) -> io::Result<SocketInfo> {
    match create_dgram_icmp_socket(ipv6) {
        Ok(socket) => Ok(SocketInfo {
            socket,
            is_dgram: true,
        }),
        Err(dgram_err) => match create_raw_icmp_socket(ipv6) {
            Ok(socket) => Ok(SocketInfo {
                socket,
                is_dgram: false,
            }),
            // Report the DGRAM failure, it is the one a user can fix without root
            Err(_) => Err(dgram_err),
        },
    }
}

/// Socket for TTL-limited probes. Prefers RAW so Time Exceeded is visible.
pub fn create_trace_socket(ipv6: bool) -> io::Result<SocketInfo> {
    match create_raw_icmp_socket(ipv6) {
        Ok(socket) => Ok(SocketInfo {
            socket,
            is_dgram: false,
        }),
        Err(raw_err) => match create_dgram_icmp_socket(ipv6) {
            Ok(socket) => Ok(SocketInfo {
                socket,
                is_dgram: true,
            }),
            Err(_) => Err(raw_err),
        },
    }
}

/// Set TTL (or hop limit for IPv6) on a socket
pub fn set_ttl(socket: &Socket, ttl: u8, ipv6: bool) -> io::Result<()> {
    if ipv6 {
        socket.set_unicast_hops_v6(ttl as u32)
    } else {
        socket.set_ttl(ttl as u32)
    }
}

/// Send ICMP packet to target
pub fn send_icmp(socket: &Socket, packet: &[u8], target: IpAddr) -> io::Result<usize> {
    let addr = SocketAddr::new(target, 0);
    socket.send_to(packet, &SockAddr::from(addr))
}

/// Receive one datagram, waiting at most `timeout`
pub fn recv_icmp(socket: &Socket, buffer: &mut [u8], timeout: Duration) -> io::Result<(usize, IpAddr)> {
    // A zero read timeout means "block forever" to the OS
    socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

    let mut raw = vec![MaybeUninit::<u8>::uninit(); buffer.len()];
    let (len, addr) = socket.recv_from(&mut raw)?;
    for (dst, src) in buffer.iter_mut().zip(&raw[..len]) {
        // SAFETY: recv_from initialized the first `len` bytes
        *dst = unsafe { src.assume_init() };
    }

    let source = addr
        .as_socket()
        .map(|sa| sa.ip())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non-IP source address"))?;
    Ok((len, source))
}
