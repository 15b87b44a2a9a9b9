use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::DiscoveryError;

/// Longest hostname accepted (RFC 1035)
const MAX_HOSTNAME_LEN: usize = 253;
/// Longest single label
const MAX_LABEL_LEN: usize = 63;

/// Check if the string is an IPv4 or IPv6 literal
pub fn is_valid_ip(s: &str) -> bool {
    s.parse::<IpAddr>().is_ok()
}

/// Check if the string is a syntactically valid hostname.
///
/// Labels are 1-63 alphanumeric characters with inner hyphens. A single
/// trailing dot (fully qualified form) is accepted.
pub fn is_valid_hostname(s: &str) -> bool {
    let name = s.strip_suffix('.').unwrap_or(s);
    if name.is_empty() || name.len() > MAX_HOSTNAME_LEN {
        return false;
    }

    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

/// A monitoring target is either an IP literal or a valid hostname
pub fn is_valid_target(s: &str) -> bool {
    is_valid_ip(s) || is_valid_hostname(s)
}

/// Resolve a target to a single address, preferring IPv4.
///
/// The system resolver gets at most `timeout` to answer.
pub async fn resolve_target(target: &str, timeout: Duration) -> Result<IpAddr, DiscoveryError> {
    let target = target.trim();

    // Try parsing as IP address first
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }

    if !is_valid_hostname(target) {
        return Err(DiscoveryError::Resolve {
            host: target.to_string(),
            reason: "not a valid hostname".to_string(),
        });
    }

    let lookup = async {
        tokio::net::lookup_host(format!("{}:0", target))
            .await
            .map(|addrs| addrs.map(|sa| sa.ip()).collect::<Vec<IpAddr>>())
    };
    let addrs = lookup_with_deadline(target, timeout, lookup).await?;

    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| DiscoveryError::Resolve {
            host: target.to_string(),
            reason: "no addresses found for hostname".to_string(),
        })
}

async fn lookup_with_deadline<F>(host: &str, timeout: Duration, lookup: F) -> Result<Vec<IpAddr>, DiscoveryError>
where
    F: Future<Output = io::Result<Vec<IpAddr>>>,
{
    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(addrs)) => Ok(addrs),
        Ok(Err(e)) => Err(DiscoveryError::Resolve {
            host: host.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(DiscoveryError::Resolve {
            host: host.to_string(),
            reason: format!("lookup timed out after {} ms", timeout.as_millis()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_valid_ips() {
        assert!(is_valid_ip("10.0.0.1"));
        assert!(is_valid_ip("2001:db8::1"));
        assert!(!is_valid_ip("10.0.0"));
        assert!(!is_valid_ip("example.com"));
    }

    #[test]
    fn test_valid_hostnames() {
        assert!(is_valid_hostname("example.com"));
        assert!(is_valid_hostname("example.com."));
        assert!(is_valid_hostname("a-b.c-d.net"));
        assert!(is_valid_hostname("localhost"));
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("-bad.example"));
        assert!(!is_valid_hostname("bad-.example"));
        assert!(!is_valid_hostname("two..dots"));
        assert!(!is_valid_hostname("has space.com"));
        assert!(!is_valid_hostname(&"a".repeat(64)));
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let ip = resolve_target(" 10.0.0.1 ", Duration::from_secs(1)).await.unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[tokio::test]
    async fn test_resolve_rejects_garbage() {
        let err = resolve_target("no such host!", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Resolve { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_resolver_times_out() {
        let started = tokio::time::Instant::now();
        let err = lookup_with_deadline(
            "slow.example",
            Duration::from_millis(300),
            std::future::pending::<io::Result<Vec<IpAddr>>>(),
        )
        .await
        .unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(300));
        match err {
            DiscoveryError::Resolve { host, reason } => {
                assert_eq!(host, "slow.example");
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_lookup_error_is_resolve() {
        let failing = async { Err::<Vec<IpAddr>, _>(io::Error::other("server failure")) };
        let err = lookup_with_deadline("broken.example", Duration::from_secs(1), failing)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("server failure"));
    }
}
