pub mod correlate;
pub mod echo;
pub mod icmp;
pub mod pinger;
pub mod socket;

pub use correlate::*;
pub use echo::*;
pub use icmp::*;
pub use pinger::*;
pub use socket::*;

use chrono::Utc;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::{DiscoveryError, ProbeError};
use crate::lookup::resolve_target;
use crate::state::ProbeOutcome;

/// Extra time granted on top of a probe timeout before a probe is given up
pub const SCHEDULING_SLACK: Duration = Duration::from_millis(250);

/// Sends a single latency probe.
///
/// Implementations must be callable concurrently against different addresses,
/// must not block much longer than `timeout`, and report every failure as a
/// classified [`ProbeOutcome`] rather than an error.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, address: IpAddr, timeout: Duration) -> impl Future<Output = ProbeOutcome> + Send;
}

/// Resolve `host` and probe it. Resolution failure yields a `NameResolution` outcome.
pub async fn probe_host<P: Prober>(prober: &P, host: &str, timeout: Duration) -> ProbeOutcome {
    let timestamp = Utc::now();
    let address = match resolve_target(host, timeout).await {
        Ok(address) => address,
        Err(e) => {
            let reason = match e {
                DiscoveryError::Resolve { reason, .. } => reason,
                other => other.to_string(),
            };
            let error = ProbeError::NameResolution {
                host: host.trim().to_string(),
                reason,
            };
            tracing::debug!(host = %host, kind = ?error.kind(), error = %error, "Probe failed");
            return ProbeOutcome::from_result(timestamp, Err(error));
        }
    };

    prober.probe(address, timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeErrorKind;

    struct FixedProber;

    impl Prober for FixedProber {
        async fn probe(&self, _address: IpAddr, _timeout: Duration) -> ProbeOutcome {
            ProbeOutcome::success_ms(Utc::now(), 4.0)
        }
    }

    #[tokio::test]
    async fn test_probe_host_with_ip_literal() {
        let outcome = probe_host(&FixedProber, "127.0.0.1", Duration::from_secs(1)).await;
        assert_eq!(outcome.latency_ms, Some(4.0));
    }

    #[tokio::test]
    async fn test_probe_host_invalid_name() {
        let outcome = probe_host(&FixedProber, "not a host!", Duration::from_secs(1)).await;
        assert_eq!(outcome.error, Some(ProbeErrorKind::NameResolution));
        assert_eq!(outcome.latency_ms, None);
    }

    #[test]
    fn test_fixed_prober_is_prober() {
        fn assert_prober<P: Prober>(_: &P) {}
        assert_prober(&FixedProber);
        assert_prober(&IcmpProber::default());
    }
}
