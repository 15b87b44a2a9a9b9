use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use super::{Prober, SCHEDULING_SLACK};
use super::correlate::ReplyKind;
use super::echo::{EchoRequest, exchange};
use super::icmp::{DEFAULT_PAYLOAD_SIZE, SequenceCounter, get_identifier};
use crate::error::{ProbeError, ProbeErrorKind};
use crate::state::ProbeOutcome;

/// ICMP echo prober backed by per-probe sockets on the blocking pool
#[derive(Debug, Clone)]
pub struct IcmpProber {
    identifier: u16,
    payload_size: usize,
    sequence: Arc<SequenceCounter>,
}

impl Default for IcmpProber {
    fn default() -> Self {
        Self::new(DEFAULT_PAYLOAD_SIZE)
    }
}

impl IcmpProber {
    pub fn new(payload_size: usize) -> Self {
        Self {
            identifier: get_identifier(),
            payload_size,
            sequence: Arc::new(SequenceCounter::new()),
        }
    }

    /// Probe and keep the classified error, for callers that want the message
    pub async fn ping(&self, address: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
        let request = EchoRequest {
            target: address,
            identifier: self.identifier,
            sequence: self.sequence.next(),
            payload_size: self.payload_size,
            timeout,
            ttl: None,
        };

        let worker = tokio::task::spawn_blocking(move || exchange(&request));
        let response = match tokio::time::timeout(timeout + SCHEDULING_SLACK, worker).await {
            Err(_) => return Err(ProbeError::Timeout(timeout.as_millis())),
            Ok(Err(join_err)) => return Err(ProbeError::unknown(format!("probe task failed: {join_err}"))),
            Ok(Ok(result)) => result?,
        };

        match response.kind {
            ReplyKind::EchoReply => Ok(response.rtt),
            ReplyKind::DestUnreachable(code) => Err(ProbeError::NoRoute(format!(
                "destination unreachable (code {code}) from {}",
                response.responder
            ))),
            ReplyKind::TimeExceeded => Err(ProbeError::NoRoute(format!(
                "time exceeded in transit at {}",
                response.responder
            ))),
        }
    }
}

impl Prober for IcmpProber {
    async fn probe(&self, address: IpAddr, timeout: Duration) -> ProbeOutcome {
        let timestamp = Utc::now();
        let result = self.ping(address, timeout).await;

        // Timeouts are routine, everything else is worth a trace in the log
        if let Err(ref e) = result
            && e.kind() != ProbeErrorKind::Timeout
        {
            tracing::debug!(address = %address, kind = ?e.kind(), error = %e, "Probe failed");
        }

        ProbeOutcome::from_result(timestamp, result)
    }
}
