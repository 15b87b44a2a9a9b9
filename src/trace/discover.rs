//! Path discovery: one TTL-limited echo per hop, sent in parallel.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DiscoveryError, ProbeError};
use crate::lookup::{DnsLookup, resolve_target};
use crate::probe::{
    DEFAULT_PAYLOAD_SIZE, EchoRequest, EchoResponse, ReplyKind, SCHEDULING_SLACK, SequenceCounter,
    exchange, get_identifier,
};
use crate::state::Hop;

/// TTL probes in flight at once during discovery
const DISCOVERY_PARALLELISM: usize = 16;

/// Establishes the ordered hop list towards a target.
///
/// Hops with no responder keep their position with `address: None`.
pub trait PathDiscoverer: Send + Sync + 'static {
    fn discover(
        &self,
        target: &str,
        max_hops: u8,
        per_hop_timeout: Duration,
    ) -> impl Future<Output = Result<Vec<Hop>, DiscoveryError>> + Send;
}

/// What a single TTL probe found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TtlResult {
    Responder { address: IpAddr, reached: bool },
    Silent,
    Denied,
}

/// Traceroute over ICMP echo with increasing TTL
pub struct IcmpPathDiscoverer {
    identifier: u16,
    payload_size: usize,
    sequence: Arc<SequenceCounter>,
    dns: Option<Arc<DnsLookup>>,
}

impl Default for IcmpPathDiscoverer {
    fn default() -> Self {
        Self::new(DEFAULT_PAYLOAD_SIZE, None)
    }
}

impl IcmpPathDiscoverer {
    /// `dns` enables best-effort reverse lookups of discovered hops
    pub fn new(payload_size: usize, dns: Option<Arc<DnsLookup>>) -> Self {
        Self {
            identifier: get_identifier(),
            payload_size,
            sequence: Arc::new(SequenceCounter::new()),
            dns,
        }
    }

    async fn probe_ttl(&self, target: IpAddr, ttl: u8, timeout: Duration) -> TtlResult {
        let request = EchoRequest {
            target,
            identifier: self.identifier,
            sequence: self.sequence.next(),
            payload_size: self.payload_size,
            timeout,
            ttl: Some(ttl),
        };

        let worker = tokio::task::spawn_blocking(move || exchange(&request));
        match tokio::time::timeout(timeout + SCHEDULING_SLACK, worker).await {
            Ok(Ok(Ok(response))) => classify(target, response),
            Ok(Ok(Err(ProbeError::PermissionDenied(_)))) => TtlResult::Denied,
            Ok(Ok(Err(e))) => {
                tracing::trace!(ttl, error = %e, "TTL probe failed");
                TtlResult::Silent
            }
            Ok(Err(join_err)) => {
                tracing::debug!(ttl, error = %join_err, "TTL probe task failed");
                TtlResult::Silent
            }
            Err(_) => TtlResult::Silent,
        }
    }
}

fn classify(target: IpAddr, response: EchoResponse) -> TtlResult {
    let reached = response.responder == target
        || matches!(response.kind, ReplyKind::EchoReply | ReplyKind::DestUnreachable(_));
    TtlResult::Responder {
        address: response.responder,
        reached,
    }
}

/// Cut the per-TTL results down to the path: stop at the first hop that
/// reached the target and drop trailing silent TTLs.
fn assemble_path(results: &[TtlResult], max_hops: u8) -> Result<Vec<(u8, Option<IpAddr>)>, DiscoveryError> {
    if !results.is_empty() && results.iter().all(|r| *r == TtlResult::Denied) {
        return Err(DiscoveryError::PermissionDenied(
            "raw or datagram ICMP sockets are not permitted".to_string(),
        ));
    }

    let end = results
        .iter()
        .position(|r| matches!(r, TtlResult::Responder { reached: true, .. }))
        .map(|i| i + 1)
        .unwrap_or(results.len());

    let mut path: Vec<(u8, Option<IpAddr>)> = results[..end]
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let address = match r {
                TtlResult::Responder { address, .. } => Some(*address),
                TtlResult::Silent | TtlResult::Denied => None,
            };
            ((i + 1) as u8, address)
        })
        .collect();

    while path.last().is_some_and(|(_, address)| address.is_none()) {
        path.pop();
    }

    if path.is_empty() {
        return Err(DiscoveryError::NoResponse { max_hops });
    }
    Ok(path)
}

impl PathDiscoverer for IcmpPathDiscoverer {
    async fn discover(
        &self,
        target: &str,
        max_hops: u8,
        per_hop_timeout: Duration,
    ) -> Result<Vec<Hop>, DiscoveryError> {
        let address = resolve_target(target, per_hop_timeout).await?;
        let max_hops = max_hops.max(1);

        tracing::debug!(target = %target, address = %address, max_hops, "Tracing path");

        // `buffered` keeps TTL order
        let results: Vec<TtlResult> = stream::iter(1..=max_hops)
            .map(|ttl| self.probe_ttl(address, ttl, per_hop_timeout))
            .buffered(DISCOVERY_PARALLELISM)
            .collect()
            .await;

        let path = assemble_path(&results, max_hops)?;

        let hostnames = match &self.dns {
            Some(dns) => {
                let responders: Vec<IpAddr> = path.iter().filter_map(|(_, a)| *a).collect();
                dns.resolve_hostnames(&responders).await
            }
            None => Default::default(),
        };

        Ok(path
            .into_iter()
            .map(|(index, address)| {
                let hostname = address.and_then(|a| hostnames.get(&a).cloned());
                Hop::new(index, address).with_hostname(hostname)
            })
            .collect())
    }
}
