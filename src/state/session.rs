use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ProbeError, ProbeErrorKind};

/// A single hop (TTL position) on the monitored path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    /// 1-based position in the path
    pub index: u8,
    /// Responder at this TTL, None when nothing answered during discovery
    pub address: Option<IpAddr>,
    pub hostname: Option<String>,
    pub first_seen_at: DateTime<Utc>,
}

impl Hop {
    pub fn new(index: u8, address: Option<IpAddr>) -> Self {
        Self {
            index,
            address,
            hostname: None,
            first_seen_at: Utc::now(),
        }
    }

    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        self.hostname = hostname;
        self
    }
}

/// Result of a single probe. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub timestamp: DateTime<Utc>,
    /// Round-trip time, present iff the probe succeeded
    pub latency_ms: Option<f64>,
    /// Failure class, None on success
    pub error: Option<ProbeErrorKind>,
}

impl ProbeOutcome {
    pub fn success(timestamp: DateTime<Utc>, rtt: Duration) -> Self {
        Self::success_ms(timestamp, rtt.as_nanos() as f64 / 1_000_000.0)
    }

    pub fn success_ms(timestamp: DateTime<Utc>, latency_ms: f64) -> Self {
        Self {
            timestamp,
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    pub fn failure(timestamp: DateTime<Utc>, kind: ProbeErrorKind) -> Self {
        Self {
            timestamp,
            latency_ms: None,
            error: Some(kind),
        }
    }

    pub fn from_result(timestamp: DateTime<Utc>, result: Result<Duration, ProbeError>) -> Self {
        match result {
            Ok(rtt) => Self::success(timestamp, rtt),
            Err(e) => Self::failure(timestamp, e.kind()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.latency_ms.is_some()
    }
}

/// Derived per-hop statistics, recomputed from retained history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopStats {
    pub hop: u8,
    pub address: Option<IpAddr>,
    pub hostname: Option<String>,
    /// Outcomes considered (successes and failures)
    pub count: usize,
    /// Latency of the newest outcome, 0 when it failed
    pub current: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub loss_percent: f64,
    pub jitter_ms: f64,
    /// Failure class of the newest outcome, if it failed
    pub last_error: Option<ProbeErrorKind>,
}

impl HopStats {
    /// Stats for a hop with no retained outcomes
    pub fn empty(hop: &Hop) -> Self {
        Self {
            hop: hop.index,
            address: hop.address,
            hostname: hop.hostname.clone(),
            count: 0,
            current: 0.0,
            min: 0.0,
            max: 0.0,
            avg: 0.0,
            loss_percent: 0.0,
            jitter_ms: 0.0,
            last_error: None,
        }
    }
}

/// Lifecycle of a [`MonitorEngine`](crate::trace::MonitorEngine)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineState {
    /// No target, or target set but never started
    #[default]
    Idle,
    /// Path discovery in flight
    Discovering,
    /// Periodic probing active
    Running,
    /// Target and history retained, probing stopped
    Paused,
}

/// The single active monitoring session of an engine
#[derive(Debug, Clone, Default)]
pub struct MonitorSession {
    pub target: String,
    pub state: EngineState,
    /// None until path discovery has completed for this target
    pub hops: Option<Arc<Vec<Hop>>>,
    /// Bumped on every retarget/clear so stale loops can tell they are stale
    pub generation: u64,
}

impl MonitorSession {
    pub fn hops(&self) -> Arc<Vec<Hop>> {
        self.hops.clone().unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, EngineState::Discovering | EngineState::Running)
    }
}

/// Summary published after every completed tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickSummary {
    /// Ticks completed since the current target was set
    pub tick: u64,
    pub completed_at: Option<DateTime<Utc>>,
    pub hop_count: usize,
}

/// Plain serializable record handed to persistence collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub target: String,
    pub generated_at: DateTime<Utc>,
    pub interval_secs: f64,
    pub state: EngineState,
    pub hops: Vec<HopStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_outcome_success_has_latency_and_no_error() {
        let outcome = ProbeOutcome::success(Utc::now(), Duration::from_micros(12_500));
        assert!(outcome.is_success());
        assert_eq!(outcome.latency_ms, Some(12.5));
        assert_eq!(outcome.error, None);
    }

    #[test]
    fn test_outcome_from_error_keeps_kind() {
        let outcome = ProbeOutcome::from_result(
            Utc::now(),
            Err(ProbeError::PermissionDenied("EPERM".into())),
        );
        assert!(!outcome.is_success());
        assert_eq!(outcome.latency_ms, None);
        assert_eq!(outcome.error, Some(ProbeErrorKind::PermissionDenied));
    }

    #[test]
    fn test_empty_hop_stats() {
        let hop = Hop::new(3, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3))))
            .with_hostname(Some("core.example.net".into()));
        let stats = HopStats::empty(&hop);

        assert_eq!(stats.hop, 3);
        assert_eq!(stats.hostname.as_deref(), Some("core.example.net"));
        assert_eq!(stats.count, 0);
        assert_eq!(stats.loss_percent, 0.0);
    }

    #[test]
    fn test_session_report_serializes() {
        let hop = Hop::new(1, None);
        let report = SessionReport {
            target: "example.com".into(),
            generated_at: Utc::now(),
            interval_secs: 2.5,
            state: EngineState::Paused,
            hops: vec![HopStats::empty(&hop)],
        };

        let json = serde_json::to_string(&report).unwrap();
        let restored: SessionReport = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, report);
    }
}
