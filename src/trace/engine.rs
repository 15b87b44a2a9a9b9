use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::discover::{IcmpPathDiscoverer, PathDiscoverer};
use super::scheduler;
use crate::config::{MonitorConfig, clamp_interval_secs};
use crate::error::MonitorError;
use crate::lookup::{DnsLookup, is_valid_target};
use crate::probe::{IcmpProber, Prober};
use crate::state::{
    EngineState, HistoryStore, Hop, HopStats, MonitorSession, ProbeOutcome, SessionReport,
    TickSummary, compute,
};

/// State shared between the engine handle and its background loop
pub(crate) struct Shared<P, D> {
    pub(crate) config: MonitorConfig,
    pub(crate) interval: RwLock<Duration>,
    pub(crate) session: RwLock<MonitorSession>,
    pub(crate) history: HistoryStore,
    pub(crate) prober: P,
    pub(crate) discoverer: D,
    pub(crate) ticks: watch::Sender<TickSummary>,
}

/// The running background loop
struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Continuously probes every hop on the path to one target.
///
/// Lifecycle operations (`set_target`, `start`, `pause`, `clear`) are
/// serialized; reads (`get_snapshot`, `get_history`, ...) never wait for them
/// and may be called from any thread while the loop is running.
pub struct MonitorEngine<P: Prober, D: PathDiscoverer> {
    shared: Arc<Shared<P, D>>,
    worker: Mutex<Option<Worker>>,
}

impl MonitorEngine<IcmpProber, IcmpPathDiscoverer> {
    /// Engine backed by ICMP echo probes and an ICMP traceroute
    pub fn icmp(config: MonitorConfig) -> anyhow::Result<Self> {
        let dns = if config.dns_enabled {
            Some(Arc::new(DnsLookup::new(config.discovery_timeout)?))
        } else {
            None
        };
        let prober = IcmpProber::new(config.payload_size);
        let discoverer = IcmpPathDiscoverer::new(config.payload_size, dns);
        Ok(Self::new(config, prober, discoverer))
    }
}

impl<P: Prober, D: PathDiscoverer> MonitorEngine<P, D> {
    pub fn new(config: MonitorConfig, prober: P, discoverer: D) -> Self {
        let config = config.normalized();
        let (ticks, _) = watch::channel(TickSummary::default());

        Self {
            shared: Arc::new(Shared {
                interval: RwLock::new(config.interval),
                session: RwLock::new(MonitorSession::default()),
                history: HistoryStore::new(config.history_capacity),
                config,
                prober,
                discoverer,
                ticks,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Switch to a new target. A different host stops monitoring and drops
    /// the hop list and all history; the same host is a no-op.
    pub async fn set_target(&self, host: &str) {
        let host = host.trim();
        let mut worker = self.worker.lock().await;

        if self.shared.session.read().target == host {
            tracing::debug!(target = %host, "Target unchanged");
            return;
        }

        self.stop_worker(&mut worker).await;

        let mut session = self.shared.session.write();
        tracing::info!(from = %session.target, to = %host, "Target changed");
        *session = MonitorSession {
            target: host.to_string(),
            state: EngineState::Idle,
            hops: None,
            generation: session.generation + 1,
        };
        self.shared.history.reset();
        self.shared.ticks.send_replace(TickSummary::default());
    }

    /// Set the tick interval in seconds, clamped to the allowed range.
    /// Takes effect from the next tick.
    pub fn set_interval(&self, seconds: f64) {
        let interval = clamp_interval_secs(seconds);
        if interval.as_secs_f64() != seconds {
            tracing::info!(
                requested = seconds,
                applied = interval.as_secs_f64(),
                "Interval clamped"
            );
        }
        *self.shared.interval.write() = interval;
    }

    /// Start or resume monitoring.
    ///
    /// Discovers the path first when the current target has none, otherwise
    /// resumes probing the known hops. A no-op while already running.
    pub async fn start(&self) -> Result<(), MonitorError> {
        let mut worker = self.worker.lock().await;

        let generation = {
            let mut session = self.shared.session.write();
            if session.is_running() {
                tracing::debug!(state = ?session.state, "Start ignored, already running");
                return Ok(());
            }
            if session.target.is_empty() {
                tracing::warn!("Start rejected, no target set");
                return Err(MonitorError::EmptyTarget);
            }
            if !is_valid_target(&session.target) {
                tracing::warn!(target = %session.target, "Start rejected, invalid target");
                return Err(MonitorError::InvalidTarget(session.target.clone()));
            }

            session.state = if session.hops.is_some() {
                tracing::info!(target = %session.target, "Monitoring resumed");
                EngineState::Running
            } else {
                EngineState::Discovering
            };
            session.generation
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler::run(self.shared.clone(), generation, cancel.clone()));
        *worker = Some(Worker { handle, cancel });
        Ok(())
    }

    /// Stop probing after the in-flight tick, keeping target, hops and history.
    ///
    /// Waits at most `pause_grace` for the loop; a loop stuck in a probe is
    /// abandoned. Pausing an idle or paused engine does nothing.
    pub async fn pause(&self) {
        let mut worker = self.worker.lock().await;

        let state = self.shared.session.read().state;
        match state {
            EngineState::Idle => {
                tracing::warn!("Pause ignored, engine is idle");
                return;
            }
            EngineState::Paused => {
                tracing::debug!("Pause ignored, already paused");
                return;
            }
            EngineState::Discovering | EngineState::Running => {}
        }

        self.stop_worker(&mut worker).await;

        let mut session = self.shared.session.write();
        session.state = EngineState::Paused;
        tracing::info!(target = %session.target, "Monitoring paused");
    }

    /// Stop monitoring and forget target, hops and history
    pub async fn clear(&self) {
        let mut worker = self.worker.lock().await;
        self.stop_worker(&mut worker).await;

        let mut session = self.shared.session.write();
        *session = MonitorSession {
            generation: session.generation + 1,
            ..MonitorSession::default()
        };
        self.shared.history.reset();
        self.shared.ticks.send_replace(TickSummary::default());
        tracing::info!("Session cleared");
    }

    /// Discard retained outcomes, keeping target and hop list
    pub fn clear_history(&self) {
        self.shared.history.clear_outcomes();
        tracing::info!(target = %self.target(), "History cleared");
    }

    /// Current statistics for every hop, in path order
    pub fn get_snapshot(&self) -> Vec<HopStats> {
        let hops = self.hops();
        hops.iter()
            .map(|hop| {
                self.shared.history.with_hop(hop.index, |history| match history {
                    Some(history) => compute(hop, history.iter()),
                    None => HopStats::empty(hop),
                })
            })
            .collect()
    }

    /// Retained outcomes of one hop, oldest first
    pub fn get_history(&self, hop_index: u8) -> Vec<ProbeOutcome> {
        self.shared.history.snapshot(hop_index)
    }

    pub fn get_all_history(&self) -> HashMap<u8, Vec<ProbeOutcome>> {
        self.shared.history.snapshot_all()
    }

    /// Serializable summary of the session for persistence
    pub fn report(&self) -> SessionReport {
        let (target, state) = {
            let session = self.shared.session.read();
            (session.target.clone(), session.state)
        };

        SessionReport {
            target,
            generated_at: chrono::Utc::now(),
            interval_secs: self.interval().as_secs_f64(),
            state,
            hops: self.get_snapshot(),
        }
    }

    /// Receiver updated after every completed tick
    pub fn subscribe(&self) -> watch::Receiver<TickSummary> {
        self.shared.ticks.subscribe()
    }

    pub fn state(&self) -> EngineState {
        self.shared.session.read().state
    }

    pub fn target(&self) -> String {
        self.shared.session.read().target.clone()
    }

    pub fn interval(&self) -> Duration {
        *self.shared.interval.read()
    }

    /// Discovered hop list; empty before discovery
    pub fn hops(&self) -> Arc<Vec<Hop>> {
        self.shared.session.read().hops()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    /// Cancel the loop and wait for it, abandoning it after the grace period
    async fn stop_worker(&self, slot: &mut Option<Worker>) {
        let Some(Worker { mut handle, cancel }) = slot.take() else {
            return;
        };
        cancel.cancel();

        match tokio::time::timeout(self.shared.config.pause_grace, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_panic() => tracing::error!(error = %e, "Monitor loop panicked"),
            Ok(Err(_)) => {}
            Err(_) => {
                tracing::warn!(
                    grace_ms = self.shared.config.pause_grace.as_millis() as u64,
                    "Monitor loop did not stop in time, abandoning it"
                );
                handle.abort();
            }
        }
    }
}

impl<P: Prober, D: PathDiscoverer> Drop for MonitorEngine<P, D> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
            worker.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiscoveryError;
    use chrono::Utc;
    use std::net::{IpAddr, Ipv4Addr};

    struct InstantProber;

    impl Prober for InstantProber {
        async fn probe(&self, _address: IpAddr, _timeout: Duration) -> ProbeOutcome {
            ProbeOutcome::success_ms(Utc::now(), 5.0)
        }
    }

    struct TwoHops;

    impl PathDiscoverer for TwoHops {
        async fn discover(
            &self,
            _target: &str,
            _max_hops: u8,
            _per_hop_timeout: Duration,
        ) -> Result<Vec<Hop>, DiscoveryError> {
            Ok(vec![
                Hop::new(1, Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)))),
                Hop::new(2, None),
            ])
        }
    }

    fn engine() -> MonitorEngine<InstantProber, TwoHops> {
        MonitorEngine::new(MonitorConfig::default(), InstantProber, TwoHops)
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_states() {
        let engine = engine();
        assert_eq!(engine.state(), EngineState::Idle);

        engine.set_target("192.168.1.1").await;
        engine.start().await.unwrap();
        assert!(matches!(
            engine.state(),
            EngineState::Discovering | EngineState::Running
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.hops().len(), 2);

        engine.pause().await;
        assert_eq!(engine.state(), EngineState::Paused);
        assert_eq!(engine.target(), "192.168.1.1");

        engine.clear().await;
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.target(), "");
        assert!(engine.hops().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unprobed_hop_records_timeout() {
        let engine = engine();
        engine.set_target("192.168.1.1").await;
        engine.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.pause().await;

        let snapshot = engine.get_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].loss_percent, 0.0);
        assert_eq!(snapshot[1].loss_percent, 100.0);
        assert_eq!(snapshot[1].last_error, Some(crate::error::ProbeErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_invalid_target_rejected() {
        let engine = engine();
        engine.set_target("not a host").await;
        assert_eq!(
            engine.start().await,
            Err(MonitorError::InvalidTarget("not a host".to_string()))
        );
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_history_keeps_hops() {
        let engine = engine();
        engine.set_target("192.168.1.1").await;
        engine.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.pause().await;
        assert!(!engine.get_history(1).is_empty());

        engine.clear_history();
        assert!(engine.get_history(1).is_empty());
        assert_eq!(engine.hops().len(), 2);
        assert_eq!(engine.get_snapshot()[0].count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_serializes() {
        let engine = engine();
        engine.set_target("192.168.1.1").await;
        engine.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let report = engine.report();
        assert_eq!(report.target, "192.168.1.1");
        assert_eq!(report.state, EngineState::Running);
        assert_eq!(report.interval_secs, 2.5);
        assert_eq!(report.hops.len(), 2);

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"target\":\"192.168.1.1\""));
        engine.pause().await;
    }
}
