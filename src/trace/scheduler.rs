use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::discover::PathDiscoverer;
use super::engine::Shared;
use crate::error::ProbeErrorKind;
use crate::probe::{Prober, SCHEDULING_SLACK};
use crate::state::{EngineState, Hop, ProbeOutcome, TickSummary};

/// Background loop owned by a [`MonitorEngine`](super::MonitorEngine).
///
/// Discovers the path if the session has none yet, then ticks until
/// cancelled. A cancelled loop finishes its current tick before returning.
pub(crate) async fn run<P, D>(shared: Arc<Shared<P, D>>, generation: u64, cancel: CancellationToken)
where
    P: Prober,
    D: PathDiscoverer,
{
    let Some(hops) = prepare_hops(&shared, generation, &cancel).await else {
        return;
    };

    let mut tick = shared.ticks.borrow().tick;

    while !cancel.is_cancelled() {
        let started = Instant::now();

        let outcomes = probe_hops(&shared, &hops).await;

        {
            // Holding the session lock keeps a retarget from slipping in between
            // the generation check and the appends
            let session = shared.session.read();
            if session.generation != generation {
                tracing::debug!(generation, "Session changed, dropping tick results");
                break;
            }
            for (index, outcome) in outcomes {
                shared.history.append(index, outcome);
            }
        }

        tick += 1;
        shared.ticks.send_replace(TickSummary {
            tick,
            completed_at: Some(Utc::now()),
            hop_count: hops.len(),
        });

        let interval = *shared.interval.read();
        let elapsed = started.elapsed();
        if elapsed > interval {
            tracing::debug!(
                tick,
                elapsed_ms = elapsed.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "Tick overran interval"
            );
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval.saturating_sub(elapsed)) => {}
        }
    }

    tracing::debug!(generation, tick, "Monitor loop stopped");
}

/// Reuse the session's hop list or run discovery for it.
///
/// Returns `None` when the loop should exit without ticking.
async fn prepare_hops<P, D>(
    shared: &Shared<P, D>,
    generation: u64,
    cancel: &CancellationToken,
) -> Option<Arc<Vec<Hop>>>
where
    P: Prober,
    D: PathDiscoverer,
{
    let (target, existing) = {
        let session = shared.session.read();
        if session.generation != generation {
            return None;
        }
        (session.target.clone(), session.hops.clone())
    };

    if let Some(hops) = existing {
        return Some(hops);
    }

    tracing::info!(target = %target, max_hops = shared.config.max_hops, "Discovering path");

    let discovered = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!(target = %target, "Discovery abandoned");
            return None;
        }
        result = shared.discoverer.discover(&target, shared.config.max_hops, shared.config.discovery_timeout) => result,
    };

    let hops = match discovered {
        Ok(hops) => {
            tracing::info!(target = %target, hop_count = hops.len(), "Path discovered");
            hops
        }
        Err(e) => {
            tracing::warn!(target = %target, error = %e, "Path discovery failed, monitoring no hops");
            Vec::new()
        }
    };
    let hops = Arc::new(hops);

    let mut session = shared.session.write();
    if session.generation != generation {
        return None;
    }
    shared.history.ensure_hops(hops.iter().map(|hop| hop.index));
    session.hops = Some(hops.clone());
    if session.state == EngineState::Discovering {
        session.state = EngineState::Running;
        tracing::info!(target = %target, "Monitoring started");
    }

    Some(hops)
}

/// Probe every hop once with bounded concurrency. Hops without an address
/// record a timeout without touching the network.
async fn probe_hops<P, D>(shared: &Arc<Shared<P, D>>, hops: &[Hop]) -> Vec<(u8, ProbeOutcome)>
where
    P: Prober,
    D: PathDiscoverer,
{
    let timeout = shared.config.probe_timeout;
    let permits = Arc::new(Semaphore::new(shared.config.max_concurrent_probes));
    let mut outcomes = Vec::with_capacity(hops.len());
    let mut tasks = JoinSet::new();

    for hop in hops {
        let index = hop.index;
        let Some(address) = hop.address else {
            outcomes.push((index, ProbeOutcome::failure(Utc::now(), ProbeErrorKind::Timeout)));
            continue;
        };

        let shared = shared.clone();
        let permits = permits.clone();
        tasks.spawn(async move {
            // The semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            let timestamp = Utc::now();
            let outcome = match tokio::time::timeout(timeout + SCHEDULING_SLACK, shared.prober.probe(address, timeout)).await
            {
                Ok(outcome) => outcome,
                Err(_) => ProbeOutcome::failure(timestamp, ProbeErrorKind::Timeout),
            };
            (index, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => outcomes.push(result),
            Err(e) => tracing::warn!(error = %e, "Probe task failed"),
        }
    }

    outcomes
}
