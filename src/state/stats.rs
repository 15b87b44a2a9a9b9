//! Per-hop summary statistics.
//!
//! Statistics are always recomputed from the outcomes currently retained for a
//! hop rather than updated incrementally, so evicted outcomes stop influencing
//! avg/min/max/jitter as soon as they leave the ring buffer.

use super::session::{Hop, HopStats, ProbeOutcome};

/// Summarize a time-ordered series of outcomes for one hop.
///
/// All latencies are milliseconds. No rounding is applied. With no successful
/// outcome, avg/min/max/jitter are 0 (never a sentinel). `current` is the
/// latency of the newest outcome, or 0 if the newest outcome failed.
pub fn compute<'a, I>(hop: &Hop, history: I) -> HopStats
where
    I: IntoIterator<Item = &'a ProbeOutcome>,
{
    let mut stats = HopStats::empty(hop);

    let mut successes: usize = 0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    // Welford's online algorithm for mean and variance
    let mut mean = 0.0;
    let mut m2 = 0.0;
    let mut last: Option<&ProbeOutcome> = None;

    for outcome in history {
        stats.count += 1;
        last = Some(outcome);

        let Some(latency) = outcome.latency_ms else {
            continue;
        };

        successes += 1;
        min = min.min(latency);
        max = max.max(latency);

        let delta = latency - mean;
        mean += delta / successes as f64;
        m2 += delta * (latency - mean);
    }

    if stats.count > 0 {
        stats.loss_percent = (1.0 - successes as f64 / stats.count as f64) * 100.0;
    }

    if successes > 0 {
        stats.avg = mean;
        stats.min = min;
        stats.max = max;
    }

    // Sample standard deviation
    if successes > 1 {
        stats.jitter_ms = (m2 / (successes - 1) as f64).max(0.0).sqrt();
    }

    if let Some(last) = last {
        stats.current = last.latency_ms.unwrap_or(0.0);
        stats.last_error = last.error;
    }

    stats
}
