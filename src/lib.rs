//! Continuous per-hop latency and loss monitoring.
//!
//! A [`MonitorEngine`] discovers the path to a target once, then probes every
//! hop on a fixed interval and keeps a bounded history per hop from which
//! statistics are recomputed on demand.

pub mod config;
pub mod error;
pub mod logging;
pub mod lookup;
pub mod probe;
pub mod state;
pub mod trace;

pub use config::MonitorConfig;
pub use error::{DiscoveryError, MonitorError, ProbeError, ProbeErrorKind};
pub use probe::{IcmpProber, Prober};
pub use state::{EngineState, Hop, HopStats, ProbeOutcome, SessionReport, TickSummary};
pub use trace::{IcmpPathDiscoverer, MonitorEngine, PathDiscoverer};
