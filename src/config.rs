use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortest allowed tick interval
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
/// Longest allowed tick interval
pub const MAX_INTERVAL: Duration = Duration::from_secs(10);
/// 24 hours of history at one outcome per second
pub const DEFAULT_HISTORY_CAPACITY: usize = 86_400;
/// Upper bound for the discovery TTL
pub const MAX_TTL_LIMIT: u8 = 64;

/// Runtime configuration for a [`MonitorEngine`](crate::trace::MonitorEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Time between the start of consecutive ticks
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    /// Timeout for a single echo probe
    #[serde(with = "duration_serde")]
    pub probe_timeout: Duration,
    /// Maximum TTL tried during path discovery
    pub max_hops: u8,
    /// Timeout for each TTL during path discovery
    #[serde(with = "duration_serde")]
    pub discovery_timeout: Duration,
    /// Outcomes retained per hop
    pub history_capacity: usize,
    /// Probes allowed in flight at once during a tick
    pub max_concurrent_probes: usize,
    /// How long pause waits for the loop before abandoning it
    #[serde(with = "duration_serde")]
    pub pause_grace: Duration,
    /// Resolve hop hostnames during discovery
    pub dns_enabled: bool,
    /// ICMP echo payload size in bytes
    pub payload_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2500),
            probe_timeout: Duration::from_secs(1),
            max_hops: 30,
            discovery_timeout: Duration::from_secs(1),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            max_concurrent_probes: 16,
            pause_grace: Duration::from_secs(2),
            dns_enabled: true,
            payload_size: 56,
        }
    }
}

impl MonitorConfig {
    /// Return a copy with every field forced into its valid range
    pub fn normalized(mut self) -> Self {
        self.interval = clamp_interval(self.interval);
        self.max_hops = self.max_hops.clamp(1, MAX_TTL_LIMIT);
        self.history_capacity = self.history_capacity.max(1);
        self.max_concurrent_probes = self.max_concurrent_probes.max(1);
        self
    }
}

/// Clamp a tick interval into `[MIN_INTERVAL, MAX_INTERVAL]`
pub fn clamp_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_INTERVAL, MAX_INTERVAL)
}

/// Clamp an interval given in (possibly non-finite) seconds
pub fn clamp_interval_secs(seconds: f64) -> Duration {
    if seconds.is_nan() {
        return MIN_INTERVAL;
    }
    let secs = seconds.clamp(MIN_INTERVAL.as_secs_f64(), MAX_INTERVAL.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
