use anyhow::Result;
use futures::stream::{self, StreamExt};
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// How long a reverse lookup result (including a miss) stays cached
const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Maximum concurrent DNS lookups
const MAX_CONCURRENT_LOOKUPS: usize = 10;

/// DNS cache entry
struct CacheEntry {
    hostname: Option<String>,
    cached_at: Instant,
}

/// Reverse DNS with caching and a per-lookup deadline
pub struct DnsLookup {
    resolver: TokioAsyncResolver,
    cache: RwLock<HashMap<IpAddr, CacheEntry>>,
    cache_ttl: Duration,
    lookup_timeout: Duration,
}

impl DnsLookup {
    pub fn new(lookup_timeout: Duration) -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

        Ok(Self {
            resolver,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: CACHE_TTL,
            lookup_timeout,
        })
    }

    fn cached(&self, ip: IpAddr) -> Option<Option<String>> {
        let cache = self.cache.read();
        cache
            .get(&ip)
            .filter(|entry| entry.cached_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.hostname.clone())
    }

    /// Lookup reverse DNS for an IP, using cache. Failures and timeouts yield `None`.
    pub async fn reverse_lookup(&self, ip: IpAddr) -> Option<String> {
        if let Some(hit) = self.cached(ip) {
            return hit;
        }

        let hostname = match tokio::time::timeout(self.lookup_timeout, self.resolver.reverse_lookup(ip)).await {
            Ok(Ok(lookup)) => lookup
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string()),
            Ok(Err(e)) => {
                tracing::trace!(ip = %ip, error = %e, "Reverse lookup failed");
                None
            }
            Err(_) => {
                tracing::trace!(ip = %ip, "Reverse lookup timed out");
                None
            }
        };

        self.store(ip, hostname.clone());
        hostname
    }

    /// Cache a result, dropping entries that have gone stale
    fn store(&self, ip: IpAddr, hostname: Option<String>) {
        let mut cache = self.cache.write();
        cache.retain(|_, entry| entry.cached_at.elapsed() < self.cache_ttl);
        cache.insert(
            ip,
            CacheEntry {
                hostname,
                cached_at: Instant::now(),
            },
        );
    }

    /// Resolve many addresses with bounded concurrency. Unresolved ones are absent.
    pub async fn resolve_hostnames(&self, ips: &[IpAddr]) -> HashMap<IpAddr, String> {
        let mut unique = ips.to_vec();
        unique.sort();
        unique.dedup();

        stream::iter(unique)
            .map(|ip| async move { (ip, self.reverse_lookup(ip).await) })
            .buffer_unordered(MAX_CONCURRENT_LOOKUPS)
            .filter_map(|(ip, hostname)| async move { hostname.map(|h| (ip, h)) })
            .collect()
            .await
    }
}
