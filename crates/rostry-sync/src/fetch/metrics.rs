//! Per-fetcher counters and health.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Consecutive failures at which a fetcher is reported unhealthy.
const UNHEALTHY_AFTER: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetcherHealth {
    Healthy,
    /// The last call failed
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub stale_hits: u64,
    pub cache_misses: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    /// Mean latency of calls to the source
    pub average_latency: Duration,
}

impl MetricsSnapshot {
    pub const fn health(&self) -> FetcherHealth {
        match self.consecutive_failures {
            0 => FetcherHealth::Healthy,
            n if n >= UNHEALTHY_AFTER => FetcherHealth::Unhealthy,
            _ => FetcherHealth::Degraded,
        }
    }
}

#[derive(Debug, Default)]
pub struct FetcherMetrics {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    stale_hits: AtomicU64,
    cache_misses: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl FetcherMetrics {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_hit(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, latency: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.add_latency(latency);
    }

    pub fn record_failure(&self, latency: Duration) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
    }

    fn add_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.total_latency_ms.fetch_add(millis, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let calls = successes + failures;
        let average_latency = if calls == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(self.total_latency_ms.load(Ordering::Relaxed) / calls)
        };

        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            successes,
            failures,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            average_latency,
        }
    }

    pub fn health(&self) -> FetcherHealth {
        self.snapshot().health()
    }
}
