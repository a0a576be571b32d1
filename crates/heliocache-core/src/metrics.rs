use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lookup and fetch counters for the cache orchestrator.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hot_hits: AtomicU64,
    warm_hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    synthetic_fallbacks: AtomicU64,
    hot_errors: AtomicU64,
    warm_errors: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hot_hits: u64,
    pub warm_hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub synthetic_fallbacks: u64,
    pub hot_errors: u64,
    pub warm_errors: u64,
    pub hit_rate: f64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hot_hit(&self) {
        self.hot_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_warm_hit(&self) {
        self.warm_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch(&self, fell_back: bool) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if fell_back {
            self.synthetic_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_hot_error(&self) {
        self.hot_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_warm_error(&self) {
        self.warm_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Share of lookups served by either tier. Zero before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hot_hits.load(Ordering::Relaxed) + self.warm_hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hot_hits: self.hot_hits.load(Ordering::Relaxed),
            warm_hits: self.warm_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            synthetic_fallbacks: self.synthetic_fallbacks.load(Ordering::Relaxed),
            hot_errors: self.hot_errors.load(Ordering::Relaxed),
            warm_errors: self.warm_errors.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_counts_both_tiers() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.hit_rate(), 0.0);

        metrics.record_hot_hit();
        metrics.record_warm_hit();
        metrics.record_miss();
        metrics.record_miss();
        metrics.record_fetch(true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hit_rate, 0.5);
        assert_eq!(snapshot.fetches, 1);
        assert_eq!(snapshot.synthetic_fallbacks, 1);
    }
}
