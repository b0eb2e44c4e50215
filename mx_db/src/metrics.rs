//! ABOUTME: View cache metrics
//! ABOUTME: Provides Prometheus counters for cache hits, writes, and invalidations

use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

/// Metrics for view cache operations
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    /// Reads answered from the cache
    pub hits: Counter,
    /// Reads that went to the data session
    pub misses: Counter,
    /// Background writes stored successfully
    pub writes: Counter,
    /// Background writes the store rejected
    pub write_failures: Counter,
    /// Writes discarded because the queue was full or closed
    pub dropped_writes: Counter,
    /// Entries removed after a mutation
    pub invalidations: Counter,
    /// Removals the store rejected
    pub invalidation_failures: Counter,
}

impl CacheMetrics {
    /// Create new cache metrics
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.inc();
    }

    pub fn record_miss(&self) {
        self.misses.inc();
    }

    pub fn record_write(&self) {
        self.writes.inc();
    }

    pub fn record_write_failure(&self) {
        self.write_failures.inc();
    }

    pub fn record_dropped_write(&self) {
        self.dropped_writes.inc();
    }

    pub fn record_invalidation(&self) {
        self.invalidations.inc();
    }

    pub fn record_invalidation_failure(&self) {
        self.invalidation_failures.inc();
    }

    /// Expose the counters under the `mixrepo_cache` prefix
    pub fn register(&self, registry: &mut Registry) {
        let registry = registry.sub_registry_with_prefix("mixrepo_cache");
        registry.register("hits", "View cache hits", self.hits.clone());
        registry.register("misses", "View cache misses", self.misses.clone());
        registry.register("writes", "Background cache writes", self.writes.clone());
        registry.register(
            "write_failures",
            "Background cache writes that failed",
            self.write_failures.clone(),
        );
        registry.register(
            "dropped_writes",
            "Cache writes dropped because the queue was full",
            self.dropped_writes.clone(),
        );
        registry.register(
            "invalidations",
            "Cache entries invalidated after writes",
            self.invalidations.clone(),
        );
        registry.register(
            "invalidation_failures",
            "Cache invalidations that failed",
            self.invalidation_failures.clone(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn counters_are_shared_between_clones() {
        let metrics = CacheMetrics::new();
        let clone = metrics.clone();
        clone.record_hit();
        clone.record_dropped_write();
        assert_eq!(metrics.hits.get(), 1);
        assert_eq!(metrics.dropped_writes.get(), 1);
    }

    #[test]
    fn registered_counters_are_encoded() {
        let metrics = CacheMetrics::new();
        let mut registry = Registry::default();
        metrics.register(&mut registry);
        metrics.record_miss();

        let mut out = String::new();
        encode(&mut out, &registry).unwrap();
        assert!(out.contains("mixrepo_cache_misses_total 1"));
    }
}
