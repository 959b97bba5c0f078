//! Per-rule statistics sinks.
//!
//! For every resolved rule the limiter reports `<full_key>.total_hits`,
//! `<full_key>.over_limit`, and `<full_key>.near_limit` through the
//! [`StatsSink`] capability. Aggregation and export belong to the
//! surrounding metrics pipeline.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A sink for monotonic counters.
pub trait StatsSink: Send + Sync {
    /// Add `delta` to the named counter.
    fn add(&self, counter: &str, delta: u64);

    /// Add one to the named counter.
    fn increment(&self, counter: &str) {
        self.add(counter, 1);
    }
}

/// A sink that drops everything.
#[derive(Debug, Default)]
pub struct NoopSink;

impl StatsSink for NoopSink {
    fn add(&self, _counter: &str, _delta: u64) {}
}

/// An in-process counter registry, suitable for tests and for scraping by
/// an exporter.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    counters: DashMap<String, AtomicU64>,
}

impl StatsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, zero if never written.
    pub fn get(&self, counter: &str) -> u64 {
        self.counters
            .get(counter)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// A sorted snapshot of all counters.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }
}

impl StatsSink for StatsRegistry {
    fn add(&self, counter: &str, delta: u64) {
        if let Some(existing) = self.counters.get(counter) {
            existing.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(counter.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_accumulates() {
        let registry = StatsRegistry::new();
        registry.increment("svc.client.total_hits");
        registry.add("svc.client.total_hits", 4);

        assert_eq!(registry.get("svc.client.total_hits"), 5);
        assert_eq!(registry.get("svc.client.over_limit"), 0);
    }

    #[test]
    fn test_registry_snapshot_is_sorted() {
        let registry = StatsRegistry::new();
        registry.increment("b.counter");
        registry.increment("a.counter");

        let snapshot = registry.snapshot();
        let keys: Vec<_> = snapshot.keys().collect();
        assert_eq!(keys, vec!["a.counter", "b.counter"]);
    }
}
