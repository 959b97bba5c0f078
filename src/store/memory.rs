//! In-process counter store.
//!
//! A DashMap-backed store for single-process deployments and tests.
//! Expiry is checked on access: an expired counter is reset and given a
//! fresh TTL, matching the window semantics of the external stores.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Instant;

use super::{CounterIncrement, CounterStore};
use crate::error::StoreError;

#[derive(Debug)]
struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

/// A counter store living in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<String, CounterEntry>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live counters, expired or not.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// True if no counters exist.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Drop all counters. Primarily useful for tests.
    pub fn clear(&self) {
        self.counters.clear();
    }

    fn apply(&self, op: &CounterIncrement, now: Instant) -> u64 {
        let mut entry = self
            .counters
            .entry(op.key.clone())
            .or_insert_with(|| CounterEntry {
                count: 0,
                expires_at: now + op.ttl,
            });
        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + op.ttl;
        }
        entry.count += op.amount;
        entry.count
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, ops: &[CounterIncrement]) -> Result<Vec<u64>, StoreError> {
        let now = Instant::now();
        Ok(ops.iter().map(|op| self.apply(op, now)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn op(key: &str, amount: u64, ttl: Duration) -> CounterIncrement {
        CounterIncrement {
            key: key.to_string(),
            amount,
            ttl,
        }
    }

    #[test]
    fn test_increment_accumulates_per_key() {
        let store = MemoryStore::new();
        let counts = tokio_test::block_on(store.increment(&[
            op("a", 1, Duration::from_secs(60)),
            op("b", 5, Duration::from_secs(60)),
        ]))
        .unwrap();
        assert_eq!(counts, vec![1, 5]);

        let counts =
            tokio_test::block_on(store.increment(&[op("a", 2, Duration::from_secs(60))])).unwrap();
        assert_eq!(counts, vec![3]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_empty_batch_is_free() {
        let store = MemoryStore::new();
        let counts = tokio_test::block_on(store.increment(&[])).unwrap();
        assert!(counts.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_expired_counter_resets() {
        let store = MemoryStore::new();
        let short = Duration::from_millis(10);

        let counts = tokio_test::block_on(store.increment(&[op("a", 4, short)])).unwrap();
        assert_eq!(counts, vec![4]);

        std::thread::sleep(Duration::from_millis(20));

        // The old window has passed; the counter restarts.
        let counts =
            tokio_test::block_on(store.increment(&[op("a", 1, Duration::from_secs(60))])).unwrap();
        assert_eq!(counts, vec![1]);
    }

    #[test]
    fn test_ttl_set_only_on_creation() {
        let store = MemoryStore::new();
        let short = Duration::from_millis(100);

        tokio_test::block_on(store.increment(&[op("a", 1, short)])).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        // Second increment arrives mid-window with a longer TTL; it must
        // not extend the original window.
        tokio_test::block_on(store.increment(&[op("a", 1, Duration::from_secs(60))])).unwrap();
        std::thread::sleep(Duration::from_millis(120));

        let counts =
            tokio_test::block_on(store.increment(&[op("a", 1, Duration::from_secs(60))])).unwrap();
        assert_eq!(counts, vec![1]);
    }

    #[test]
    fn test_clear() {
        let store = MemoryStore::new();
        tokio_test::block_on(store.increment(&[op("a", 1, Duration::from_secs(60))])).unwrap();
        assert_eq!(store.len(), 1);
        store.clear();
        assert!(store.is_empty());
    }
}
