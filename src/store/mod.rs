//! Shared counter store boundary.
//!
//! The engine requires only a pipelined increment-with-expiry capability:
//! each key's counter is atomically incremented and, on first creation,
//! given a TTL. No ordering is guaranteed across keys within one batch
//! beyond "all complete or the batch errors".

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreError;

/// One counter operation in a pipelined batch.
#[derive(Debug, Clone)]
pub struct CounterIncrement {
    /// The counter key.
    pub key: String,
    /// Amount to add.
    pub amount: u64,
    /// Expiry applied only if the key does not already exist, sized to
    /// the remainder of the current unit window.
    pub ttl: Duration,
}

/// A shared counter store.
///
/// Implementations must make each key's increment atomic; the store's own
/// replication and persistence are its business.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment each key and return the resulting counts, in
    /// op order. An empty batch returns an empty vec without a round trip.
    async fn increment(&self, ops: &[CounterIncrement]) -> Result<Vec<u64>, StoreError>;

    /// Best-effort connectivity signal, e.g. for health endpoints.
    async fn healthy(&self) -> bool {
        true
    }
}
