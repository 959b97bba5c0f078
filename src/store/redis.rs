//! Redis-backed counter store.
//!
//! Each batch becomes one pipeline of `INCRBY` + `EXPIRE ... NX` pairs, so
//! a counter's TTL is set only when the key is first created and a counter
//! created mid-window still expires at the window boundary. `EXPIRE` with
//! the `NX` option needs a Redis server of at least 7.0.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::debug;

use super::{CounterIncrement, CounterStore};
use crate::error::StoreError;

/// A counter store backed by a shared Redis instance.
///
/// Connections are multiplexed through a [`ConnectionManager`], which
/// reconnects on failure; cloning the store shares the same connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at `url`, e.g. `redis://127.0.0.1:6379/`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(classify)?;
        let connection = client.get_connection_manager().await.map_err(classify)?;
        debug!(url = url, "connected to redis counter store");
        Ok(Self { connection })
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, ops: &[CounterIncrement]) -> Result<Vec<u64>, StoreError> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for op in ops {
            pipe.cmd("INCRBY").arg(&op.key).arg(op.amount);
            pipe.cmd("EXPIRE")
                .arg(&op.key)
                .arg(op.ttl.as_secs())
                .arg("NX")
                .ignore();
        }

        let mut connection = self.connection.clone();
        let counts: Vec<u64> = pipe.query_async(&mut connection).await.map_err(classify)?;
        Ok(counts)
    }

    async fn healthy(&self) -> bool {
        let mut connection = self.connection.clone();
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut connection).await;
        pong.is_ok()
    }
}

fn classify(e: redis::RedisError) -> StoreError {
    if e.is_connection_refusal() || e.is_io_error() || e.is_timeout() {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Protocol(e.to_string())
    }
}
