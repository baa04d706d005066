//! Redis implementation of the [`IdempotencyStore`] trait.
//!
//! All keys are written with a TTL so abandoned records age out on their
//! own. The conditional claim maps to a single `SET key value NX EX ttl`
//! command, which Redis executes atomically.

use std::time::Duration;

use async_trait::async_trait;
use idempotency_core::{IdempotencyError, IdempotencyStore, Result};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};

/// Idempotency storage backed by Redis.
///
/// Uses a [`ConnectionManager`] which multiplexes commands over a single
/// connection and reconnects automatically, so cloning the store is cheap
/// and shares the underlying connection.
pub struct RedisStore {
    conn_manager: ConnectionManager,
}

impl RedisStore {
    /// Connects to Redis at the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::InvalidStorageConfig`] if the URL does
    /// not parse, and [`IdempotencyError::StoreUnavailable`] if the initial
    /// connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| IdempotencyError::InvalidStorageConfig {
            message: format!("Failed to create Redis client: {e}"),
        })?;

        let conn_manager =
            ConnectionManager::new(client)
                .await
                .map_err(|e| IdempotencyError::StoreUnavailable {
                    message: format!("Failed to connect to Redis: {e}"),
                })?;

        tracing::info!("RedisStore initialized successfully");

        Ok(Self { conn_manager })
    }
}

impl Clone for RedisStore {
    fn clone(&self) -> Self {
        Self {
            conn_manager: self.conn_manager.clone(),
        }
    }
}

/// Redis expiries are whole seconds; sub-second TTLs round up to one.
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn storage_error(operation: &str, error: &RedisError) -> IdempotencyError {
    if error.is_io_error() || error.is_connection_refusal() || error.is_timeout() {
        IdempotencyError::StoreUnavailable {
            message: format!("{operation}: {error}"),
        }
    } else {
        IdempotencyError::StoreFailed {
            message: format!("{operation}: {error}"),
        }
    }
}

#[async_trait]
impl IdempotencyStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();

        // SET NX EX replies OK when the key was claimed and Nil otherwise,
        // which the bool conversion maps to true / false.
        let claimed: bool = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| storage_error("Failed to claim key", &e))?;

        Ok(claimed)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();

        let _: () = conn
            .set_ex(key, value, ttl_seconds(ttl))
            .await
            .map_err(|e| storage_error("Failed to write key", &e))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn_manager.clone();

        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| storage_error("Failed to read key", &e))?;

        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();

        let _: i32 = conn
            .del(key)
            .await
            .map_err(|e| storage_error("Failed to delete key", &e))?;

        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn_manager.clone();
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();

        let mut iter = conn
            .scan_match::<_, String>(&pattern)
            .await
            .map_err(|e| storage_error("Failed to scan keys", &e))?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }

        tracing::debug!(pattern = %pattern, count = keys.len(), "Scanned keys");

        Ok(keys)
    }
}
