//! In-memory storage backend.
//!
//! Backs the engine with a mutexed map for tests, demos, and single-process
//! deployments. Entries expire lazily: every access first drops whatever has
//! passed its deadline, so TTL semantics match a real backend without a
//! background sweeper.

use crate::error::Result;
use crate::store::IdempotencyStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory [`IdempotencyStore`].
///
/// Scan order is lexicographic, which keeps multi-record tests
/// deterministic. Not suitable for multi-process deployments: the atomicity
/// of [`set_if_absent`](IdempotencyStore::set_if_absent) only covers tasks
/// sharing this instance.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in an [`Arc`], ready to hand to an
    /// engine.
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Drop expired entries (called internally on access).
    #[allow(clippy::unwrap_used)] // Single-process store: mutex poisoning means a panicked writer
    fn cleanup_expired(&self) {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryStore {
    #[allow(clippy::unwrap_used)] // Single-process store: mutex poisoning means a panicked writer
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.cleanup_expired();
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    #[allow(clippy::unwrap_used)] // Single-process store: mutex poisoning means a panicked writer
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.cleanup_expired();
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    #[allow(clippy::unwrap_used)] // Single-process store: mutex poisoning means a panicked writer
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.cleanup_expired();
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    #[allow(clippy::unwrap_used)] // Single-process store: mutex poisoning means a panicked writer
    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key);
        Ok(())
    }

    #[allow(clippy::unwrap_used)] // Single-process store: mutex poisoning means a panicked writer
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.cleanup_expired();
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
