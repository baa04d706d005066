//! Storage backend abstraction.
//!
//! The engine talks to its backend exclusively through [`IdempotencyStore`].
//! The whole concurrency story rests on one primitive: an atomic
//! set-if-absent with expiry. Any backend that provides it can carry the
//! engine; everything else here is plain keyed string storage.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Keyed string storage with TTLs and one atomic conditional write.
///
/// Implementations must be safe to share across tasks. Keys are opaque
/// strings; namespacing is the caller's concern.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Store `value` under `key` with `ttl`, only if `key` is absent.
    ///
    /// Returns `true` when the write happened, `false` when the key already
    /// existed. This check-and-write must be atomic with respect to
    /// concurrent callers: for any one key, exactly one of a set of racing
    /// calls observes `true`.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the backend cannot be reached or rejects
    /// the command.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Store `value` under `key` with `ttl`, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the backend cannot be reached or rejects
    /// the command.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Fetch the value under `key`, if present and unexpired.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the backend cannot be reached or rejects
    /// the command.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the backend cannot be reached or rejects
    /// the command.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List the keys beginning with `prefix`. Order is backend-defined.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the backend cannot be reached or rejects
    /// the command.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}
