//! Redis storage backend for the idempotency engine.
//!
//! Implements `idempotency_core`'s
//! [`IdempotencyStore`](idempotency_core::IdempotencyStore) over a shared
//! Redis instance, which is what makes deduplication hold across processes: the
//! engine's claim step maps to a single `SET NX EX`, record lifetimes map to
//! key TTLs, and the error namespace is enumerated with cursored `SCAN`.
//!
//! # Example
//!
//! ```no_run
//! use idempotency_core::Engine;
//! use idempotency_redis::RedisStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisStore::new("redis://127.0.0.1:6379").await?;
//! let engine = Engine::new(Arc::new(store));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod store;

pub use store::RedisStore;
