//! Idempotency-key request deduplication.
//!
//! Wraps handler invocations so that repeated requests carrying the same
//! client-supplied idempotency key return the first recorded response
//! instead of running the handler again. Reuse of a key with a different
//! path or payload is rejected, concurrent duplicates are fenced off by a
//! single atomic set-if-absent in the backing store, and handler faults are
//! parked in a short-lived error namespace until the host error pipeline
//! supplies their final rendering.
//!
//! # Flow
//!
//! ```text
//! request ──► fingerprint ──► lookup ──┬─► completed  ──► replay
//!                                      ├─► processing ──► 409
//!                                      ├─► mismatch   ──► 422
//!                                      └─► absent ──► claim (SET NX EX)
//!                                                       │
//!                                handler ◄──────────────┘
//!                                   │
//!                     ┌─────────────┴─────────────┐
//!                  Ok(reply)                   Err(fault)
//!                     │                           │
//!              record completed            record errored (30s)
//!                     │                           │
//!                  respond                  re-raise; resolve later
//! ```
//!
//! # Example
//!
//! ```no_run
//! use idempotency_core::{Engine, HandlerReply, InMemoryStore, RequestContext};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new(InMemoryStore::new_shared());
//!
//! let ctx = RequestContext::new("/payments", "req_1").with_key("a1b2c3");
//! let response = engine
//!     .execute::<_, _, std::convert::Infallible>(ctx, || async {
//!         Ok(HandlerReply::response(
//!             201,
//!             serde_json::json!({"id": "pay_1"}),
//!         ))
//!     })
//!     .await?;
//!
//! assert_eq!(response.status, 201);
//! # Ok(())
//! # }
//! ```
//!
//! Storage is pluggable through [`IdempotencyStore`]: [`InMemoryStore`]
//! ships here, a Redis backend ships in `idempotency-redis`, and the Axum
//! boundary lives in `idempotency-web`.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod memory;
pub mod record;
pub mod store;

// Re-export key types for convenience
pub use config::Config;
pub use engine::{
    Engine, EngineResponse, Fault, HandlerReply, ORIGINAL_REQUEST_HEADER, Outcome, RequestContext,
};
pub use error::{EngineError, IdempotencyError, Result};
pub use fingerprint::Fingerprint;
pub use memory::InMemoryStore;
pub use record::{FaultIdentity, IdempotencyRecord};
pub use store::IdempotencyStore;
