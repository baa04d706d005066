//! Axum integration for the idempotency engine.
//!
//! This crate wires the storage-agnostic engine from `idempotency-core`
//! into Axum handlers. One extractor carries the whole protocol: pull
//! [`IdempotentRequest`] in a handler and run the business logic through
//! [`IdempotentRequest::execute`].
//!
//! # Request Flow
//!
//! 1. **Extract**: the idempotency key and request id are read from the
//!    headers, query and body parameters are merged into the fingerprint,
//!    and the [`Engine`](idempotency_core::Engine) is taken from router
//!    state.
//! 2. **Dispatch**: `execute` consults the engine. Replays, conflicts and
//!    in-flight rejections return immediately without running the handler.
//! 3. **Record**: a fresh request runs the handler and records its
//!    response; a handler fault is rendered through its `IntoResponse` and
//!    that rendering is recorded for later retries.
//!
//! # Example
//!
//! ```ignore
//! use axum::{response::Response, routing::post, Router};
//! use idempotency_core::{Engine, HandlerReply, InMemoryStore};
//! use idempotency_web::IdempotentRequest;
//!
//! async fn create_payment(request: IdempotentRequest) -> Response {
//!     request
//!         .execute(|| async {
//!             let payment = charge_card().await?;
//!             Ok(HandlerReply::response(201, serde_json::to_value(payment)?))
//!         })
//!         .await
//! }
//!
//! let engine = Engine::new(InMemoryStore::new_shared());
//! let app = Router::new()
//!     .route("/payments", post(create_payment))
//!     .with_state(engine);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod response;

// Re-export key types for convenience
pub use error::ApiError;
pub use extractors::IdempotentRequest;
pub use response::engine_response;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, ApiError>;
