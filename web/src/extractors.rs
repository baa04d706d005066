//! Custom Axum extractors.
//!
//! [`IdempotentRequest`] is the entry point for protected handlers: it pulls
//! the idempotency key and request id out of the headers, merges query and
//! body parameters into the request fingerprint, and pairs the result with
//! the [`Engine`] from router state.
//!
//! # Examples
//!
//! ```ignore
//! use axum::response::Response;
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
//! ```

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRef, FromRequest, Request},
    response::{IntoResponse, Response},
};
use idempotency_core::{fingerprint, Engine, EngineError, Fault, HandlerReply, RequestContext};
use serde_json::{Map, Value};
use std::future::Future;

use crate::error::ApiError;
use crate::response;

/// An inbound request paired with the engine that will guard its handler.
///
/// Extraction consumes the request body: the fingerprint covers the full
/// payload, so the engine must see it before the handler runs. Handlers
/// receive the merged parameters through [`context`](Self::context) instead
/// of re-reading the body. Buffering goes through the standard [`Bytes`]
/// extractor, so the router's request body size limit applies.
pub struct IdempotentRequest {
    engine: Engine,
    ctx: RequestContext,
}

#[async_trait]
impl<S> FromRequest<S> for IdempotentRequest
where
    Engine: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let engine = Engine::from_ref(state);
        let config = engine.config().await;

        let fingerprint = fingerprint::extract(
            req.headers()
                .iter()
                .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
            &config,
        );

        let path = req.uri().path().to_string();
        let mut params = Map::new();
        if let Some(query) = req.uri().query() {
            merge_query_params(&mut params, query);
        }

        let content_type = req
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        // Bytes::from_request enforces the router's body size limit.
        let bytes = Bytes::from_request(req, state).await.map_err(|rejection| {
            ApiError::new(
                rejection.status(),
                rejection.body_text(),
                "INVALID_BODY".to_string(),
            )
        })?;
        merge_body_params(&mut params, &content_type, &bytes);

        let mut ctx = RequestContext::new(path, fingerprint.request_id).with_params(params);
        if let Some(key) = fingerprint.key {
            ctx = ctx.with_key(key);
        }

        Ok(Self { engine, ctx })
    }
}

impl IdempotentRequest {
    /// Reject this request with 400 when no idempotency key was supplied,
    /// regardless of the configured default.
    #[must_use]
    pub fn require_key(mut self) -> Self {
        self.ctx = self.ctx.with_key_required(true);
        self
    }

    /// Let this request through without a key, regardless of the configured
    /// default.
    #[must_use]
    pub fn optional_key(mut self) -> Self {
        self.ctx = self.ctx.with_key_required(false);
        self
    }

    /// The context extracted from the request.
    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// The engine this request will run under.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run `handler` under idempotency control and render the outcome.
    ///
    /// Replays, conflicts, in-flight rejections and missing-key rejections
    /// come back as ready responses without invoking the handler. A handler
    /// fault is rendered through its own `IntoResponse`, and that rendering
    /// resolves the fault record so later retries of the key replay it.
    pub async fn execute<F, Fut, E>(self, handler: F) -> Response
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<HandlerReply, E>>,
        E: Fault + IntoResponse,
    {
        let Self { engine, ctx } = self;
        let idempotency_key = ctx.idempotency_key.clone();
        let request_id = ctx.request_id.clone();

        match engine.execute(ctx, handler).await {
            Ok(engine_response) => response::engine_response(engine_response),
            Err(EngineError::Handler(fault)) => {
                response::resolve_fault(&engine, fault, idempotency_key, &request_id).await
            }
            Err(EngineError::Idempotency(e)) => ApiError::from(e).into_response(),
        }
    }
}

fn merge_query_params(params: &mut Map<String, Value>, query: &str) {
    if let Ok(pairs) = serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
        for (name, value) in pairs {
            params.insert(name, Value::String(value));
        }
    }
}

/// Body parameters override query parameters with the same name. A JSON body
/// that is not an object (an array or a scalar) is fingerprinted whole under
/// the `_json` parameter.
fn merge_body_params(params: &mut Map<String, Value>, content_type: &str, bytes: &Bytes) {
    if content_type.starts_with("application/json") {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(fields)) => {
                for (name, value) in fields {
                    params.insert(name, value);
                }
            }
            Ok(other) => {
                params.insert("_json".to_string(), other);
            }
            Err(_) => {}
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        if let Ok(pairs) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(bytes) {
            for (name, value) in pairs {
                params.insert(name, Value::String(value));
            }
        }
    }
}
