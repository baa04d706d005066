//! The idempotency state machine.
//!
//! [`Engine::execute`] wraps one handler invocation: it looks up the cached
//! record for the request's idempotency key, replays a completed response,
//! rejects conflicting reuse and in-flight duplicates, and otherwise claims
//! the key with an atomic conditional write before running the handler.
//!
//! Mutual exclusion rests entirely on that single conditional write. The
//! engine holds no locks across store round-trips and never retries a lost
//! claim: losing it *is* the signal that a concurrent request got there
//! first.
//!
//! Handler faults are recorded under a separate error namespace with a short
//! lifetime and re-raised. Once the host error pipeline has rendered the
//! fault into a response, [`Engine::resolve_error`] promotes the error record
//! into an ordinary completed record so later retries replay it.

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::record::{FaultIdentity, IdempotencyRecord};
use crate::store::IdempotencyStore;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Response header echoing the id of the request that produced a recorded
/// response. The name is fixed; only the key header is configurable.
pub const ORIGINAL_REQUEST_HEADER: &str = "original-request";

/// Main-namespace prefix for cached records.
const KEY_PREFIX: &str = "idempotency:";

/// Error-namespace prefix for unresolved fault records.
const ERROR_KEY_PREFIX: &str = "idempotency:error:";

/// Lifetime of unresolved fault records. Deliberately short: a fault either
/// gets resolved by the host error pipeline within the same request, or the
/// record is garbage.
const ERROR_RECORD_TTL: Duration = Duration::from_secs(30);

/// Implemented by handler fault types so the engine can record them and
/// [`Engine::resolve_error`] can recognize them later.
///
/// The default identity is the concrete type name plus the rendered message,
/// which keeps distinct typed errors apart. Override
/// [`identity`](Fault::identity) when two fault sites can render identically
/// and must not cross-resolve.
pub trait Fault: std::error::Error {
    /// Identity under which this fault is recorded.
    fn identity(&self) -> FaultIdentity {
        FaultIdentity::new(std::any::type_name::<Self>(), self.to_string())
    }
}

impl Fault for std::convert::Infallible {}

/// What the engine needs to know about one inbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    /// Request path, the first half of the stored fingerprint.
    pub path: String,
    /// Merged request parameters, the second half of the stored fingerprint.
    pub params: Map<String, Value>,
    /// Client-supplied idempotency key, if any.
    pub idempotency_key: Option<String>,
    /// Request id attributed to this invocation.
    pub request_id: String,
    /// Per-request override of [`Config::key_required`].
    pub require_key: Option<bool>,
}

impl RequestContext {
    /// Create a context for `path`, attributed to `request_id`.
    #[must_use]
    pub fn new(path: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: Map::new(),
            idempotency_key: None,
            request_id: request_id.into(),
            require_key: None,
        }
    }

    /// Set the merged request parameters.
    #[must_use]
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Set the idempotency key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Override the configured key requirement for this request alone.
    #[must_use]
    pub const fn with_key_required(mut self, required: bool) -> Self {
        self.require_key = Some(required);
        self
    }
}

/// Successful handler output, as the engine sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerReply {
    /// A plain response, recorded verbatim.
    Response {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: Value,
    },

    /// An error the host framework rendered without raising (validation
    /// rejections and the like). Only the message is recorded as the body;
    /// the headers flow through to the live response.
    FrameworkError {
        /// HTTP status code.
        status: u16,
        /// Headers the framework attached to its rendering.
        headers: Vec<(String, String)>,
        /// Rendered error message.
        message: Value,
    },
}

impl HandlerReply {
    /// A plain response.
    #[must_use]
    pub const fn response(status: u16, body: Value) -> Self {
        Self::Response { status, body }
    }

    /// A framework-rendered error without extra headers.
    #[must_use]
    pub const fn framework_error(status: u16, message: Value) -> Self {
        Self::FrameworkError {
            status,
            headers: Vec::new(),
            message,
        }
    }
}

/// How the engine disposed of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The handler ran and its response was recorded.
    Executed,
    /// A completed record answered the request; the handler did not run.
    Replayed,
    /// The key was reused with a different path or payload.
    Conflict,
    /// The first request for this key is still in flight.
    InProgress,
    /// A mandatory idempotency key was absent.
    MissingKey,
    /// No key was supplied; the handler ran outside the idempotency layer.
    Bypassed,
}

/// Response produced by [`Engine::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResponse {
    /// HTTP status code.
    pub status: u16,
    /// Headers to attach to the outbound response.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Value,
    /// Which path produced this response.
    pub outcome: Outcome,
}

impl EngineResponse {
    fn conflict(config: &Config) -> Self {
        Self {
            status: 422,
            headers: Vec::new(),
            body: config.conflict_response.clone(),
            outcome: Outcome::Conflict,
        }
    }

    fn in_progress(config: &Config) -> Self {
        Self {
            status: 409,
            headers: Vec::new(),
            body: config.processing_response.clone(),
            outcome: Outcome::InProgress,
        }
    }

    fn missing_key(config: &Config) -> Self {
        Self {
            status: 400,
            headers: Vec::new(),
            body: config.missing_key_response.clone(),
            outcome: Outcome::MissingKey,
        }
    }

    fn bypassed(reply: HandlerReply) -> Self {
        match reply {
            HandlerReply::Response { status, body } => Self {
                status,
                headers: Vec::new(),
                body,
                outcome: Outcome::Bypassed,
            },
            HandlerReply::FrameworkError {
                status,
                headers,
                message,
            } => Self {
                status,
                headers,
                body: message,
                outcome: Outcome::Bypassed,
            },
        }
    }

    fn idempotent_headers(
        config: &Config,
        key: &str,
        original_request_id: &str,
    ) -> Vec<(String, String)> {
        vec![
            (
                ORIGINAL_REQUEST_HEADER.to_string(),
                original_request_id.to_string(),
            ),
            (config.idempotency_key_header.clone(), key.to_string()),
        ]
    }
}

/// The idempotency engine.
///
/// Cheap to clone: clones share the store handle and the configuration.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn IdempotencyStore>,
    config: Arc<RwLock<Config>>,
}

impl Engine {
    /// Create an engine over `store` with the default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self::with_config(store, Config::default())
    }

    /// Create an engine with an explicit configuration.
    #[must_use]
    pub fn with_config(store: Arc<dyn IdempotencyStore>, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// Snapshot the current configuration.
    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Mutate the configuration in place.
    ///
    /// Requests that already read their configuration snapshot are
    /// unaffected.
    pub async fn configure<F>(&self, f: F)
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.config.write().await;
        f(&mut config);
    }

    /// Restore the default configuration.
    ///
    /// The storage handle lives on the engine, not the configuration, so it
    /// survives the reset.
    pub async fn reset_config(&self) {
        *self.config.write().await = Config::default();
    }

    fn record_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    fn error_key(key: &str) -> String {
        format!("{ERROR_KEY_PREFIX}{key}")
    }

    /// Run `handler` under idempotency control.
    ///
    /// With no key, the handler runs outside the layer entirely (or the
    /// request is rejected when a key is mandatory) and nothing is recorded,
    /// not even a fault. With a key, a completed record is replayed,
    /// conflicting reuse answers 422, an in-flight duplicate answers 409,
    /// and a fresh key claims a processing record before the handler runs.
    ///
    /// A handler fault is recorded under the error namespace and re-raised
    /// as [`EngineError::Handler`]; hand the host pipeline's final rendering
    /// to [`resolve_error`](Self::resolve_error) to finish that record.
    ///
    /// # Errors
    ///
    /// [`EngineError::Handler`] re-raises the handler's own fault unchanged.
    /// [`EngineError::Idempotency`] carries storage and codec failures,
    /// which are never retried internally.
    pub async fn execute<F, Fut, E>(
        &self,
        ctx: RequestContext,
        handler: F,
    ) -> std::result::Result<EngineResponse, EngineError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<HandlerReply, E>>,
        E: Fault,
    {
        let config = self.config.read().await.clone();

        let Some(key) = ctx.idempotency_key.clone() else {
            if ctx.require_key.unwrap_or(config.key_required) {
                debug!(path = %ctx.path, "mandatory idempotency key absent");
                return Ok(EngineResponse::missing_key(&config));
            }
            debug!(path = %ctx.path, "no idempotency key; bypassing");
            let reply = handler().await.map_err(EngineError::Handler)?;
            return Ok(EngineResponse::bypassed(reply));
        };

        debug!(key = %key, path = %ctx.path, "handling request with idempotency");

        let record_key = Self::record_key(&key);
        if let Some(raw) = self.store.get(&record_key).await? {
            let record = IdempotencyRecord::decode(&raw)?;
            if !record.matches(&ctx.path, &ctx.params) {
                debug!(key = %key, "key reused with a different fingerprint");
                return Ok(EngineResponse::conflict(&config));
            }
            return match record {
                IdempotencyRecord::Processing { .. } => {
                    debug!(key = %key, "original request still in flight");
                    Ok(EngineResponse::in_progress(&config))
                }
                IdempotencyRecord::Completed {
                    status,
                    original_request_id,
                    response,
                    ..
                } => {
                    debug!(
                        key = %key,
                        original_request_id = %original_request_id,
                        "replaying recorded response"
                    );
                    Ok(EngineResponse {
                        status,
                        headers: EngineResponse::idempotent_headers(
                            &config,
                            &key,
                            &original_request_id,
                        ),
                        body: response,
                        outcome: Outcome::Replayed,
                    })
                }
                // Never written under the main namespace; fail closed.
                IdempotencyRecord::Errored { .. } => {
                    warn!(key = %key, "errored record under the main namespace");
                    Ok(EngineResponse::in_progress(&config))
                }
            };
        }

        let processing = IdempotencyRecord::processing(
            ctx.path.clone(),
            ctx.params.clone(),
            ctx.request_id.clone(),
        );
        let claimed = self
            .store
            .set_if_absent(&record_key, &processing.encode()?, config.expires_in)
            .await?;
        if !claimed {
            warn!(key = %key, "concurrent request is already processing this key");
            return Ok(EngineResponse::in_progress(&config));
        }
        debug!(key = %key, request_id = %ctx.request_id, "processing record stored");

        match handler().await {
            Ok(reply) => {
                let (status, reply_headers, body) = match reply {
                    HandlerReply::Response { status, body } => (status, Vec::new(), body),
                    HandlerReply::FrameworkError {
                        status,
                        headers,
                        message,
                    } => {
                        debug!(key = %key, status, "handler returned a framework-rendered error");
                        (status, headers, message)
                    }
                };

                let completed = IdempotencyRecord::completed(
                    ctx.path,
                    ctx.params,
                    ctx.request_id.clone(),
                    status,
                    body.clone(),
                );
                self.store
                    .set(&record_key, &completed.encode()?, config.expires_in)
                    .await?;
                debug!(key = %key, status, "response recorded");

                let mut headers = reply_headers;
                headers.extend(EngineResponse::idempotent_headers(
                    &config,
                    &key,
                    &ctx.request_id,
                ));
                Ok(EngineResponse {
                    status,
                    headers,
                    body,
                    outcome: Outcome::Executed,
                })
            }
            Err(fault) => {
                let identity = fault.identity();
                warn!(
                    key = %key,
                    kind = %identity.kind,
                    "handler faulted; recording for late resolution"
                );
                let errored = IdempotencyRecord::errored(
                    ctx.path,
                    ctx.params,
                    ctx.request_id.clone(),
                    500,
                    identity,
                );
                self.store
                    .set(&Self::error_key(&key), &errored.encode()?, ERROR_RECORD_TTL)
                    .await?;
                Err(EngineError::Handler(fault))
            }
        }
    }

    /// Attach the host pipeline's final rendering of a fault to the request
    /// that recorded it.
    ///
    /// Scans the error namespace for the first record whose stored kind and
    /// message equal `identity`, promotes it to a completed record under the
    /// main namespace with the supplied `status` and `body`, and deletes the
    /// error record. Returns the idempotency key of the promoted record, or
    /// `None` when nothing matched.
    ///
    /// Scan order is backend-defined: when two unresolved faults share a
    /// kind and message, which one gets this rendering is arbitrary.
    ///
    /// # Errors
    ///
    /// Storage failures and record decode failures propagate. A record that
    /// vanishes between scan and fetch is skipped, not an error: fault
    /// records expire quickly by design.
    pub async fn resolve_error(
        &self,
        identity: &FaultIdentity,
        status: u16,
        body: Value,
    ) -> Result<Option<String>> {
        let config = self.config.read().await.clone();

        for error_key in self.store.scan_prefix(ERROR_KEY_PREFIX).await? {
            let Some(raw) = self.store.get(&error_key).await? else {
                continue; // expired between scan and fetch
            };
            let record = IdempotencyRecord::decode(&raw)?;
            let IdempotencyRecord::Errored {
                path,
                params,
                original_request_id,
                error,
                ..
            } = record
            else {
                continue;
            };
            if error != *identity {
                continue;
            }
            let Some(key) = error_key.strip_prefix(ERROR_KEY_PREFIX) else {
                continue;
            };

            let completed =
                IdempotencyRecord::completed(path, params, original_request_id, status, body);
            self.store
                .set(&Self::record_key(key), &completed.encode()?, config.expires_in)
                .await?;
            self.store.delete(&error_key).await?;
            debug!(key = %key, status, "fault resolved with its final rendering");
            return Ok(Some(key.to_string()));
        }

        debug!(kind = %identity.kind, "no unresolved fault matches");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    #[test]
    fn test_key_namespacing() {
        assert_eq!(Engine::record_key("abc"), "idempotency:abc");
        assert_eq!(Engine::error_key("abc"), "idempotency:error:abc");
    }

    #[test]
    fn test_bypassed_framework_error_keeps_headers_and_unwraps_message() {
        let reply = HandlerReply::FrameworkError {
            status: 422,
            headers: vec![("x-validator".to_string(), "amount".to_string())],
            message: serde_json::json!({"error": "invalid amount"}),
        };

        let response = EngineResponse::bypassed(reply);
        assert_eq!(response.status, 422);
        assert_eq!(response.headers.len(), 1);
        assert_eq!(response.body, serde_json::json!({"error": "invalid amount"}));
        assert_eq!(response.outcome, Outcome::Bypassed);
    }

    #[test]
    fn test_default_fault_identity_uses_type_name_and_message() {
        #[derive(Debug)]
        struct Boom;
        impl std::fmt::Display for Boom {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "it broke")
            }
        }
        impl std::error::Error for Boom {}
        impl Fault for Boom {}

        let identity = Boom.identity();
        assert!(identity.kind.ends_with("Boom"));
        assert_eq!(identity.message, "it broke");
    }

    #[tokio::test]
    async fn test_configure_and_reset() {
        let engine = Engine::new(InMemoryStore::new_shared());

        engine.configure(|config| config.key_required = true).await;
        assert!(engine.config().await.key_required);

        engine.reset_config().await;
        assert!(!engine.config().await.key_required);
    }
}
