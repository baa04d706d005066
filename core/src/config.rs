//! Engine configuration.
//!
//! Configuration is owned by the [`Engine`](crate::engine::Engine) and passed
//! at construction time. There is no process-global state: two engines in the
//! same process can run with different settings.

use serde_json::{Value, json};
use std::time::Duration;

/// Default lifetime of processing and completed records.
pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(216_000);

/// Default header consulted for the client-supplied idempotency key.
pub const DEFAULT_IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Default header consulted for the inbound request id.
pub const DEFAULT_REQUEST_ID_HEADER: &str = "x-request-id";

/// Engine configuration.
///
/// All fields have working defaults; override them with the `with_*` builders
/// or through [`Engine::configure`](crate::engine::Engine::configure).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Header name carrying the idempotency key, matched case-insensitively.
    ///
    /// Default: `idempotency-key`
    pub idempotency_key_header: String,

    /// Header name carrying the caller's request id, matched
    /// case-insensitively.
    ///
    /// Default: `x-request-id`
    pub request_id_header: String,

    /// Lifetime of processing and completed records.
    ///
    /// Default: 216 000 seconds (60 hours)
    pub expires_in: Duration,

    /// Whether requests without an idempotency key are rejected instead of
    /// bypassing the layer. Overridable per request.
    ///
    /// Default: `false`
    pub key_required: bool,

    /// Body returned when a key is reused with a different path or payload.
    pub conflict_response: Value,

    /// Body returned while the first request for a key is still in flight.
    pub processing_response: Value,

    /// Body returned when a mandatory idempotency key is absent.
    pub missing_key_response: Value,
}

impl Config {
    /// Create a configuration with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idempotency key header name.
    #[must_use]
    pub fn with_idempotency_key_header(mut self, header: impl Into<String>) -> Self {
        self.idempotency_key_header = header.into();
        self
    }

    /// Set the request id header name.
    #[must_use]
    pub fn with_request_id_header(mut self, header: impl Into<String>) -> Self {
        self.request_id_header = header.into();
        self
    }

    /// Set the record lifetime.
    #[must_use]
    pub const fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }

    /// Require an idempotency key on every request by default.
    #[must_use]
    pub const fn with_key_required(mut self, required: bool) -> Self {
        self.key_required = required;
        self
    }

    /// Set the body returned on conflicting key reuse.
    #[must_use]
    pub fn with_conflict_response(mut self, body: Value) -> Self {
        self.conflict_response = body;
        self
    }

    /// Set the body returned while the first request is in flight.
    #[must_use]
    pub fn with_processing_response(mut self, body: Value) -> Self {
        self.processing_response = body;
        self
    }

    /// Set the body returned when a mandatory key is absent.
    #[must_use]
    pub fn with_missing_key_response(mut self, body: Value) -> Self {
        self.missing_key_response = body;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idempotency_key_header: DEFAULT_IDEMPOTENCY_KEY_HEADER.to_string(),
            request_id_header: DEFAULT_REQUEST_ID_HEADER.to_string(),
            expires_in: DEFAULT_EXPIRES_IN,
            key_required: false,
            conflict_response: json!({
                "title": "Idempotency-Key is already used",
                "detail": "This operation is idempotent and it requires correct usage of Idempotency Key. Idempotency Key MUST not be reused across different payloads of this operation."
            }),
            processing_response: json!({
                "title": "A request is outstanding for this Idempotency-Key",
                "detail": "A request with the same idempotent key for the same operation is being processed or is outstanding."
            }),
            missing_key_response: json!({
                "title": "Idempotency-Key is missing",
                "detail": "This operation is idempotent and it requires correct usage of Idempotency Key."
            }),
        }
    }
}
