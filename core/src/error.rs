//! Error types for idempotency operations.

use thiserror::Error;

/// Result type alias for idempotency operations.
pub type Result<T> = std::result::Result<T, IdempotencyError>;

/// Failure modes of the idempotency layer itself.
///
/// Business outcomes (missing key, conflicting reuse, request in flight) are
/// **responses**, not errors; they never appear here. These variants cover
/// the infrastructure underneath: the backing store and the record codec.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    // ═══════════════════════════════════════════════════════════
    // Storage Errors
    // ═══════════════════════════════════════════════════════════

    /// The backing store could not be reached.
    #[error("Storage unavailable: {message}")]
    StoreUnavailable {
        /// Backend-provided detail.
        message: String,
    },

    /// The backing store accepted a command but failed to execute it.
    #[error("Storage operation failed: {message}")]
    StoreFailed {
        /// Backend-provided detail.
        message: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Codec Errors
    // ═══════════════════════════════════════════════════════════

    /// A cached record could not be encoded or decoded.
    #[error("Record codec failure: {0}")]
    Codec(#[from] serde_json::Error),

    // ═══════════════════════════════════════════════════════════
    // Configuration Errors
    // ═══════════════════════════════════════════════════════════

    /// The storage backend was configured with unusable parameters.
    ///
    /// Raised synchronously at construction, never retried: the integrator
    /// has to fix the configuration.
    #[error("Invalid storage configuration: {message}")]
    InvalidStorageConfig {
        /// What was wrong with the configuration.
        message: String,
    },
}

/// Error returned by [`Engine::execute`](crate::engine::Engine::execute).
///
/// Distinguishes a fault raised by the wrapped handler (recorded, then
/// re-raised for the host error pipeline) from a failure of the idempotency
/// layer itself.
#[derive(Debug, Error)]
pub enum EngineError<E>
where
    E: std::error::Error,
{
    /// The handler faulted. The fault has been recorded under the error
    /// namespace and is re-raised here unchanged.
    #[error("Handler fault: {0}")]
    Handler(#[source] E),

    /// The idempotency layer failed before, during, or after the handler.
    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),
}
