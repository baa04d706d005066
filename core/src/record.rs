//! Cached record wire format.
//!
//! Records are stored as JSON and distinguished by the fields they carry, not
//! by an explicit tag: a processing record has a `processing` marker, a
//! completed record has a `response`, an errored record has an `error`. This
//! keeps stored values readable with nothing but `GET` in a Redis CLI.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity under which a handler fault is recorded: the error's kind and its
/// rendered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultIdentity {
    /// Error type name.
    pub kind: String,
    /// Rendered error message.
    pub message: String,
}

impl FaultIdentity {
    /// Create a fault identity.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// One cached record, keyed by idempotency key.
///
/// `path` and `params` are the request fingerprint: once written they never
/// change for the lifetime of the record. `original_request_id` is the id of
/// the request that first reached processing and is echoed back to every
/// replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdempotencyRecord {
    /// The first request is still in flight.
    Processing {
        /// Request path.
        path: String,
        /// Merged request parameters.
        params: Map<String, Value>,
        /// Id of the request being processed.
        original_request_id: String,
        /// Marker distinguishing this variant on the wire. Always `true`.
        processing: bool,
    },

    /// The handler finished; its response is held for replay.
    Completed {
        /// Request path.
        path: String,
        /// Merged request parameters.
        params: Map<String, Value>,
        /// HTTP status of the recorded response.
        status: u16,
        /// Id of the request that produced the response.
        original_request_id: String,
        /// Recorded response body.
        response: Value,
    },

    /// The handler faulted; the record awaits resolution by the host error
    /// pipeline and expires quickly if none arrives.
    Errored {
        /// Request path.
        path: String,
        /// Merged request parameters.
        params: Map<String, Value>,
        /// Status at the time of the fault. Provisional: resolution supplies
        /// the real one.
        status: u16,
        /// Id of the request that faulted.
        original_request_id: String,
        /// What faulted, for later recognition.
        error: FaultIdentity,
    },
}

impl IdempotencyRecord {
    /// Create a processing record.
    #[must_use]
    pub const fn processing(
        path: String,
        params: Map<String, Value>,
        original_request_id: String,
    ) -> Self {
        Self::Processing {
            path,
            params,
            original_request_id,
            processing: true,
        }
    }

    /// Create a completed record.
    #[must_use]
    pub const fn completed(
        path: String,
        params: Map<String, Value>,
        original_request_id: String,
        status: u16,
        response: Value,
    ) -> Self {
        Self::Completed {
            path,
            params,
            status,
            original_request_id,
            response,
        }
    }

    /// Create an errored record.
    #[must_use]
    pub const fn errored(
        path: String,
        params: Map<String, Value>,
        original_request_id: String,
        status: u16,
        error: FaultIdentity,
    ) -> Self {
        Self::Errored {
            path,
            params,
            status,
            original_request_id,
            error,
        }
    }

    /// Request path recorded at first processing.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Processing { path, .. }
            | Self::Completed { path, .. }
            | Self::Errored { path, .. } => path,
        }
    }

    /// Request parameters recorded at first processing.
    #[must_use]
    pub fn params(&self) -> &Map<String, Value> {
        match self {
            Self::Processing { params, .. }
            | Self::Completed { params, .. }
            | Self::Errored { params, .. } => params,
        }
    }

    /// Id of the request that first reached processing.
    #[must_use]
    pub fn original_request_id(&self) -> &str {
        match self {
            Self::Processing {
                original_request_id,
                ..
            }
            | Self::Completed {
                original_request_id,
                ..
            }
            | Self::Errored {
                original_request_id,
                ..
            } => original_request_id,
        }
    }

    /// Whether this record was written for the given request fingerprint.
    ///
    /// Parameter comparison is exact: key order is irrelevant, values and
    /// value types are not normalized.
    #[must_use]
    pub fn matches(&self, path: &str, params: &Map<String, Value>) -> bool {
        self.path() == path && self.params() == params
    }

    /// Encode to the JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Codec`](crate::error::IdempotencyError::Codec)
    /// if the record cannot be serialized.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Codec`](crate::error::IdempotencyError::Codec)
    /// if `raw` is not a valid record.
    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
