//! Mapping between engine outcomes and HTTP responses.
//!
//! [`engine_response`] renders the engine's verdict. `resolve_fault` handles
//! the other half of the fault protocol: it renders a handler fault through
//! its own `IntoResponse`, feeds that rendering back into
//! [`Engine::resolve_error`] so retries of the key replay it, and stamps the
//! response with the idempotency headers.

use axum::{
    body::Body,
    http::{header::HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use idempotency_core::{Engine, EngineResponse, Fault, ORIGINAL_REQUEST_HEADER};
use serde_json::Value;

use crate::error::ApiError;

/// Render an [`EngineResponse`] as an HTTP response.
#[must_use]
pub fn engine_response(response: EngineResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut http_response = (status, Json(response.body)).into_response();

    for (name, value) in &response.headers {
        apply_header(&mut http_response, name, value);
    }

    http_response
}

/// Headers the engine hands over are already plain strings; anything that
/// does not survive the round-trip into HTTP header types is dropped.
fn apply_header(response: &mut Response, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::from_str(value)) {
        response.headers_mut().insert(name, value);
    }
}

/// Render `fault` and resolve its recorded error with that rendering.
///
/// A keyless request recorded nothing, so its rendering passes through
/// untouched. Otherwise the rendered status and body are stored as the
/// replayable response for the key, and the live response carries the same
/// idempotency headers a recorded response would.
pub(crate) async fn resolve_fault<E>(
    engine: &Engine,
    fault: E,
    idempotency_key: Option<String>,
    request_id: &str,
) -> Response
where
    E: Fault + IntoResponse,
{
    let identity = fault.identity();
    let rendered = fault.into_response();

    let Some(key) = idempotency_key else {
        return rendered;
    };

    let (parts, body) = rendered.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return ApiError::internal(format!("Failed to buffer fault response: {e}"))
                .into_response();
        }
    };

    // Store the body as JSON when it parses, otherwise as the raw text.
    let stored_body: Value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

    if let Err(e) = engine
        .resolve_error(&identity, parts.status.as_u16(), stored_body)
        .await
    {
        return ApiError::from(e).into_response();
    }

    let mut response = Response::from_parts(parts, Body::from(bytes));
    apply_header(&mut response, ORIGINAL_REQUEST_HEADER, request_id);
    let key_header = engine.config().await.idempotency_key_header;
    apply_header(&mut response, &key_header, &key);

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use idempotency_core::{InMemoryStore, Outcome};
    use serde_json::json;

    #[derive(Debug)]
    struct Boom;

    impl std::fmt::Display for Boom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "boom")
        }
    }

    impl std::error::Error for Boom {}
    impl Fault for Boom {}

    impl IntoResponse for Boom {
        fn into_response(self) -> Response {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "boom"}))).into_response()
        }
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)] // Test code
    async fn test_engine_response_renders_status_headers_and_body() {
        let response = engine_response(EngineResponse {
            status: 201,
            headers: vec![
                ("original-request".to_string(), "req_1".to_string()),
                ("idempotency-key".to_string(), "key-1".to_string()),
            ],
            body: json!({"id": "pay_1"}),
            outcome: Outcome::Executed,
        });

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("original-request").unwrap(), "req_1");
        assert_eq!(response.headers().get("idempotency-key").unwrap(), "key-1");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"id": "pay_1"}));
    }

    #[tokio::test]
    async fn test_engine_response_with_invalid_status_falls_back_to_500() {
        let response = engine_response(EngineResponse {
            status: 1,
            headers: Vec::new(),
            body: Value::Null,
            outcome: Outcome::Executed,
        });

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_invalid_header_names_are_dropped() {
        let response = engine_response(EngineResponse {
            status: 200,
            headers: vec![("bad header name".to_string(), "value".to_string())],
            body: Value::Null,
            outcome: Outcome::Executed,
        });

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("bad header name").is_none());
    }

    #[tokio::test]
    async fn test_keyless_fault_passes_through_untouched() {
        let engine = Engine::new(InMemoryStore::new_shared());

        let response = resolve_fault(&engine, Boom, None, "req_1").await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(ORIGINAL_REQUEST_HEADER).is_none());
    }
}
