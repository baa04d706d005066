//! End-to-end tests for the idempotency extractor over a real router.

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use idempotency_core::{
    Config, Engine, Fault, HandlerReply, IdempotencyRecord, IdempotencyStore, InMemoryStore,
    ORIGINAL_REQUEST_HEADER,
};
use idempotency_web::IdempotentRequest;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

#[derive(Debug, thiserror::Error)]
enum PaymentError {
    #[error("card declined")]
    CardDeclined,
}

impl Fault for PaymentError {}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let body = json!({"error": self.to_string()});
        (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response()
    }
}

/// Router with a counting payments handler and a refunds handler that
/// insists on a key.
fn payments_app(engine: Engine, counter: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route(
            "/payments",
            post(move |request: IdempotentRequest| {
                let counter = counter.clone();
                async move {
                    request
                        .execute(|| async move {
                            let n = counter.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, PaymentError>(HandlerReply::response(
                                201,
                                json!({"id": format!("pay_{n}")}),
                            ))
                        })
                        .await
                }
            }),
        )
        .route(
            "/refunds",
            post(move |request: IdempotentRequest| async move {
                request
                    .require_key()
                    .execute(|| async {
                        Ok::<_, PaymentError>(HandlerReply::response(201, json!({"refunded": true})))
                    })
                    .await
            }),
        )
        .with_state(engine)
}

/// Router whose handler fails on the first attempt and succeeds afterwards.
fn flaky_app(engine: Engine, attempts: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route(
            "/payments",
            post(move |request: IdempotentRequest| {
                let attempts = attempts.clone();
                async move {
                    request
                        .execute(|| async move {
                            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                                Err(PaymentError::CardDeclined)
                            } else {
                                Ok(HandlerReply::response(201, json!({"id": "pay_retry"})))
                            }
                        })
                        .await
                }
            }),
        )
        .with_state(engine)
}

#[allow(clippy::unwrap_used)] // Test code
fn payment_request(key: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/payments")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("idempotency-key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

const PAYMENT_BODY: &str = r#"{"amount": 100, "currency": "EUR"}"#;

#[allow(clippy::unwrap_used)] // Test code
async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[allow(clippy::unwrap_used)] // Test code
fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .map(|v| v.to_str().unwrap().to_string())
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_first_request_executes_and_carries_idempotency_headers() {
    let counter = Arc::new(AtomicUsize::new(0));
    let app = payments_app(Engine::new(InMemoryStore::new_shared()), counter.clone());

    let response = app
        .oneshot(payment_request(Some("key-1"), PAYMENT_BODY))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        header_value(&response, "idempotency-key"),
        Some("key-1".to_string())
    );
    let original = header_value(&response, ORIGINAL_REQUEST_HEADER).unwrap();
    assert!(original.starts_with("req_"));
    assert_eq!(body_json(response).await, json!({"id": "pay_0"}));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_retry_replays_recorded_response_without_rerunning_handler() {
    let counter = Arc::new(AtomicUsize::new(0));
    let app = payments_app(Engine::new(InMemoryStore::new_shared()), counter.clone());

    let first = app
        .clone()
        .oneshot(payment_request(Some("key-1"), PAYMENT_BODY))
        .await
        .unwrap();
    let first_original = header_value(&first, ORIGINAL_REQUEST_HEADER).unwrap();

    let second = app
        .oneshot(payment_request(Some("key-1"), PAYMENT_BODY))
        .await
        .unwrap();

    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(
        header_value(&second, ORIGINAL_REQUEST_HEADER),
        Some(first_original)
    );
    assert_eq!(body_json(second).await, json!({"id": "pay_0"}));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_key_reuse_with_different_payload_is_rejected() {
    let counter = Arc::new(AtomicUsize::new(0));
    let app = payments_app(Engine::new(InMemoryStore::new_shared()), counter.clone());

    let first = app
        .clone()
        .oneshot(payment_request(Some("key-1"), PAYMENT_BODY))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let conflicting = app
        .oneshot(payment_request(
            Some("key-1"),
            r#"{"amount": 999, "currency": "EUR"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(conflicting.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body_json(conflicting).await,
        Config::default().conflict_response
    );
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_key_reuse_with_different_array_body_is_rejected() {
    let counter = Arc::new(AtomicUsize::new(0));
    let app = payments_app(Engine::new(InMemoryStore::new_shared()), counter.clone());

    let first = app
        .clone()
        .oneshot(payment_request(Some("key-1"), r#"[{"amount": 100}]"#))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    // An array body carries no named fields, but it still has to count
    // towards the fingerprint.
    let conflicting = app
        .oneshot(payment_request(Some("key-1"), r#"[{"amount": 999}]"#))
        .await
        .unwrap();

    assert_eq!(conflicting.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_in_flight_duplicate_is_rejected() {
    let store = InMemoryStore::new_shared();
    let params: Map<String, Value> = json!({"amount": 100, "currency": "EUR"})
        .as_object()
        .cloned()
        .unwrap();
    let processing =
        IdempotencyRecord::processing("/payments".to_string(), params, "req_first".to_string());
    store
        .set(
            "idempotency:key-1",
            &processing.encode().unwrap(),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let app = payments_app(Engine::new(store), counter.clone());

    let response = app
        .oneshot(payment_request(Some("key-1"), PAYMENT_BODY))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(
        body_json(response).await,
        Config::default().processing_response
    );
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_keyless_requests_bypass_idempotency() {
    let counter = Arc::new(AtomicUsize::new(0));
    let app = payments_app(Engine::new(InMemoryStore::new_shared()), counter.clone());

    let first = app
        .clone()
        .oneshot(payment_request(None, PAYMENT_BODY))
        .await
        .unwrap();
    let second = app
        .oneshot(payment_request(None, PAYMENT_BODY))
        .await
        .unwrap();

    assert_eq!(first.status(), StatusCode::CREATED);
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(header_value(&second, ORIGINAL_REQUEST_HEADER), None);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_missing_key_is_rejected_when_config_requires_one() {
    let engine = Engine::with_config(
        InMemoryStore::new_shared(),
        Config::new().with_key_required(true),
    );
    let counter = Arc::new(AtomicUsize::new(0));
    let app = payments_app(engine, counter.clone());

    let response = app
        .oneshot(payment_request(None, PAYMENT_BODY))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        Config::default().missing_key_response
    );
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_route_can_require_a_key_on_its_own() {
    let counter = Arc::new(AtomicUsize::new(0));
    let app = payments_app(Engine::new(InMemoryStore::new_shared()), counter);

    let request = Request::builder()
        .method("POST")
        .uri("/refunds")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        Config::default().missing_key_response
    );
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_body_over_router_limit_is_rejected_before_handler_runs() {
    let counter = Arc::new(AtomicUsize::new(0));
    let app = payments_app(Engine::new(InMemoryStore::new_shared()), counter.clone())
        .layer(DefaultBodyLimit::max(64));

    let oversized = format!(r#"{{"note": "{}"}}"#, "x".repeat(256));
    let response = app
        .oneshot(payment_request(Some("key-1"), &oversized))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["code"], json!("INVALID_BODY"));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_fault_rendering_is_recorded_and_replayed_on_retry() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let app = flaky_app(Engine::new(InMemoryStore::new_shared()), attempts.clone());

    let first = app
        .clone()
        .oneshot(payment_request(Some("key-1"), PAYMENT_BODY))
        .await
        .unwrap();

    assert_eq!(first.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(
        header_value(&first, "idempotency-key"),
        Some("key-1".to_string())
    );
    let first_original = header_value(&first, ORIGINAL_REQUEST_HEADER).unwrap();
    assert_eq!(body_json(first).await, json!({"error": "card declined"}));

    // The retry must replay the recorded failure, not run the now-working
    // handler.
    let second = app
        .oneshot(payment_request(Some("key-1"), PAYMENT_BODY))
        .await
        .unwrap();

    assert_eq!(second.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(
        header_value(&second, ORIGINAL_REQUEST_HEADER),
        Some(first_original)
    );
    assert_eq!(body_json(second).await, json!({"error": "card declined"}));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_keyless_fault_is_not_recorded() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let app = flaky_app(Engine::new(InMemoryStore::new_shared()), attempts.clone());

    let first = app
        .clone()
        .oneshot(payment_request(None, PAYMENT_BODY))
        .await
        .unwrap();
    let second = app
        .oneshot(payment_request(None, PAYMENT_BODY))
        .await
        .unwrap();

    assert_eq!(first.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(header_value(&first, ORIGINAL_REQUEST_HEADER), None);
    // The second attempt runs the handler again and succeeds.
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
