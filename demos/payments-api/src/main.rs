//! Payments HTTP server.
//!
//! Demonstration service for the idempotency engine. `POST /payments`
//! charges at most once per idempotency key and replays the recorded
//! response on retries; `POST /refunds` makes the key mandatory. Set
//! `REDIS_URL` to share records across instances, otherwise an in-memory
//! store backs the engine.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use idempotency_core::{Engine, Fault, HandlerReply, IdempotencyStore, InMemoryStore};
use idempotency_redis::RedisStore;
use idempotency_web::IdempotentRequest;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
enum PaymentError {
    #[error("amount must be positive")]
    InvalidAmount,
}

impl Fault for PaymentError {}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let body = json!({"error": self.to_string()});
        (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct Payment {
    id: Uuid,
    amount: i64,
    currency: String,
}

async fn create_payment(request: IdempotentRequest) -> Response {
    let params = &request.context().params;
    let amount = params.get("amount").and_then(Value::as_i64).unwrap_or(0);
    let currency = params
        .get("currency")
        .and_then(Value::as_str)
        .unwrap_or("EUR")
        .to_string();

    request
        .execute(|| async move {
            if amount <= 0 {
                return Err(PaymentError::InvalidAmount);
            }
            let payment = Payment {
                id: Uuid::new_v4(),
                amount,
                currency,
            };
            info!(payment_id = %payment.id, amount, "Payment captured");
            Ok(HandlerReply::response(201, json!(payment)))
        })
        .await
}

async fn create_refund(request: IdempotentRequest) -> Response {
    request
        .require_key()
        .execute(|| async {
            let refund_id = Uuid::new_v4();
            info!(refund_id = %refund_id, "Refund issued");
            Ok::<_, PaymentError>(HandlerReply::response(
                202,
                json!({"id": refund_id, "status": "pending"}),
            ))
        })
        .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "payments_api=info,idempotency_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Payments API");

    let store: Arc<dyn IdempotencyStore> = match std::env::var("REDIS_URL") {
        Ok(url) => {
            info!(redis_url = %url, "Using Redis idempotency storage");
            Arc::new(RedisStore::new(&url).await?)
        }
        Err(_) => {
            info!("REDIS_URL not set; using in-memory idempotency storage");
            InMemoryStore::new_shared()
        }
    };

    let engine = Engine::new(store);

    let app = Router::new()
        .route("/payments", post(create_payment))
        .route("/refunds", post(create_refund))
        .with_state(engine);

    let addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Graceful shutdown signal handler.
///
/// Waits for:
/// - Ctrl+C (SIGINT)
/// - SIGTERM (in production environments)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
