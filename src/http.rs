//! HTTP server for health checks and the Prometheus metrics endpoint.
//!
//! Runs on a separate tokio task next to the WebSocket gateway.

use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

/// Handler for GET /health - liveness only.
async fn health_handler(State(service): State<Arc<str>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": &*service,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub fn router(service: &str) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::<str>::from(service))
}

/// Run the HTTP server.
///
/// Binds to `0.0.0.0:port` and serves `/health` and `/metrics`.
/// This is a long-running task that should be spawned in the background.
pub async fn run_http_server(port: u16, service: String) {
    let app = router(&service);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("HTTP server listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind HTTP server on {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("HTTP server error: {}", e);
    }
}
