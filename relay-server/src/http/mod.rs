//! HTTP endpoints for relay-server.
//!
//! Provides health checks and Prometheus metrics.

pub mod health;
mod metrics;

use crate::server::Relay;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(Extension(relay))
}

/// Serve the router on `listener` until the task is dropped.
pub async fn serve(listener: tokio::net::TcpListener, relay: Arc<Relay>) -> std::io::Result<()> {
    tracing::info!("HTTP endpoints on {}", listener.local_addr()?);
    axum::serve(listener, build_router(relay)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn test_relay() -> Arc<Relay> {
        Arc::new(Relay::new(Config::default(), Arc::new(MemoryStore::new())))
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = build_router(test_relay());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["sessions"], 0);
        assert_eq!(json["addresses"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_ok() {
        let relay = test_relay();
        relay
            .metrics()
            .files_stored
            .fetch_add(3, std::sync::atomic::Ordering::Relaxed);
        let app = build_router(relay);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("tls_relay_sessions_active 0"));
        assert!(text.contains("tls_relay_files_stored_total 3"));
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let app = build_router(test_relay());

        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
