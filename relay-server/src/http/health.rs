//! Health check endpoint.

use crate::server::Relay;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Number of registered sessions.
    pub sessions: usize,
    /// Number of distinct peer addresses.
    pub addresses: usize,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
pub async fn health_handler(Extension(relay): Extension<Arc<Relay>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: relay.total_sessions(),
        addresses: relay.total_addresses(),
        uptime_seconds: relay.uptime().as_secs(),
    })
}
