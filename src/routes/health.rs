use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

/// Root endpoint - basic status
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "IPTV Proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

/// Cache stats
#[derive(Serialize)]
struct CacheStats {
    entries: usize,
    #[serde(rename = "expirationHours")]
    expiration_hours: u32,
}

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    uptime: u64,
    mode: &'static str,
    cache: CacheStats,
    hls_redirects: usize,
    routes: usize,
}

/// GET /health - Advanced health check
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = HealthResponse {
        status: "ok".to_string(),
        uptime: state.start_time.elapsed().as_secs(),
        mode: state.mode(),
        cache: CacheStats {
            entries: state.cache.entry_count().await,
            expiration_hours: state.config.cache_expiration_hours,
        },
        hls_redirects: state.hls.len().await,
        routes: state.routes.len(),
    };

    Json(health)
}

/// GET /metrics - Prometheus metrics
pub async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                b"Internal Server Error".to_vec(),
            )
        }
    }
}

/// Readiness probe (for Kubernetes)
///
/// The startup playlist is built before the listener binds, so only the
/// cache directory can go missing afterwards.
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match tokio::fs::metadata(&state.config.cache_dir).await {
        Ok(meta) if meta.is_dir() => (StatusCode::OK, "ready"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "not ready - cache directory unavailable"),
    }
}

/// Liveness probe (for Kubernetes)
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, "alive")
}
