//! Health endpoint
//!
//! GET /api/v1/health - Liveness plus a database round trip

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::api::middleware::AppState;

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

/// 200 when the database answers, 503 otherwise
async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, code, database) = match state.pool.ping().await {
        Ok(()) => ("ok", StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "Database ping failed");
            ("degraded", StatusCode::SERVICE_UNAVAILABLE, "unreachable")
        }
    };

    let stats = &state.request_stats;
    (
        code,
        Json(HealthResponse {
            status,
            database,
            version: APP_VERSION,
            uptime_seconds: stats.uptime_seconds(),
            total_requests: stats.total_requests(),
            avg_response_time_ms: stats.avg_response_time_us() / 1000.0,
        }),
    )
}
