//! Statistics API endpoints
//!
//! - GET /api/v1/students/{id}/stats - Attendance summary (`?refresh=true` recomputes)
//! - GET /api/v1/students/{id}/trends - Weekly or monthly buckets
//! - POST /api/v1/stats/batch - Summaries for many students at once

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState};
use crate::models::{AttendanceStats, TrendBucket, TrendGranularity};

/// Most student IDs accepted by one batch request
pub const MAX_BATCH_STUDENTS: usize = 500;

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TrendsQuery {
    pub granularity: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendsResponse {
    pub student_id: i64,
    pub granularity: TrendGranularity,
    pub buckets: Vec<TrendBucket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub student_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub results: Vec<AttendanceStats>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/students/{id}/stats", get(get_stats))
        .route("/students/{id}/trends", get(get_trends))
        .route("/stats/batch", post(batch_stats))
}

/// GET /api/v1/students/{id}/stats
async fn get_stats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> Result<Json<AttendanceStats>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::validation_error(e.to_string()))?;
    Ok(Json(state.stats_service.stats(id, query.refresh).await?))
}

/// GET /api/v1/students/{id}/trends?granularity=week|month
async fn get_trends(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    query: Result<Query<TrendsQuery>, QueryRejection>,
) -> Result<Json<TrendsResponse>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::validation_error(e.to_string()))?;
    let granularity = match query.granularity.as_deref() {
        None | Some("") => TrendGranularity::default(),
        Some(raw) => raw
            .parse::<TrendGranularity>()
            .map_err(|e| ApiError::validation_error(e.to_string()))?,
    };

    let buckets = state.stats_service.trends(id, granularity).await?;
    Ok(Json(TrendsResponse {
        student_id: id,
        granularity,
        buckets,
    }))
}

/// POST /api/v1/stats/batch
///
/// All or nothing: one unknown student fails the request.
async fn batch_stats(
    State(state): State<AppState>,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::validation_error(e.to_string()))?;
    if request.student_ids.len() > MAX_BATCH_STUDENTS {
        return Err(ApiError::validation_error(format!(
            "At most {} students per batch",
            MAX_BATCH_STUDENTS
        )));
    }

    let results = state.stats_service.compute_batch(&request.student_ids).await?;
    Ok(Json(BatchResponse { results }))
}
