//! Class API endpoints
//!
//! Handles HTTP requests for classes and attendance capture:
//! - POST /api/v1/classes - Create a class with its schedule rules
//! - GET /api/v1/classes/{id} - Class with schedules and token expiry
//! - PUT /api/v1/classes/{id}/schedules - Replace the weekly rules
//! - POST /api/v1/classes/{id}/token - Issue a fresh session token
//! - GET /api/v1/classes/{id}/expected - Expected sessions in a date range
//! - GET /api/v1/classes/{id}/records - Recorded attendance
//! - POST /api/v1/classes/{id}/attendance - Verify a scanned or typed code

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState};
use crate::models::{AttendanceRecord, Class, CreateClassInput, ScheduleRule};
use crate::services::{
    AttendanceGateway, AttendanceRequest, ExpectedSessions, IssuedToken, VerificationOutcome,
};

/// Class as shown to clients; the token value itself is never included
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassResponse {
    #[serde(flatten)]
    pub class: Class,
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl From<Class> for ClassResponse {
    fn from(class: Class) -> Self {
        Self {
            token_expires_at: class.token_expires_at(),
            class,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReplaceSchedulesRequest {
    pub schedules: Vec<ScheduleRule>,
}

#[derive(Debug, Deserialize)]
pub struct ExpectedQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct RecordListResponse {
    pub records: Vec<AttendanceRecord>,
    pub total: usize,
}

/// Build the classes router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_class))
        .route("/{id}", get(get_class))
        .route("/{id}/schedules", put(replace_schedules))
        .route("/{id}/token", post(generate_token))
        .route("/{id}/expected", get(expected_sessions))
        .route("/{id}/records", get(list_records))
        .route("/{id}/attendance", post(submit_attendance))
}

fn bad_request(rejection: impl std::fmt::Display) -> ApiError {
    ApiError::validation_error(rejection.to_string())
}

/// POST /api/v1/classes
async fn create_class(
    State(state): State<AppState>,
    body: Result<Json<CreateClassInput>, JsonRejection>,
) -> Result<(StatusCode, Json<ClassResponse>), ApiError> {
    let Json(input) = body.map_err(bad_request)?;
    let class = state.class_service.create(&input).await?;
    Ok((StatusCode::CREATED, Json(class.into())))
}

/// GET /api/v1/classes/{id}
async fn get_class(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ClassResponse>, ApiError> {
    let class = state.class_service.get(id).await?;
    Ok(Json(class.into()))
}

/// PUT /api/v1/classes/{id}/schedules
async fn replace_schedules(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Result<Json<ReplaceSchedulesRequest>, JsonRejection>,
) -> Result<Json<ClassResponse>, ApiError> {
    let Json(request) = body.map_err(bad_request)?;
    let class = state
        .class_service
        .replace_schedules(id, &request.schedules)
        .await?;
    Ok(Json(class.into()))
}

/// POST /api/v1/classes/{id}/token
///
/// Replaces the current token; the previous one stops validating at once.
async fn generate_token(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<IssuedToken>, ApiError> {
    let issued = state.token_manager.generate(id).await?;
    Ok(Json(issued))
}

/// GET /api/v1/classes/{id}/expected?from=YYYY-MM-DD&to=YYYY-MM-DD
async fn expected_sessions(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    query: Result<Query<ExpectedQuery>, QueryRejection>,
) -> Result<Json<ExpectedSessions>, ApiError> {
    let Query(range) = query.map_err(bad_request)?;
    let expected = state
        .class_service
        .expected_sessions(id, range.from, range.to)
        .await?;
    Ok(Json(expected))
}

/// GET /api/v1/classes/{id}/records?date=YYYY-MM-DD
async fn list_records(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    query: Result<Query<RecordsQuery>, QueryRejection>,
) -> Result<Json<RecordListResponse>, ApiError> {
    let Query(filter) = query.map_err(bad_request)?;
    let records = state.class_service.records(id, filter.date).await?;
    Ok(Json(RecordListResponse {
        total: records.len(),
        records,
    }))
}

/// POST /api/v1/classes/{id}/attendance
///
/// Every verification result is a 200 carrying the terminal state; only a
/// malformed body is an error response.
async fn submit_attendance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Result<Json<AttendanceRequest>, JsonRejection>,
) -> Result<Json<VerificationOutcome>, ApiError> {
    let Json(mut request) = body.map_err(bad_request)?;
    request.class_id = id;
    let outcome = state.attendance_service.verify(&request).await;
    Ok(Json(outcome))
}
