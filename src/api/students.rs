//! Roster API endpoints
//!
//! - POST /api/v1/students - Register a student
//! - GET /api/v1/students/{id} - Get a student
//! - PUT /api/v1/semesters/{name} - Create a semester or move its start date

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState};
use crate::models::{CreateStudentInput, Semester, Student};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSemesterRequest {
    pub starts_on: NaiveDate,
}

pub fn students_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_student))
        .route("/{id}", get(get_student))
}

pub fn semesters_router() -> Router<AppState> {
    Router::new().route("/{name}", put(upsert_semester))
}

/// POST /api/v1/students
async fn create_student(
    State(state): State<AppState>,
    body: Result<Json<CreateStudentInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Student>), ApiError> {
    let Json(input) = body.map_err(|e| ApiError::validation_error(e.to_string()))?;
    let student = state.roster_service.create_student(&input).await?;
    Ok((StatusCode::CREATED, Json(student)))
}

/// GET /api/v1/students/{id}
async fn get_student(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Student>, ApiError> {
    Ok(Json(state.roster_service.get_student(id).await?))
}

/// PUT /api/v1/semesters/{name}
async fn upsert_semester(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<UpsertSemesterRequest>, JsonRejection>,
) -> Result<Json<Semester>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::validation_error(e.to_string()))?;
    let semester = state
        .roster_service
        .upsert_semester(&name, request.starts_on)
        .await?;
    Ok(Json(semester))
}
