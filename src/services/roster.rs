//! Roster service
//!
//! Students and semester start dates. A semester's start opens the
//! statistics window for every class tagged with it, so moving it drops all
//! cached statistics.

use crate::cache::StatsCache;
use crate::db::repositories::{SemesterRepository, StudentRepository};
use crate::models::{CreateStudentInput, Semester, Student};
use crate::services::clock::Clock;
use anyhow::Context;
use chrono::NaiveDate;
use std::sync::Arc;

/// Error types for roster operations
#[derive(Debug, thiserror::Error)]
pub enum RosterServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct RosterService {
    students: Arc<dyn StudentRepository>,
    semesters: Arc<dyn SemesterRepository>,
    stats_cache: Arc<StatsCache>,
    clock: Arc<dyn Clock>,
}

fn non_empty(field: &str, value: &str) -> Result<String, RosterServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RosterServiceError::ValidationError(format!("{} cannot be empty", field)));
    }
    Ok(trimmed.to_string())
}

impl RosterService {
    pub fn new(
        students: Arc<dyn StudentRepository>,
        semesters: Arc<dyn SemesterRepository>,
        stats_cache: Arc<StatsCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            students,
            semesters,
            stats_cache,
            clock,
        }
    }

    /// Register a student
    ///
    /// # Errors
    /// - `ValidationError` if name, department or semester is empty
    pub async fn create_student(&self, input: &CreateStudentInput) -> Result<Student, RosterServiceError> {
        let input = CreateStudentInput {
            name: non_empty("Name", &input.name)?,
            department: non_empty("Department", &input.department)?,
            semester: non_empty("Semester", &input.semester)?,
        };

        let student = self
            .students
            .create(&input, self.clock.now())
            .await
            .context("Failed to create student")?;
        tracing::info!(student_id = student.id, "Student registered");
        Ok(student)
    }

    pub async fn get_student(&self, id: i64) -> Result<Student, RosterServiceError> {
        self.students
            .get_by_id(id)
            .await
            .context("Failed to get student")?
            .ok_or_else(|| RosterServiceError::NotFound(format!("Student with ID {} not found", id)))
    }

    /// Create the semester or move its start date
    pub async fn upsert_semester(&self, name: &str, starts_on: NaiveDate) -> Result<Semester, RosterServiceError> {
        let semester = Semester {
            name: non_empty("Semester name", name)?,
            starts_on,
        };

        let saved = self
            .semesters
            .upsert(&semester)
            .await
            .context("Failed to save semester")?;

        self.stats_cache.invalidate_all().await;
        tracing::info!(semester = %saved.name, starts_on = %saved.starts_on, "Semester start updated");
        Ok(saved)
    }
}
