//! Class service
//!
//! Class setup and teacher-facing queries:
//! - Create classes with their weekly schedule rules
//! - Replace the rules (which moves every student's expected count)
//! - List expected sessions and recorded attendance for a class

use crate::cache::StatsCache;
use crate::db::repositories::{AttendanceRepository, ClassRepository};
use crate::models::{AttendanceRecord, Class, CreateClassInput, ScheduleRule};
use crate::services::clock::Clock;
use crate::services::schedule;
use anyhow::Context;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;

/// Longest range `expected_sessions` will expand
pub const MAX_EXPANSION_DAYS: i64 = 731;

/// Error types for class service operations
#[derive(Debug, thiserror::Error)]
pub enum ClassServiceError {
    #[error("Class not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// One expected meeting of a class
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledSession {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub rule: ScheduleRule,
}

/// Expected meetings of a class over a date range
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedSessions {
    pub class_id: i64,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub expected_count: u32,
    pub sessions: Vec<ScheduledSession>,
}

pub struct ClassService {
    classes: Arc<dyn ClassRepository>,
    records: Arc<dyn AttendanceRepository>,
    stats_cache: Arc<StatsCache>,
    clock: Arc<dyn Clock>,
}

fn validate_rules(rules: &[ScheduleRule]) -> Result<(), ClassServiceError> {
    for (position, rule) in rules.iter().enumerate() {
        rule.validate().map_err(|reason| {
            ClassServiceError::ValidationError(format!("Schedule rule {}: {}", position + 1, reason))
        })?;
    }
    Ok(())
}

fn require(field: &str, value: &str) -> Result<String, ClassServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ClassServiceError::ValidationError(format!("{} cannot be empty", field)));
    }
    Ok(trimmed.to_string())
}

impl ClassService {
    pub fn new(
        classes: Arc<dyn ClassRepository>,
        records: Arc<dyn AttendanceRepository>,
        stats_cache: Arc<StatsCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            classes,
            records,
            stats_cache,
            clock,
        }
    }

    /// Create a class
    ///
    /// # Errors
    /// - `ValidationError` if a name is empty or a rule ends before it starts
    pub async fn create(&self, input: &CreateClassInput) -> Result<Class, ClassServiceError> {
        let input = CreateClassInput {
            subject: require("Subject", &input.subject)?,
            department: require("Department", &input.department)?,
            semester: require("Semester", &input.semester)?,
            schedules: input.schedules.clone(),
        };
        validate_rules(&input.schedules)?;

        let class = self
            .classes
            .create(&input, self.clock.now())
            .await
            .context("Failed to create class")?;

        // New expected sessions for the whole cohort
        self.stats_cache.invalidate_all().await;
        tracing::info!(class_id = class.id, subject = %class.subject, "Class created");
        Ok(class)
    }

    pub async fn get(&self, id: i64) -> Result<Class, ClassServiceError> {
        self.classes
            .get_by_id(id)
            .await
            .context("Failed to get class")?
            .ok_or_else(|| ClassServiceError::NotFound(format!("Class with ID {} not found", id)))
    }

    /// Replace every weekly rule of a class.
    ///
    /// Expansion is not versioned, so the new rules apply to the whole
    /// semester and every cached statistic is dropped.
    ///
    /// # Errors
    /// - `ValidationError` if a rule ends before it starts
    /// - `NotFound` if the class doesn't exist
    pub async fn replace_schedules(&self, id: i64, rules: &[ScheduleRule]) -> Result<Class, ClassServiceError> {
        validate_rules(rules)?;

        let replaced = self
            .classes
            .replace_schedules(id, rules)
            .await
            .context("Failed to replace schedules")?;
        if !replaced {
            return Err(ClassServiceError::NotFound(format!("Class with ID {} not found", id)));
        }

        self.stats_cache.invalidate_all().await;
        tracing::info!(class_id = id, rules = rules.len(), "Class schedules replaced");
        self.get(id).await
    }

    /// Expected meetings of a class in `[from, to]`; none when `to < from`
    ///
    /// # Errors
    /// - `ValidationError` if the range is longer than `MAX_EXPANSION_DAYS`
    /// - `NotFound` if the class doesn't exist
    pub async fn expected_sessions(
        &self,
        id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<ExpectedSessions, ClassServiceError> {
        if (to - from).num_days() >= MAX_EXPANSION_DAYS {
            return Err(ClassServiceError::ValidationError(format!(
                "Range cannot exceed {} days",
                MAX_EXPANSION_DAYS
            )));
        }

        let class = self.get(id).await?;
        let sessions: Vec<ScheduledSession> = schedule::expand(&class.schedules, from, to)
            .into_iter()
            .map(|occurrence| ScheduledSession {
                date: occurrence.date,
                rule: occurrence.rule.clone(),
            })
            .collect();

        Ok(ExpectedSessions {
            class_id: class.id,
            from,
            to,
            expected_count: schedule::expected_count(&class.schedules, from, to),
            sessions,
        })
    }

    /// Attendance of a class, optionally for one day
    pub async fn records(&self, id: i64, day: Option<NaiveDate>) -> Result<Vec<AttendanceRecord>, ClassServiceError> {
        let class = self.get(id).await?;
        self.records
            .list_by_class(class.id, day)
            .await
            .context("Failed to list attendance records")
            .map_err(Into::into)
    }
}
