//! Attendance statistics service
//!
//! Computes a student's attendance summary and trends:
//! - Expected sessions come from expanding each enrolled class's current
//!   schedule rules over `[semester start, today]`
//! - Attended sessions are the student's records inside the same window
//! - `total = max(expected, attended)` keeps the rate within 0..=100
//!
//! Results are cached per student (last request wins) and batches of
//! students are computed with bounded concurrency and pacing between batches.

use crate::cache::StatsCache;
use crate::config::StatsConfig;
use crate::db::repositories::{
    AttendanceRepository, ClassRepository, SemesterRepository, StudentRepository,
};
use crate::models::{
    AttendanceRecord, AttendanceStats, Class, SubjectBreakdown, Tally, TrendBucket,
    TrendGranularity,
};
use crate::services::clock::{local_date, Clock};
use crate::services::schedule;
use anyhow::Context;
use chrono::{Datelike, Duration, Months, NaiveDate};
use chrono_tz::Tz;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Error types for statistics operations
#[derive(Debug, thiserror::Error)]
pub enum StatsServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Everything needed to compute one student's numbers
struct StudentHistory {
    student_id: i64,
    semester_start: NaiveDate,
    today: NaiveDate,
    classes: Vec<Class>,
    /// Only records of enrolled classes inside the window
    records: Vec<AttendanceRecord>,
}

/// Attendance statistics service
pub struct StatsService {
    students: Arc<dyn StudentRepository>,
    semesters: Arc<dyn SemesterRepository>,
    classes: Arc<dyn ClassRepository>,
    records: Arc<dyn AttendanceRepository>,
    cache: Arc<StatsCache>,
    clock: Arc<dyn Clock>,
    tz: Tz,
    config: StatsConfig,
}

impl StatsService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        students: Arc<dyn StudentRepository>,
        semesters: Arc<dyn SemesterRepository>,
        classes: Arc<dyn ClassRepository>,
        records: Arc<dyn AttendanceRepository>,
        cache: Arc<StatsCache>,
        clock: Arc<dyn Clock>,
        tz: Tz,
        config: StatsConfig,
    ) -> Self {
        Self {
            students,
            semesters,
            classes,
            records,
            cache,
            clock,
            tz,
            config,
        }
    }

    async fn load_history(&self, student_id: i64) -> Result<StudentHistory, StatsServiceError> {
        let student = self
            .students
            .get_by_id(student_id)
            .await
            .context("Failed to get student")?
            .ok_or_else(|| {
                StatsServiceError::NotFound(format!("Student with ID {} not found", student_id))
            })?;

        let semester = self
            .semesters
            .get_by_name(&student.semester)
            .await
            .context("Failed to get semester")?
            .ok_or_else(|| {
                StatsServiceError::NotFound(format!("Semester '{}' not found", student.semester))
            })?;

        let classes = self
            .classes
            .list_by_enrollment(&student.department, &student.semester)
            .await
            .context("Failed to list enrolled classes")?;

        let today = local_date(self.tz, self.clock.now());
        let enrolled: Vec<i64> = classes.iter().map(|c| c.id).collect();
        let records = self
            .records
            .list_by_student(student_id)
            .await
            .context("Failed to list attendance records")?
            .into_iter()
            .filter(|r| enrolled.contains(&r.class_id))
            .filter(|r| r.attended_on >= semester.starts_on && r.attended_on <= today)
            .collect();

        Ok(StudentHistory {
            student_id,
            semester_start: semester.starts_on,
            today,
            classes,
            records,
        })
    }

    /// Compute a student's statistics from storage, bypassing the cache.
    ///
    /// # Errors
    /// - `NotFound` if the student or their semester doesn't exist
    pub async fn compute_for_student(&self, student_id: i64) -> Result<AttendanceStats, StatsServiceError> {
        let history = self.load_history(student_id).await?;
        Ok(aggregate(&history))
    }

    /// Latest statistics for a student.
    ///
    /// Serves the cached result unless `refresh` is set or nothing is cached;
    /// a fresh result is cached only if no newer one was stored meanwhile.
    pub async fn stats(&self, student_id: i64, refresh: bool) -> Result<AttendanceStats, StatsServiceError> {
        if !refresh {
            match self.cache.get(student_id).await {
                Ok(Some(cached)) => return Ok(cached),
                Ok(None) => {}
                Err(e) => tracing::warn!(student_id, error = %e, "Ignoring unreadable cached statistics"),
            }
        }

        let generation = self.cache.next_generation();
        let stats = self.compute_for_student(student_id).await?;
        self.cache
            .store_if_latest(student_id, generation, &stats)
            .await
            .context("Failed to cache statistics")?;
        Ok(stats)
    }

    /// Weekly or monthly attendance buckets from semester start to today
    pub async fn trends(
        &self,
        student_id: i64,
        granularity: TrendGranularity,
    ) -> Result<Vec<TrendBucket>, StatsServiceError> {
        let history = self.load_history(student_id).await?;
        Ok(trend_buckets(&history, granularity))
    }

    /// Fresh statistics for many students, in input order.
    ///
    /// Runs `batch_size` students at a time with at most `batch_concurrency`
    /// in flight and sleeps `batch_delay_ms` between batches.
    ///
    /// Results are cached only once every student has been computed.
    ///
    /// # Errors
    /// The first failing student fails the whole call; no partial result
    /// is returned or cached.
    pub async fn compute_batch(&self, student_ids: &[i64]) -> Result<Vec<AttendanceStats>, StatsServiceError> {
        let generation = self.cache.next_generation();
        let mut results = Vec::with_capacity(student_ids.len());

        for (index, batch) in student_ids.chunks(self.config.batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.batch_delay()).await;
            }

            let computed: Vec<AttendanceStats> = stream::iter(batch.iter().copied())
                .map(|id| self.compute_for_student(id))
                .buffered(self.config.batch_concurrency)
                .try_collect()
                .await?;
            results.extend(computed);
        }

        for stats in &results {
            self.cache
                .store_if_latest(stats.student_id, generation, stats)
                .await
                .context("Failed to cache statistics")?;
        }

        tracing::info!(students = results.len(), "Batch statistics computed");
        Ok(results)
    }
}

/// Expected and attended counts per class within `[start, end]`
fn per_class_counts(history: &StudentHistory, start: NaiveDate, end: NaiveDate) -> HashMap<i64, (u32, u32)> {
    let mut counts: HashMap<i64, (u32, u32)> = history
        .classes
        .iter()
        .map(|c| (c.id, (schedule::expected_count(&c.schedules, start, end), 0)))
        .collect();

    for record in &history.records {
        if record.attended_on < start || record.attended_on > end {
            continue;
        }
        if let Some(entry) = counts.get_mut(&record.class_id) {
            entry.1 += 1;
        }
    }
    counts
}

fn aggregate(history: &StudentHistory) -> AttendanceStats {
    let counts = per_class_counts(history, history.semester_start, history.today);

    let mut by_subject: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
    for class in &history.classes {
        let (expected, attended) = counts.get(&class.id).copied().unwrap_or((0, 0));
        let entry = by_subject.entry(class.subject.as_str()).or_insert((0, 0));
        entry.0 += expected;
        entry.1 += attended;
    }

    let expected: u32 = by_subject.values().map(|(e, _)| e).sum();
    let attended: u32 = by_subject.values().map(|(_, a)| a).sum();
    let overall = Tally::from_counts(expected, attended);

    let subject_breakdown = by_subject
        .into_iter()
        .map(|(subject, (expected, attended))| {
            let tally = Tally::from_counts(expected, attended);
            SubjectBreakdown {
                subject: subject.to_string(),
                attendance_rate: tally.rate,
                total_classes: tally.total,
                attended_classes: tally.attended,
                missed_classes: tally.missed,
            }
        })
        .collect();

    AttendanceStats {
        student_id: history.student_id,
        attendance_rate: overall.rate,
        total_classes: overall.total,
        attended_classes: overall.attended,
        missed_classes: overall.missed,
        subject_breakdown,
    }
}

fn bucket_start(day: NaiveDate, granularity: TrendGranularity) -> NaiveDate {
    match granularity {
        TrendGranularity::Week => day - Duration::days(day.weekday().num_days_from_monday() as i64),
        TrendGranularity::Month => day - Duration::days(day.day0() as i64),
    }
}

fn next_bucket(start: NaiveDate, granularity: TrendGranularity) -> Option<NaiveDate> {
    match granularity {
        TrendGranularity::Week => start.checked_add_signed(Duration::days(7)),
        TrendGranularity::Month => start.checked_add_months(Months::new(1)),
    }
}

fn trend_buckets(history: &StudentHistory, granularity: TrendGranularity) -> Vec<TrendBucket> {
    let mut buckets: Vec<TrendBucket> = Vec::new();
    if history.today < history.semester_start {
        return buckets;
    }

    let mut cursor = bucket_start(history.semester_start, granularity);
    while cursor <= history.today {
        let Some(next) = next_bucket(cursor, granularity) else {
            break;
        };
        let from = cursor.max(history.semester_start);
        let to = (next - Duration::days(1)).min(history.today);

        let counts = per_class_counts(history, from, to);
        let expected = counts.values().map(|(e, _)| e).sum();
        let attended = counts.values().map(|(_, a)| a).sum();
        let tally = Tally::from_counts(expected, attended);

        let (attended_change, rate_change) = match buckets.last() {
            Some(prev) => (
                tally.attended as i64 - prev.attended as i64,
                tally.rate as i64 - prev.attendance_rate as i64,
            ),
            None => (0, 0),
        };

        buckets.push(TrendBucket {
            period_start: cursor,
            period_end: to,
            expected,
            attended: tally.attended,
            attendance_rate: tally.rate,
            attended_change,
            rate_change,
        });
        cursor = next;
    }

    buckets
}
