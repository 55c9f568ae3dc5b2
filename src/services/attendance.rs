//! Attendance verification
//!
//! Resolves one submitted code to exactly one terminal capture state. Checks
//! run fail-fast in this order:
//!
//! 1. the code names a different class, cannot be decoded, or the student is
//!    unknown or not enrolled in the class -> `wrong_session`
//! 2. no schedule window is open right now -> `outside_schedule`
//! 3. the token is stale or was replaced -> `expired_token`
//! 4. the student already has today's record -> `already_marked`
//! 5. otherwise the record is written -> `success`, or `failure` on I/O error
//!
//! Checks 4 and 5 are not transactional. Two devices racing past check 4 are
//! settled by the unique key on attendance records: the losing insert is
//! reported as `already_marked`.

use crate::cache::StatsCache;
use crate::db::repositories::{AttendanceRepository, ClassRepository, StudentRepository};
use crate::models::{AttendanceRecord, CaptureState, InsertOutcome, NewAttendanceRecord};
use crate::services::clock::{local_datetime, Clock};
use crate::services::payload::ScanPayload;
use crate::services::schedule;
use crate::services::token;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which validity window had elapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElapsedWindow {
    /// No schedule rule covers the current local time
    Schedule,
    /// The token expired or no longer matches the class's current token
    Token,
}

impl fmt::Display for ElapsedWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElapsedWindow::Schedule => write!(f, "schedule"),
            ElapsedWindow::Token => write!(f, "token"),
        }
    }
}

/// Error types for attendance verification
#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    /// Malformed payload, code for a different class, or a class or
    /// student that doesn't exist or doesn't match
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("The {0} window has elapsed")]
    Expiry(ElapsedWindow),

    /// Informational: the record already exists
    #[error("Attendance already recorded")]
    Duplicate,

    /// Storage read or write failed
    #[error("Storage error: {0}")]
    TransientIo(#[from] anyhow::Error),

    /// Camera access denied; needs user action before another attempt
    #[error("Camera permission denied")]
    Permission,
}

impl AttendanceError {
    /// Only storage failures may be retried without user action
    pub fn is_retryable(&self) -> bool {
        matches!(self, AttendanceError::TransientIo(_))
    }

    /// Terminal state this error resolves to
    pub fn capture_state(&self) -> CaptureState {
        match self {
            AttendanceError::Validation(_) => CaptureState::WrongSession,
            AttendanceError::Expiry(ElapsedWindow::Schedule) => CaptureState::OutsideSchedule,
            AttendanceError::Expiry(ElapsedWindow::Token) => CaptureState::ExpiredToken,
            AttendanceError::Duplicate => CaptureState::AlreadyMarked,
            AttendanceError::TransientIo(_) => CaptureState::Failure,
            AttendanceError::Permission => CaptureState::PermissionDenied,
        }
    }
}

/// A student's attempt to mark attendance for a class
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRequest {
    /// Class the student is checking into
    #[serde(skip)]
    pub class_id: i64,
    pub student_id: i64,
    /// Scanned link or manually typed code
    pub code: String,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
}

/// Terminal result of one verification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub state: CaptureState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<AttendanceRecord>,
    pub retryable: bool,
}

impl VerificationOutcome {
    pub fn success(record: AttendanceRecord) -> Self {
        Self {
            state: CaptureState::Success,
            message: CaptureState::Success.message().to_string(),
            record: Some(record),
            retryable: false,
        }
    }

    pub fn from_error(err: &AttendanceError) -> Self {
        let state = err.capture_state();
        Self {
            state,
            message: state.message().to_string(),
            record: None,
            retryable: err.is_retryable(),
        }
    }
}

/// Result of the idle-time precondition re-check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleStatus {
    pub within_schedule: bool,
    pub already_marked: bool,
    pub checked_at: DateTime<Utc>,
}

/// What a capture session needs from the verifying side
#[async_trait]
pub trait AttendanceGateway: Send + Sync {
    /// Run the full check sequence and resolve to a terminal outcome
    async fn verify(&self, request: &AttendanceRequest) -> VerificationOutcome;

    /// Re-evaluate the schedule and duplicate preconditions
    async fn precheck(&self, class_id: i64, student_id: i64) -> anyhow::Result<IdleStatus>;
}

/// Verifies codes and writes attendance records
pub struct AttendanceService {
    classes: Arc<dyn ClassRepository>,
    students: Arc<dyn StudentRepository>,
    records: Arc<dyn AttendanceRepository>,
    stats_cache: Arc<StatsCache>,
    clock: Arc<dyn Clock>,
    tz: Tz,
}

impl AttendanceService {
    pub fn new(
        classes: Arc<dyn ClassRepository>,
        students: Arc<dyn StudentRepository>,
        records: Arc<dyn AttendanceRepository>,
        stats_cache: Arc<StatsCache>,
        clock: Arc<dyn Clock>,
        tz: Tz,
    ) -> Self {
        Self {
            classes,
            students,
            records,
            stats_cache,
            clock,
            tz,
        }
    }

    /// Run the check sequence at the current instant.
    ///
    /// # Returns
    /// The newly written record
    ///
    /// # Errors
    /// The first failed check, as an `AttendanceError`
    pub async fn check_in(&self, request: &AttendanceRequest) -> Result<AttendanceRecord, AttendanceError> {
        self.check_in_at(request, self.clock.now()).await
    }

    async fn check_in_at(
        &self,
        request: &AttendanceRequest,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord, AttendanceError> {
        let payload =
            ScanPayload::parse(&request.code).map_err(|e| AttendanceError::Validation(e.to_string()))?;
        if payload.class_id != request.class_id {
            tracing::debug!(
                expected = request.class_id,
                scanned = payload.class_id,
                "Code belongs to another class"
            );
            return Err(AttendanceError::Validation(format!(
                "Code is for class {}, not class {}",
                payload.class_id, request.class_id
            )));
        }

        let class = self
            .classes
            .get_by_id(request.class_id)
            .await?
            .ok_or_else(|| {
                AttendanceError::Validation(format!("Class with ID {} not found", request.class_id))
            })?;

        // Unknown students must never reach the insert
        let student = self
            .students
            .get_by_id(request.student_id)
            .await?
            .ok_or_else(|| {
                AttendanceError::Validation(format!("Student with ID {} not found", request.student_id))
            })?;
        if !class.enrolls(&student.department, &student.semester) {
            tracing::debug!(class_id = class.id, student_id = student.id, "Student not enrolled in class");
            return Err(AttendanceError::Validation(format!(
                "Student {} is not enrolled in class {}",
                student.id, class.id
            )));
        }

        let local = local_datetime(self.tz, now);
        if !schedule::is_within_schedule(&class.schedules, local) {
            tracing::debug!(class_id = class.id, %local, "Outside every schedule window");
            return Err(AttendanceError::Expiry(ElapsedWindow::Schedule));
        }

        if !token::is_valid(&class, &payload.token, now) {
            tracing::debug!(class_id = class.id, "Stale or replaced token");
            return Err(AttendanceError::Expiry(ElapsedWindow::Token));
        }

        let today = local.date();
        if self.records.exists(class.id, request.student_id, today).await? {
            return Err(AttendanceError::Duplicate);
        }

        let new_record = NewAttendanceRecord {
            student_id: request.student_id,
            class_id: class.id,
            attended_on: today,
            recorded_at: now,
            device_fingerprint: request.device_fingerprint.clone(),
        };
        match self.records.insert(&new_record).await? {
            InsertOutcome::Inserted(record) => {
                tracing::info!(
                    class_id = record.class_id,
                    student_id = record.student_id,
                    attended_on = %record.attended_on,
                    "Attendance recorded"
                );
                self.stats_cache.invalidate(record.student_id).await;
                Ok(record)
            }
            InsertOutcome::Duplicate => {
                tracing::debug!(class_id = class.id, student_id = request.student_id, "Lost insert race");
                Err(AttendanceError::Duplicate)
            }
        }
    }

    async fn precheck_at(
        &self,
        class_id: i64,
        student_id: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<IdleStatus> {
        let class = self.classes.get_by_id(class_id).await?;
        let local = local_datetime(self.tz, now);
        let within_schedule = class
            .map(|c| schedule::is_within_schedule(&c.schedules, local))
            .unwrap_or(false);
        let already_marked = self.records.exists(class_id, student_id, local.date()).await?;
        Ok(IdleStatus {
            within_schedule,
            already_marked,
            checked_at: now,
        })
    }
}

#[async_trait]
impl AttendanceGateway for AttendanceService {
    async fn verify(&self, request: &AttendanceRequest) -> VerificationOutcome {
        match self.check_in(request).await {
            Ok(record) => VerificationOutcome::success(record),
            Err(err) => {
                if err.is_retryable() {
                    tracing::warn!(class_id = request.class_id, error = %err, "Attendance write failed");
                }
                VerificationOutcome::from_error(&err)
            }
        }
    }

    async fn precheck(&self, class_id: i64, student_id: i64) -> anyhow::Result<IdleStatus> {
        self.precheck_at(class_id, student_id, self.clock.now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::{SqlxAttendanceRepository, SqlxClassRepository, SqlxStudentRepository};
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::models::{CreateClassInput, CreateStudentInput, ScheduleRule, SessionToken};
    use crate::services::clock::ManualClock;
    use anyhow::anyhow;
    use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Weekday};
    use std::time::Duration as StdDuration;

    struct Fixture {
        service: AttendanceService,
        classes: Arc<dyn ClassRepository>,
        students: Arc<dyn StudentRepository>,
        records: Arc<dyn AttendanceRepository>,
        clock: Arc<ManualClock>,
        cache: Arc<StatsCache>,
        class_id: i64,
        student_id: i64,
    }

    /// 2024-07-15 is a Monday
    fn monday_at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 15, h, m, 0).unwrap()
    }

    async fn seed_student(pool: &DynDatabasePool) -> i64 {
        sqlx::query("INSERT INTO students (name, department, semester) VALUES ('Ana', 'CS', '2024-odd')")
            .execute(pool.as_sqlite().unwrap())
            .await
            .expect("Failed to seed student")
            .last_insert_rowid()
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let classes = SqlxClassRepository::boxed(pool.clone());
        let students = SqlxStudentRepository::boxed(pool.clone());
        let records = SqlxAttendanceRepository::boxed(pool.clone());
        let student_id = seed_student(&pool).await;

        let class = classes
            .create(
                &CreateClassInput {
                    subject: "Algorithms".to_string(),
                    department: "CS".to_string(),
                    semester: "2024-odd".to_string(),
                    schedules: vec![ScheduleRule::new(
                        Weekday::Mon,
                        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                        NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                        "A-101",
                    )],
                },
                monday_at(8, 0),
            )
            .await
            .expect("Failed to create class");

        let clock = Arc::new(ManualClock::new(monday_at(9, 0)));
        let cache = Arc::new(StatsCache::new(MemoryCache::with_capacity_and_ttl(
            100,
            StdDuration::from_secs(60),
        )));
        let service = AttendanceService::new(
            classes.clone(),
            students.clone(),
            records.clone(),
            cache.clone(),
            clock.clone(),
            chrono_tz::UTC,
        );

        Fixture {
            service,
            classes,
            students,
            records,
            clock,
            cache,
            class_id: class.id,
            student_id,
        }
    }

    impl Fixture {
        async fn issue(&self, value: &str, at: DateTime<Utc>) {
            let token = SessionToken {
                value: value.to_string(),
                issued_at: at,
                expires_at: at + Duration::minutes(10),
            };
            assert!(self.classes.replace_token(self.class_id, &token).await.unwrap());
        }

        fn request(&self, code: String) -> AttendanceRequest {
            AttendanceRequest {
                class_id: self.class_id,
                student_id: self.student_id,
                code,
                device_fingerprint: Some("pixel-7".to_string()),
            }
        }

        async fn scan_at(&self, code: String, at: DateTime<Utc>) -> VerificationOutcome {
            self.clock.set(at);
            self.service.verify(&self.request(code)).await
        }
    }

    #[tokio::test]
    async fn test_valid_scan_then_rescan() {
        let f = setup().await;
        f.issue("tok1", monday_at(9, 0)).await;

        let first = f.scan_at(format!("{}:tok1", f.class_id), monday_at(9, 5)).await;
        assert_eq!(first.state, CaptureState::Success);
        let record = first.record.expect("success carries the record");
        assert_eq!(record.attended_on, NaiveDate::from_ymd_opt(2024, 7, 15).unwrap());
        assert_eq!(record.device_fingerprint.as_deref(), Some("pixel-7"));

        let second = f.scan_at(format!("{}:tok1", f.class_id), monday_at(9, 10)).await;
        assert_eq!(second.state, CaptureState::AlreadyMarked);
        assert!(second.record.is_none());
        assert!(!second.retryable);

        let stored = f.records.list_by_class(f.class_id, None).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_code_for_other_class_is_wrong_session() {
        let f = setup().await;
        f.issue("tok1", monday_at(9, 0)).await;

        let outcome = f.scan_at(format!("{}:tok1", f.class_id + 1), monday_at(9, 5)).await;
        assert_eq!(outcome.state, CaptureState::WrongSession);
        assert!(f.records.list_by_class(f.class_id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_code_is_wrong_session() {
        let f = setup().await;
        let outcome = f.scan_at("not a code at all!".to_string(), monday_at(9, 5)).await;
        assert_eq!(outcome.state, CaptureState::WrongSession);
    }

    #[tokio::test]
    async fn test_unknown_student_is_wrong_session() {
        let f = setup().await;
        f.issue("tok1", monday_at(9, 0)).await;
        f.clock.set(monday_at(9, 5));

        let mut request = f.request(format!("{}:tok1", f.class_id));
        request.student_id = 4242;
        let outcome = f.service.verify(&request).await;
        assert_eq!(outcome.state, CaptureState::WrongSession);
        assert!(!outcome.retryable);
        assert!(f.records.list_by_class(f.class_id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_student_from_other_cohort_is_wrong_session() {
        let f = setup().await;
        f.issue("tok1", monday_at(9, 0)).await;
        f.clock.set(monday_at(9, 5));

        let outsider = f
            .students
            .create(
                &CreateStudentInput {
                    name: "Bo".to_string(),
                    department: "Physics".to_string(),
                    semester: "2024-odd".to_string(),
                },
                monday_at(8, 0),
            )
            .await
            .unwrap();

        let mut request = f.request(format!("{}:tok1", f.class_id));
        request.student_id = outsider.id;
        let outcome = f.service.verify(&request).await;
        assert_eq!(outcome.state, CaptureState::WrongSession);
        assert!(f.records.list_by_student(outsider.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_regenerated_token_rejects_old_value() {
        let f = setup().await;
        f.issue("old", monday_at(9, 0)).await;
        f.issue("new", monday_at(9, 6)).await;

        let outcome = f.scan_at(format!("{}:old", f.class_id), monday_at(9, 7)).await;
        assert_eq!(outcome.state, CaptureState::ExpiredToken);

        let outcome = f.scan_at(format!("{}:new", f.class_id), monday_at(9, 8)).await;
        assert_eq!(outcome.state, CaptureState::Success);
    }

    #[tokio::test]
    async fn test_token_past_expiry() {
        let f = setup().await;
        f.issue("tok1", monday_at(9, 0)).await;

        let outcome = f.scan_at(format!("{}:tok1", f.class_id), monday_at(9, 10)).await;
        assert_eq!(outcome.state, CaptureState::ExpiredToken);
    }

    #[tokio::test]
    async fn test_schedule_checked_before_token() {
        let f = setup().await;
        f.issue("tok1", monday_at(10, 0)).await;

        // Token is live but the 09:00-10:00 window has closed
        let outcome = f.scan_at(format!("{}:tok1", f.class_id), monday_at(10, 1)).await;
        assert_eq!(outcome.state, CaptureState::OutsideSchedule);

        // Wrong class wins over everything
        let outcome = f.scan_at(format!("{}:tok1", f.class_id + 5), monday_at(10, 1)).await;
        assert_eq!(outcome.state, CaptureState::WrongSession);
    }

    #[tokio::test]
    async fn test_success_invalidates_cached_stats() {
        let f = setup().await;
        f.issue("tok1", monday_at(9, 0)).await;

        let generation = f.cache.next_generation();
        let cached = crate::models::AttendanceStats {
            student_id: f.student_id,
            attendance_rate: 0,
            total_classes: 1,
            attended_classes: 0,
            missed_classes: 1,
            subject_breakdown: vec![],
        };
        f.cache.store_if_latest(f.student_id, generation, &cached).await.unwrap();

        let outcome = f.scan_at(format!("{}:tok1", f.class_id), monday_at(9, 5)).await;
        assert_eq!(outcome.state, CaptureState::Success);
        assert_eq!(f.cache.get(f.student_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_precheck() {
        let f = setup().await;
        f.clock.set(monday_at(9, 30));
        let status = f.service.precheck(f.class_id, f.student_id).await.unwrap();
        assert!(status.within_schedule);
        assert!(!status.already_marked);

        f.issue("tok1", monday_at(9, 0)).await;
        f.scan_at(format!("{}:tok1", f.class_id), monday_at(9, 31)).await;

        f.clock.set(monday_at(11, 0));
        let status = f.service.precheck(f.class_id, f.student_id).await.unwrap();
        assert!(!status.within_schedule);
        assert!(status.already_marked);
        assert_eq!(status.checked_at, monday_at(11, 0));
    }

    /// Repository that always fails, to exercise the retryable path
    struct BrokenRecords;

    #[async_trait]
    impl AttendanceRepository for BrokenRecords {
        async fn insert(&self, _: &NewAttendanceRecord) -> anyhow::Result<InsertOutcome> {
            Err(anyhow!("disk I/O error"))
        }
        async fn exists(&self, _: i64, _: i64, _: NaiveDate) -> anyhow::Result<bool> {
            Ok(false)
        }
        async fn list_by_student(&self, _: i64) -> anyhow::Result<Vec<AttendanceRecord>> {
            Ok(vec![])
        }
        async fn list_by_class(&self, _: i64, _: Option<NaiveDate>) -> anyhow::Result<Vec<AttendanceRecord>> {
            Ok(vec![])
        }
    }

    /// Repository that reports a duplicate at insert time, as a lost race does
    struct RacedRecords;

    #[async_trait]
    impl AttendanceRepository for RacedRecords {
        async fn insert(&self, _: &NewAttendanceRecord) -> anyhow::Result<InsertOutcome> {
            Ok(InsertOutcome::Duplicate)
        }
        async fn exists(&self, _: i64, _: i64, _: NaiveDate) -> anyhow::Result<bool> {
            Ok(false)
        }
        async fn list_by_student(&self, _: i64) -> anyhow::Result<Vec<AttendanceRecord>> {
            Ok(vec![])
        }
        async fn list_by_class(&self, _: i64, _: Option<NaiveDate>) -> anyhow::Result<Vec<AttendanceRecord>> {
            Ok(vec![])
        }
    }

    fn with_records(f: &Fixture, records: Arc<dyn AttendanceRepository>) -> AttendanceService {
        AttendanceService::new(
            f.classes.clone(),
            f.students.clone(),
            records,
            f.cache.clone(),
            f.clock.clone(),
            chrono_tz::UTC,
        )
    }

    #[tokio::test]
    async fn test_write_failure_is_retryable_failure() {
        let f = setup().await;
        f.issue("tok1", monday_at(9, 0)).await;
        f.clock.set(monday_at(9, 5));

        let service = with_records(&f, Arc::new(BrokenRecords));
        let outcome = service.verify(&f.request(format!("{}:tok1", f.class_id))).await;
        assert_eq!(outcome.state, CaptureState::Failure);
        assert!(outcome.retryable);
    }

    #[tokio::test]
    async fn test_lost_insert_race_is_already_marked() {
        let f = setup().await;
        f.issue("tok1", monday_at(9, 0)).await;
        f.clock.set(monday_at(9, 5));

        let service = with_records(&f, Arc::new(RacedRecords));
        let outcome = service.verify(&f.request(format!("{}:tok1", f.class_id))).await;
        assert_eq!(outcome.state, CaptureState::AlreadyMarked);
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(AttendanceError::Validation("x".into()).capture_state(), CaptureState::WrongSession);
        assert_eq!(AttendanceError::Expiry(ElapsedWindow::Schedule).capture_state(), CaptureState::OutsideSchedule);
        assert_eq!(AttendanceError::Expiry(ElapsedWindow::Token).capture_state(), CaptureState::ExpiredToken);
        assert_eq!(AttendanceError::Duplicate.capture_state(), CaptureState::AlreadyMarked);
        assert_eq!(AttendanceError::Permission.capture_state(), CaptureState::PermissionDenied);

        assert!(AttendanceError::TransientIo(anyhow!("io")).is_retryable());
        assert!(!AttendanceError::Permission.is_retryable());
        assert!(!AttendanceError::Duplicate.is_retryable());
    }
}
