//! Attendance record repository
//!
//! Records are keyed by `(class_id, attended_on, student_id)`. Inserts go
//! through `INSERT OR IGNORE` (SQLite) / `INSERT IGNORE` (MySQL): when two
//! devices race on the same key the loser affects zero rows and is reported
//! as `InsertOutcome::Duplicate`. Nothing here updates or deletes a record.

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql, sqlite};
use crate::db::DynDatabasePool;
use crate::models::{AttendanceRecord, InsertOutcome, NewAttendanceRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Attendance repository trait
#[async_trait]
pub trait AttendanceRepository: Send + Sync {
    /// Write a record unless one already exists for the same key
    async fn insert(&self, record: &NewAttendanceRecord) -> Result<InsertOutcome>;

    /// Whether the student already has a record for the class on `day`
    async fn exists(&self, class_id: i64, student_id: i64, day: NaiveDate) -> Result<bool>;

    /// All records of a student, oldest first
    async fn list_by_student(&self, student_id: i64) -> Result<Vec<AttendanceRecord>>;

    /// Records of a class, optionally restricted to one day
    async fn list_by_class(&self, class_id: i64, day: Option<NaiveDate>) -> Result<Vec<AttendanceRecord>>;
}

/// SQLx-based attendance repository implementation
pub struct SqlxAttendanceRepository {
    pool: DynDatabasePool,
}

impl SqlxAttendanceRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AttendanceRepository> {
        Arc::new(Self::new(pool))
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, student_id, class_id, attended_on, recorded_at, device_fingerprint FROM attendance_records";

#[async_trait]
impl AttendanceRepository for SqlxAttendanceRepository {
    async fn insert(&self, record: &NewAttendanceRecord) -> Result<InsertOutcome> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => insert_sqlite(sqlite(&self.pool)?, record).await,
            DatabaseDriver::Mysql => insert_mysql(mysql(&self.pool)?, record).await,
        }
    }

    async fn exists(&self, class_id: i64, student_id: i64, day: NaiveDate) -> Result<bool> {
        let sql = r#"
            SELECT COUNT(*) AS count FROM attendance_records
            WHERE class_id = ? AND attended_on = ? AND student_id = ?
        "#;
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(class_id)
                .bind(day)
                .bind(student_id)
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to check attendance record")?
                .get("count"),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(class_id)
                .bind(day)
                .bind(student_id)
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to check attendance record")?
                .get("count"),
        };
        Ok(count > 0)
    }

    async fn list_by_student(&self, student_id: i64) -> Result<Vec<AttendanceRecord>> {
        let sql = format!("{} WHERE student_id = ? ORDER BY attended_on, id", SELECT_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(student_id)
                .fetch_all(sqlite(&self.pool)?)
                .await
                .context("Failed to list attendance by student")?
                .iter()
                .map(row_to_record_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(student_id)
                .fetch_all(mysql(&self.pool)?)
                .await
                .context("Failed to list attendance by student")?
                .iter()
                .map(row_to_record_mysql)
                .collect(),
        }
    }

    async fn list_by_class(&self, class_id: i64, day: Option<NaiveDate>) -> Result<Vec<AttendanceRecord>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_by_class_sqlite(sqlite(&self.pool)?, class_id, day).await,
            DatabaseDriver::Mysql => list_by_class_mysql(mysql(&self.pool)?, class_id, day).await,
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn insert_sqlite(pool: &SqlitePool, record: &NewAttendanceRecord) -> Result<InsertOutcome> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO attendance_records
            (student_id, class_id, attended_on, recorded_at, device_fingerprint)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.student_id)
    .bind(record.class_id)
    .bind(record.attended_on)
    .bind(record.recorded_at)
    .bind(&record.device_fingerprint)
    .execute(pool)
    .await
    .context("Failed to insert attendance record")?;

    if result.rows_affected() == 0 {
        return Ok(InsertOutcome::Duplicate);
    }

    Ok(InsertOutcome::Inserted(AttendanceRecord {
        id: result.last_insert_rowid(),
        student_id: record.student_id,
        class_id: record.class_id,
        attended_on: record.attended_on,
        recorded_at: record.recorded_at,
        device_fingerprint: record.device_fingerprint.clone(),
    }))
}

async fn list_by_class_sqlite(
    pool: &SqlitePool,
    class_id: i64,
    day: Option<NaiveDate>,
) -> Result<Vec<AttendanceRecord>> {
    let rows = match day {
        Some(day) => {
            let sql = format!(
                "{} WHERE class_id = ? AND attended_on = ? ORDER BY recorded_at, id",
                SELECT_COLUMNS
            );
            sqlx::query(&sql).bind(class_id).bind(day).fetch_all(pool).await
        }
        None => {
            let sql = format!("{} WHERE class_id = ? ORDER BY attended_on, recorded_at, id", SELECT_COLUMNS);
            sqlx::query(&sql).bind(class_id).fetch_all(pool).await
        }
    }
    .context("Failed to list attendance by class")?;

    rows.iter().map(row_to_record_sqlite).collect()
}

fn row_to_record_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: row.get("id"),
        student_id: row.get("student_id"),
        class_id: row.get("class_id"),
        attended_on: row.get("attended_on"),
        recorded_at: row.get("recorded_at"),
        device_fingerprint: row.get("device_fingerprint"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn insert_mysql(pool: &MySqlPool, record: &NewAttendanceRecord) -> Result<InsertOutcome> {
    let result = sqlx::query(
        r#"
        INSERT IGNORE INTO attendance_records
            (student_id, class_id, attended_on, recorded_at, device_fingerprint)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.student_id)
    .bind(record.class_id)
    .bind(record.attended_on)
    .bind(record.recorded_at)
    .bind(&record.device_fingerprint)
    .execute(pool)
    .await
    .context("Failed to insert attendance record")?;

    if result.rows_affected() == 0 {
        return Ok(InsertOutcome::Duplicate);
    }

    Ok(InsertOutcome::Inserted(AttendanceRecord {
        id: result.last_insert_id() as i64,
        student_id: record.student_id,
        class_id: record.class_id,
        attended_on: record.attended_on,
        recorded_at: record.recorded_at,
        device_fingerprint: record.device_fingerprint.clone(),
    }))
}

async fn list_by_class_mysql(
    pool: &MySqlPool,
    class_id: i64,
    day: Option<NaiveDate>,
) -> Result<Vec<AttendanceRecord>> {
    let rows = match day {
        Some(day) => {
            let sql = format!(
                "{} WHERE class_id = ? AND attended_on = ? ORDER BY recorded_at, id",
                SELECT_COLUMNS
            );
            sqlx::query(&sql).bind(class_id).bind(day).fetch_all(pool).await
        }
        None => {
            let sql = format!("{} WHERE class_id = ? ORDER BY attended_on, recorded_at, id", SELECT_COLUMNS);
            sqlx::query(&sql).bind(class_id).fetch_all(pool).await
        }
    }
    .context("Failed to list attendance by class")?;

    rows.iter().map(row_to_record_mysql).collect()
}

fn row_to_record_mysql(row: &sqlx::mysql::MySqlRow) -> Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: row.get("id"),
        student_id: row.get("student_id"),
        class_id: row.get("class_id"),
        attended_on: row.get("attended_on"),
        recorded_at: row.get("recorded_at"),
        device_fingerprint: row.get("device_fingerprint"),
    })
}
