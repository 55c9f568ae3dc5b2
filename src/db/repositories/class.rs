//! Class repository
//!
//! Classes, their ordered weekly schedule rules and the live session token.
//!
//! The token lives in three columns on `classes` that are always written
//! together by one `UPDATE`, so a regenerate replaces value, issue time and
//! expiry as a whole.

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql, sqlite};
use crate::db::DynDatabasePool;
use crate::models::{weekday_name, Class, CreateClassInput, ScheduleRule, SessionToken};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;

/// Class repository trait
#[async_trait]
pub trait ClassRepository: Send + Sync {
    /// Create a class together with its schedule rules
    async fn create(&self, input: &CreateClassInput, created_at: DateTime<Utc>) -> Result<Class>;

    /// Get a class (with schedules and token) by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Class>>;

    /// All classes of a (department, semester) cohort, ordered by ID
    async fn list_by_enrollment(&self, department: &str, semester: &str) -> Result<Vec<Class>>;

    /// Overwrite the class's token. Returns false when the class doesn't exist.
    async fn replace_token(&self, class_id: i64, token: &SessionToken) -> Result<bool>;

    /// Replace every schedule rule of a class. Returns false when the class doesn't exist.
    async fn replace_schedules(&self, class_id: i64, rules: &[ScheduleRule]) -> Result<bool>;
}

/// SQLx-based class repository implementation
pub struct SqlxClassRepository {
    pool: DynDatabasePool,
}

impl SqlxClassRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ClassRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl ClassRepository for SqlxClassRepository {
    async fn create(&self, input: &CreateClassInput, created_at: DateTime<Utc>) -> Result<Class> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_class_sqlite(sqlite(&self.pool)?, input, created_at).await,
            DatabaseDriver::Mysql => create_class_mysql(mysql(&self.pool)?, input, created_at).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Class>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_class_sqlite(sqlite(&self.pool)?, id).await,
            DatabaseDriver::Mysql => get_class_mysql(mysql(&self.pool)?, id).await,
        }
    }

    async fn list_by_enrollment(&self, department: &str, semester: &str) -> Result<Vec<Class>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_by_enrollment_sqlite(sqlite(&self.pool)?, department, semester).await
            }
            DatabaseDriver::Mysql => {
                list_by_enrollment_mysql(mysql(&self.pool)?, department, semester).await
            }
        }
    }

    async fn replace_token(&self, class_id: i64, token: &SessionToken) -> Result<bool> {
        let sql = r#"
            UPDATE classes
            SET current_token = ?, token_issued_at = ?, token_expires_at = ?
            WHERE id = ?
        "#;
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(&token.value)
                .bind(token.issued_at)
                .bind(token.expires_at)
                .bind(class_id)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to replace class token")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(&token.value)
                .bind(token.issued_at)
                .bind(token.expires_at)
                .bind(class_id)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to replace class token")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn replace_schedules(&self, class_id: i64, rules: &[ScheduleRule]) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                replace_schedules_sqlite(sqlite(&self.pool)?, class_id, rules).await
            }
            DatabaseDriver::Mysql => {
                replace_schedules_mysql(mysql(&self.pool)?, class_id, rules).await
            }
        }
    }
}

/// Assemble the token from its three nullable columns
fn token_from_columns(
    value: Option<String>,
    issued_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
) -> Option<SessionToken> {
    match (value, issued_at, expires_at) {
        (Some(value), Some(issued_at), Some(expires_at)) => Some(SessionToken {
            value,
            issued_at,
            expires_at,
        }),
        _ => None,
    }
}

fn rule_from_columns(
    day: &str,
    start_time: NaiveTime,
    end_time: NaiveTime,
    room: String,
) -> Result<ScheduleRule> {
    Ok(ScheduleRule {
        day_of_week: weekday_name::parse(day)?,
        start_time,
        end_time,
        room,
    })
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_class_sqlite(
    pool: &SqlitePool,
    input: &CreateClassInput,
    created_at: DateTime<Utc>,
) -> Result<Class> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let result = sqlx::query(
        r#"
        INSERT INTO classes (subject, department, semester, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&input.subject)
    .bind(&input.department)
    .bind(&input.semester)
    .bind(created_at)
    .execute(&mut *tx)
    .await
    .context("Failed to create class")?;
    let id = result.last_insert_rowid();

    for (position, rule) in input.schedules.iter().enumerate() {
        insert_rule_sqlite(&mut tx, id, position, rule).await?;
    }

    tx.commit().await.context("Failed to commit class")?;

    Ok(Class {
        id,
        subject: input.subject.clone(),
        department: input.department.clone(),
        semester: input.semester.clone(),
        schedules: input.schedules.clone(),
        token: None,
        created_at,
    })
}

async fn insert_rule_sqlite(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    class_id: i64,
    position: usize,
    rule: &ScheduleRule,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO class_schedules (class_id, position, day_of_week, start_time, end_time, room)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(class_id)
    .bind(position as i64)
    .bind(weekday_name::as_str(rule.day_of_week))
    .bind(rule.start_time)
    .bind(rule.end_time)
    .bind(&rule.room)
    .execute(&mut **tx)
    .await
    .context("Failed to insert schedule rule")?;
    Ok(())
}

async fn get_class_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Class>> {
    let row = sqlx::query(
        r#"
        SELECT id, subject, department, semester, current_token,
               token_issued_at, token_expires_at, created_at
        FROM classes
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get class by ID")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let rows = sqlx::query(
        r#"
        SELECT class_id, day_of_week, start_time, end_time, room
        FROM class_schedules
        WHERE class_id = ?
        ORDER BY position
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await
    .context("Failed to get class schedules")?;

    let schedules = rows
        .iter()
        .map(row_to_rule_sqlite)
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(row_to_class_sqlite(&row, schedules)))
}

async fn list_by_enrollment_sqlite(
    pool: &SqlitePool,
    department: &str,
    semester: &str,
) -> Result<Vec<Class>> {
    let class_rows = sqlx::query(
        r#"
        SELECT id, subject, department, semester, current_token,
               token_issued_at, token_expires_at, created_at
        FROM classes
        WHERE department = ? AND semester = ?
        ORDER BY id
        "#,
    )
    .bind(department)
    .bind(semester)
    .fetch_all(pool)
    .await
    .context("Failed to list classes by enrollment")?;

    let rule_rows = sqlx::query(
        r#"
        SELECT s.class_id, s.day_of_week, s.start_time, s.end_time, s.room
        FROM class_schedules s
        JOIN classes c ON c.id = s.class_id
        WHERE c.department = ? AND c.semester = ?
        ORDER BY s.class_id, s.position
        "#,
    )
    .bind(department)
    .bind(semester)
    .fetch_all(pool)
    .await
    .context("Failed to list schedules by enrollment")?;

    let mut rules: HashMap<i64, Vec<ScheduleRule>> = HashMap::new();
    for row in &rule_rows {
        let class_id: i64 = row.get("class_id");
        rules.entry(class_id).or_default().push(row_to_rule_sqlite(row)?);
    }

    Ok(class_rows
        .iter()
        .map(|row| {
            let id: i64 = row.get("id");
            row_to_class_sqlite(row, rules.remove(&id).unwrap_or_default())
        })
        .collect())
}

async fn replace_schedules_sqlite(
    pool: &SqlitePool,
    class_id: i64,
    rules: &[ScheduleRule],
) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let exists = sqlx::query("SELECT id FROM classes WHERE id = ?")
        .bind(class_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to check class")?
        .is_some();
    if !exists {
        return Ok(false);
    }

    sqlx::query("DELETE FROM class_schedules WHERE class_id = ?")
        .bind(class_id)
        .execute(&mut *tx)
        .await
        .context("Failed to clear schedule rules")?;

    for (position, rule) in rules.iter().enumerate() {
        insert_rule_sqlite(&mut tx, class_id, position, rule).await?;
    }

    tx.commit().await.context("Failed to commit schedule rules")?;
    Ok(true)
}

fn row_to_class_sqlite(row: &sqlx::sqlite::SqliteRow, schedules: Vec<ScheduleRule>) -> Class {
    Class {
        id: row.get("id"),
        subject: row.get("subject"),
        department: row.get("department"),
        semester: row.get("semester"),
        schedules,
        token: token_from_columns(
            row.get("current_token"),
            row.get("token_issued_at"),
            row.get("token_expires_at"),
        ),
        created_at: row.get("created_at"),
    }
}

fn row_to_rule_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<ScheduleRule> {
    let day: String = row.get("day_of_week");
    rule_from_columns(&day, row.get("start_time"), row.get("end_time"), row.get("room"))
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_class_mysql(
    pool: &MySqlPool,
    input: &CreateClassInput,
    created_at: DateTime<Utc>,
) -> Result<Class> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let result = sqlx::query(
        r#"
        INSERT INTO classes (subject, department, semester, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&input.subject)
    .bind(&input.department)
    .bind(&input.semester)
    .bind(created_at)
    .execute(&mut *tx)
    .await
    .context("Failed to create class")?;
    let id = result.last_insert_id() as i64;

    for (position, rule) in input.schedules.iter().enumerate() {
        insert_rule_mysql(&mut tx, id, position, rule).await?;
    }

    tx.commit().await.context("Failed to commit class")?;

    Ok(Class {
        id,
        subject: input.subject.clone(),
        department: input.department.clone(),
        semester: input.semester.clone(),
        schedules: input.schedules.clone(),
        token: None,
        created_at,
    })
}

async fn insert_rule_mysql(
    tx: &mut sqlx::Transaction<'_, sqlx::MySql>,
    class_id: i64,
    position: usize,
    rule: &ScheduleRule,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO class_schedules (class_id, position, day_of_week, start_time, end_time, room)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(class_id)
    .bind(position as i32)
    .bind(weekday_name::as_str(rule.day_of_week))
    .bind(rule.start_time)
    .bind(rule.end_time)
    .bind(&rule.room)
    .execute(&mut **tx)
    .await
    .context("Failed to insert schedule rule")?;
    Ok(())
}

async fn get_class_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Class>> {
    let row = sqlx::query(
        r#"
        SELECT id, subject, department, semester, current_token,
               token_issued_at, token_expires_at, created_at
        FROM classes
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get class by ID")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let rows = sqlx::query(
        r#"
        SELECT class_id, day_of_week, start_time, end_time, room
        FROM class_schedules
        WHERE class_id = ?
        ORDER BY position
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await
    .context("Failed to get class schedules")?;

    let schedules = rows
        .iter()
        .map(row_to_rule_mysql)
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(row_to_class_mysql(&row, schedules)))
}

async fn list_by_enrollment_mysql(
    pool: &MySqlPool,
    department: &str,
    semester: &str,
) -> Result<Vec<Class>> {
    let class_rows = sqlx::query(
        r#"
        SELECT id, subject, department, semester, current_token,
               token_issued_at, token_expires_at, created_at
        FROM classes
        WHERE department = ? AND semester = ?
        ORDER BY id
        "#,
    )
    .bind(department)
    .bind(semester)
    .fetch_all(pool)
    .await
    .context("Failed to list classes by enrollment")?;

    let rule_rows = sqlx::query(
        r#"
        SELECT s.class_id, s.day_of_week, s.start_time, s.end_time, s.room
        FROM class_schedules s
        JOIN classes c ON c.id = s.class_id
        WHERE c.department = ? AND c.semester = ?
        ORDER BY s.class_id, s.position
        "#,
    )
    .bind(department)
    .bind(semester)
    .fetch_all(pool)
    .await
    .context("Failed to list schedules by enrollment")?;

    let mut rules: HashMap<i64, Vec<ScheduleRule>> = HashMap::new();
    for row in &rule_rows {
        let class_id: i64 = row.get("class_id");
        rules.entry(class_id).or_default().push(row_to_rule_mysql(row)?);
    }

    Ok(class_rows
        .iter()
        .map(|row| {
            let id: i64 = row.get("id");
            row_to_class_mysql(row, rules.remove(&id).unwrap_or_default())
        })
        .collect())
}

async fn replace_schedules_mysql(
    pool: &MySqlPool,
    class_id: i64,
    rules: &[ScheduleRule],
) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let exists = sqlx::query("SELECT id FROM classes WHERE id = ? FOR UPDATE")
        .bind(class_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to check class")?
        .is_some();
    if !exists {
        return Ok(false);
    }

    sqlx::query("DELETE FROM class_schedules WHERE class_id = ?")
        .bind(class_id)
        .execute(&mut *tx)
        .await
        .context("Failed to clear schedule rules")?;

    for (position, rule) in rules.iter().enumerate() {
        insert_rule_mysql(&mut tx, class_id, position, rule).await?;
    }

    tx.commit().await.context("Failed to commit schedule rules")?;
    Ok(true)
}

fn row_to_class_mysql(row: &sqlx::mysql::MySqlRow, schedules: Vec<ScheduleRule>) -> Class {
    Class {
        id: row.get("id"),
        subject: row.get("subject"),
        department: row.get("department"),
        semester: row.get("semester"),
        schedules,
        token: token_from_columns(
            row.get("current_token"),
            row.get("token_issued_at"),
            row.get("token_expires_at"),
        ),
        created_at: row.get("created_at"),
    }
}

fn row_to_rule_mysql(row: &sqlx::mysql::MySqlRow) -> Result<ScheduleRule> {
    let day: String = row.get("day_of_week");
    rule_from_columns(&day, row.get("start_time"), row.get("end_time"), row.get("room"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use chrono::{Duration, TimeZone, Weekday};

    async fn setup_test_repo() -> SqlxClassRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxClassRepository::new(pool)
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn algorithms() -> CreateClassInput {
        CreateClassInput {
            subject: "Algorithms".to_string(),
            department: "CS".to_string(),
            semester: "2024-odd".to_string(),
            schedules: vec![
                ScheduleRule::new(Weekday::Wed, at(13, 0), at(14, 30), "B-2"),
                ScheduleRule::new(Weekday::Mon, at(9, 0), at(10, 0), "A-101"),
            ],
        }
    }

    #[tokio::test]
    async fn test_create_and_get_class() {
        let repo = setup_test_repo().await;
        let created = repo.create(&algorithms(), Utc::now()).await.expect("Failed to create class");
        assert!(created.id > 0);

        let found = repo
            .get_by_id(created.id)
            .await
            .expect("Failed to get class")
            .expect("Class not found");

        assert_eq!(found.subject, "Algorithms");
        assert_eq!(found.schedules, algorithms().schedules);
        assert!(found.token.is_none());
    }

    #[tokio::test]
    async fn test_get_class_not_found() {
        let repo = setup_test_repo().await;
        assert!(repo.get_by_id(42).await.expect("Failed to query").is_none());
    }

    #[tokio::test]
    async fn test_replace_token_overwrites_whole_token() {
        let repo = setup_test_repo().await;
        let class = repo.create(&algorithms(), Utc::now()).await.unwrap();
        let issued = Utc.with_ymd_and_hms(2024, 7, 15, 9, 0, 0).unwrap();

        let first = SessionToken {
            value: "first".to_string(),
            issued_at: issued,
            expires_at: issued + Duration::minutes(10),
        };
        assert!(repo.replace_token(class.id, &first).await.unwrap());

        let second = SessionToken {
            value: "second".to_string(),
            issued_at: issued + Duration::minutes(6),
            expires_at: issued + Duration::minutes(16),
        };
        assert!(repo.replace_token(class.id, &second).await.unwrap());

        let stored = repo.get_by_id(class.id).await.unwrap().unwrap();
        assert_eq!(stored.token, Some(second));
    }

    #[tokio::test]
    async fn test_replace_token_unknown_class() {
        let repo = setup_test_repo().await;
        let now = Utc::now();
        let token = SessionToken {
            value: "x".to_string(),
            issued_at: now,
            expires_at: now,
        };
        assert!(!repo.replace_token(7, &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_schedules_keeps_order() {
        let repo = setup_test_repo().await;
        let class = repo.create(&algorithms(), Utc::now()).await.unwrap();

        let rules = vec![
            ScheduleRule::new(Weekday::Fri, at(8, 0), at(9, 0), "C"),
            ScheduleRule::new(Weekday::Fri, at(10, 0), at(11, 0), "C"),
            ScheduleRule::new(Weekday::Tue, at(8, 0), at(9, 0), "D"),
        ];
        assert!(repo.replace_schedules(class.id, &rules).await.unwrap());

        let stored = repo.get_by_id(class.id).await.unwrap().unwrap();
        assert_eq!(stored.schedules, rules);

        assert!(repo.replace_schedules(class.id, &[]).await.unwrap());
        let stored = repo.get_by_id(class.id).await.unwrap().unwrap();
        assert!(stored.schedules.is_empty());

        assert!(!repo.replace_schedules(999, &rules).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_by_enrollment() {
        let repo = setup_test_repo().await;
        let a = repo.create(&algorithms(), Utc::now()).await.unwrap();

        let mut other = algorithms();
        other.subject = "Databases".to_string();
        other.schedules.truncate(1);
        let b = repo.create(&other, Utc::now()).await.unwrap();

        let mut elsewhere = algorithms();
        elsewhere.department = "EE".to_string();
        repo.create(&elsewhere, Utc::now()).await.unwrap();

        let classes = repo.list_by_enrollment("CS", "2024-odd").await.unwrap();
        let ids: Vec<i64> = classes.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert_eq!(classes[0].schedules.len(), 2);
        assert_eq!(classes[1].schedules.len(), 1);

        assert!(repo.list_by_enrollment("CS", "2025-even").await.unwrap().is_empty());
    }
}
