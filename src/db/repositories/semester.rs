//! Semester repository

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql, sqlite};
use crate::db::DynDatabasePool;
use crate::models::Semester;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

/// Semester repository trait
#[async_trait]
pub trait SemesterRepository: Send + Sync {
    /// Insert the semester or move its start date
    async fn upsert(&self, semester: &Semester) -> Result<Semester>;

    /// Get a semester by name
    async fn get_by_name(&self, name: &str) -> Result<Option<Semester>>;
}

/// SQLx-based semester repository implementation
pub struct SqlxSemesterRepository {
    pool: DynDatabasePool,
}

impl SqlxSemesterRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SemesterRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SemesterRepository for SqlxSemesterRepository {
    async fn upsert(&self, semester: &Semester) -> Result<Semester> {
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(
                    r#"
                    INSERT INTO semesters (name, starts_on, updated_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(name) DO UPDATE SET
                        starts_on = excluded.starts_on,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&semester.name)
                .bind(semester.starts_on)
                .bind(now)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to upsert semester")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(
                    r#"
                    INSERT INTO semesters (name, starts_on, updated_at)
                    VALUES (?, ?, ?)
                    ON DUPLICATE KEY UPDATE
                        starts_on = VALUES(starts_on),
                        updated_at = VALUES(updated_at)
                    "#,
                )
                .bind(&semester.name)
                .bind(semester.starts_on)
                .bind(now)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to upsert semester")?;
            }
        }
        Ok(semester.clone())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Semester>> {
        let sql = "SELECT name, starts_on FROM semesters WHERE name = ?";
        let semester = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(name)
                .fetch_optional(sqlite(&self.pool)?)
                .await
                .context("Failed to get semester")?
                .map(|row| Semester {
                    name: row.get("name"),
                    starts_on: row.get("starts_on"),
                }),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(name)
                .fetch_optional(mysql(&self.pool)?)
                .await
                .context("Failed to get semester")?
                .map(|row| Semester {
                    name: row.get("name"),
                    starts_on: row.get("starts_on"),
                }),
        };
        Ok(semester)
    }
}
