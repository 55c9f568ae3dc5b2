//! Student repository

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql, sqlite};
use crate::db::DynDatabasePool;
use crate::models::{CreateStudentInput, Student};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

/// Student repository trait
#[async_trait]
pub trait StudentRepository: Send + Sync {
    /// Register a student
    async fn create(&self, input: &CreateStudentInput, created_at: DateTime<Utc>) -> Result<Student>;

    /// Get a student by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Student>>;
}

/// SQLx-based student repository implementation
pub struct SqlxStudentRepository {
    pool: DynDatabasePool,
}

impl SqlxStudentRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn StudentRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl StudentRepository for SqlxStudentRepository {
    async fn create(&self, input: &CreateStudentInput, created_at: DateTime<Utc>) -> Result<Student> {
        let sql = r#"
            INSERT INTO students (name, department, semester, created_at)
            VALUES (?, ?, ?, ?)
        "#;
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(&input.name)
                .bind(&input.department)
                .bind(&input.semester)
                .bind(created_at)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to create student")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(&input.name)
                .bind(&input.department)
                .bind(&input.semester)
                .bind(created_at)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to create student")?
                .last_insert_id() as i64,
        };

        Ok(Student {
            id,
            name: input.name.clone(),
            department: input.department.clone(),
            semester: input.semester.clone(),
            created_at,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Student>> {
        let sql = "SELECT id, name, department, semester, created_at FROM students WHERE id = ?";
        let student = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .fetch_optional(sqlite(&self.pool)?)
                .await
                .context("Failed to get student by ID")?
                .map(|row| Student {
                    id: row.get("id"),
                    name: row.get("name"),
                    department: row.get("department"),
                    semester: row.get("semester"),
                    created_at: row.get("created_at"),
                }),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .fetch_optional(mysql(&self.pool)?)
                .await
                .context("Failed to get student by ID")?
                .map(|row| Student {
                    id: row.get("id"),
                    name: row.get("name"),
                    department: row.get("department"),
                    semester: row.get("semester"),
                    created_at: row.get("created_at"),
                }),
        };
        Ok(student)
    }
}
