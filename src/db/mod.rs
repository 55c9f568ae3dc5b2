//! Database layer
//!
//! Persistence for classes, schedules, students, semesters and attendance
//! records. Two backends are supported:
//! - SQLite (default, single-file deployment)
//! - MySQL
//!
//! The backend is chosen by `database.driver` in the configuration; the rest of
//! the crate only sees `DynDatabasePool` and the repository traits.

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
