//! Database repositories
//!
//! One trait plus one sqlx implementation per entity.

pub mod attendance;
pub mod class;
pub mod semester;
pub mod student;

pub use attendance::{AttendanceRepository, SqlxAttendanceRepository};
pub use class::{ClassRepository, SqlxClassRepository};
pub use semester::{SemesterRepository, SqlxSemesterRepository};
pub use student::{SqlxStudentRepository, StudentRepository};
