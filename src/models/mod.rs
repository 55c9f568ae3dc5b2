//! Data models
//!
//! Entities persisted by the repositories plus the request and result types
//! shared by the services and the HTTP layer.

mod attendance;
mod class;
mod semester;
mod stats;
mod student;

pub use attendance::{AttendanceRecord, CaptureState, InsertOutcome, NewAttendanceRecord};
pub use class::{clock_time, weekday_name, Class, CreateClassInput, ScheduleRule, SessionToken};
pub use semester::Semester;
pub use stats::{AttendanceStats, SubjectBreakdown, Tally, TrendBucket, TrendGranularity};
pub use student::{CreateStudentInput, Student};
