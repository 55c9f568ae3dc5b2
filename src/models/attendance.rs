//! Attendance record model and capture states

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One student's presence at one class on one calendar day.
///
/// Records are write-once: `(class_id, attended_on, student_id)` is unique and a
/// second write for the same key is reported as a duplicate instead of
/// replacing the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: i64,
    pub class_id: i64,
    /// Calendar day in the institution timezone
    pub attended_on: NaiveDate,
    /// Instant of the successful scan, UTC
    pub recorded_at: DateTime<Utc>,
    /// Stored verbatim, never consulted
    pub device_fingerprint: Option<String>,
}

/// Input for writing a record
#[derive(Debug, Clone)]
pub struct NewAttendanceRecord {
    pub student_id: i64,
    pub class_id: i64,
    pub attended_on: NaiveDate,
    pub recorded_at: DateTime<Utc>,
    pub device_fingerprint: Option<String>,
}

/// Result of a write against the unique key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(AttendanceRecord),
    /// A record for the same (class, day, student) already existed
    Duplicate,
}

/// States of the attendance capture flow.
///
/// `Idle -> Scanning -> Verifying -> <terminal>`; terminal states go back to
/// `Idle` only through an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    Scanning,
    Verifying,
    Success,
    AlreadyMarked,
    WrongSession,
    ExpiredToken,
    OutsideSchedule,
    Failure,
    PermissionDenied,
}

impl CaptureState {
    /// States that end a scan attempt
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            CaptureState::Idle | CaptureState::Scanning | CaptureState::Verifying
        )
    }

    /// Whether `self -> next` is a legal edge
    pub fn can_transition_to(self, next: CaptureState) -> bool {
        use CaptureState::*;
        match (self, next) {
            (Idle, Scanning) => true,
            (Scanning, Verifying) | (Scanning, Idle) | (Scanning, PermissionDenied) => true,
            (Verifying, next) => next.is_terminal() && next != PermissionDenied,
            (from, Idle) => from.is_terminal(),
            _ => false,
        }
    }

    /// Short user-facing explanation of a terminal state
    pub fn message(self) -> &'static str {
        match self {
            CaptureState::Idle => "Ready to scan",
            CaptureState::Scanning => "Scanning",
            CaptureState::Verifying => "Verifying attendance",
            CaptureState::Success => "Attendance recorded",
            CaptureState::AlreadyMarked => "Attendance was already recorded today",
            CaptureState::WrongSession => "This code belongs to a different class",
            CaptureState::ExpiredToken => "This code has expired; ask for a fresh one",
            CaptureState::OutsideSchedule => "The class is not in session right now",
            CaptureState::Failure => "Could not record attendance; try again",
            CaptureState::PermissionDenied => "Camera access was denied; allow it and retry",
        }
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CaptureState::Idle => "idle",
            CaptureState::Scanning => "scanning",
            CaptureState::Verifying => "verifying",
            CaptureState::Success => "success",
            CaptureState::AlreadyMarked => "already_marked",
            CaptureState::WrongSession => "wrong_session",
            CaptureState::ExpiredToken => "expired_token",
            CaptureState::OutsideSchedule => "outside_schedule",
            CaptureState::Failure => "failure",
            CaptureState::PermissionDenied => "permission_denied",
        };
        f.write_str(s)
    }
}
