//! Student model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A student; enrollment is the (department, semester) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub department: String,
    pub semester: String,
    pub created_at: DateTime<Utc>,
}

/// Input for registering a student
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStudentInput {
    pub name: String,
    pub department: String,
    pub semester: String,
}
