//! Semester model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Named semester; `starts_on` opens the statistics window of every class
/// tagged with this name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Semester {
    pub name: String,
    pub starts_on: NaiveDate,
}
