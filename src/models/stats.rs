//! Attendance statistics types

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Attendance summary for one student
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub student_id: i64,
    /// Whole percent, always within `0..=100`
    pub attendance_rate: u32,
    pub total_classes: u32,
    pub attended_classes: u32,
    pub missed_classes: u32,
    /// Sorted by subject
    pub subject_breakdown: Vec<SubjectBreakdown>,
}

/// Per-subject slice of `AttendanceStats`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectBreakdown {
    pub subject: String,
    pub attendance_rate: u32,
    pub total_classes: u32,
    pub attended_classes: u32,
    pub missed_classes: u32,
}

/// Rate triple computed from expected and attended counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub total: u32,
    pub attended: u32,
    pub missed: u32,
    pub rate: u32,
}

impl Tally {
    /// `total = max(expected, attended)`, so the rate never exceeds 100 even
    /// when the current rules under-count past sessions.
    pub fn from_counts(expected: u32, attended: u32) -> Self {
        let total = expected.max(attended);
        let rate = if total == 0 {
            0
        } else {
            ((attended as f64 / total as f64) * 100.0).round() as u32
        };
        Self {
            total,
            attended,
            missed: total.saturating_sub(attended),
            rate,
        }
    }
}

/// Bucket width for trend views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendGranularity {
    /// Monday-based weeks
    #[default]
    Week,
    /// Calendar months
    Month,
}

impl fmt::Display for TrendGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendGranularity::Week => write!(f, "week"),
            TrendGranularity::Month => write!(f, "month"),
        }
    }
}

impl FromStr for TrendGranularity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "week" | "weekly" => Ok(TrendGranularity::Week),
            "month" | "monthly" => Ok(TrendGranularity::Month),
            _ => Err(anyhow::anyhow!("Invalid trend granularity: {}", s)),
        }
    }
}

/// One week or month of a student's attendance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendBucket {
    /// First day of the bucket (Monday or the 1st)
    pub period_start: NaiveDate,
    /// Last day of the bucket that lies inside the statistics window
    pub period_end: NaiveDate,
    pub expected: u32,
    pub attended: u32,
    pub attendance_rate: u32,
    /// Attended count minus the previous bucket's; 0 for the first bucket
    pub attended_change: i64,
    /// Rate minus the previous bucket's; 0 for the first bucket
    pub rate_change: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tally_basic() {
        let t = Tally::from_counts(4, 3);
        assert_eq!(t, Tally { total: 4, attended: 3, missed: 1, rate: 75 });
    }

    #[test]
    fn test_tally_rounds_half_up() {
        assert_eq!(Tally::from_counts(8, 1).rate, 13); // 12.5
        assert_eq!(Tally::from_counts(3, 2).rate, 67);
    }

    #[test]
    fn test_tally_zero_total() {
        assert_eq!(Tally::from_counts(0, 0), Tally { total: 0, attended: 0, missed: 0, rate: 0 });
    }

    #[test]
    fn test_tally_attended_exceeds_expected() {
        let t = Tally::from_counts(2, 5);
        assert_eq!(t.total, 5);
        assert_eq!(t.missed, 0);
        assert_eq!(t.rate, 100);
    }

    #[test]
    fn test_granularity_parse() {
        assert_eq!("week".parse::<TrendGranularity>().unwrap(), TrendGranularity::Week);
        assert_eq!("Monthly".parse::<TrendGranularity>().unwrap(), TrendGranularity::Month);
        assert!("daily".parse::<TrendGranularity>().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn rate_always_within_bounds(expected in 0u32..10_000, attended in 0u32..10_000) {
            let t = Tally::from_counts(expected, attended);
            prop_assert!(t.rate <= 100);
            prop_assert!(t.total >= t.attended);
            prop_assert_eq!(t.total, t.attended + t.missed);
        }
    }
}
