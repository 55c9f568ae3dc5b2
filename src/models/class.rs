//! Class model
//!
//! A class is one subject taught to one (department, semester) cohort. It owns
//! its weekly schedule rules and at most one live session token.

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Class entity
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    /// Unique identifier
    pub id: i64,
    /// Subject name, used to group statistics
    pub subject: String,
    /// Department of the enrolled cohort
    pub department: String,
    /// Semester of the enrolled cohort
    pub semester: String,
    /// Weekly recurrence rules, in insertion order
    pub schedules: Vec<ScheduleRule>,
    /// Current session token; never serialized
    #[serde(skip_serializing)]
    pub token: Option<SessionToken>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Class {
    /// Expiry of the current token, if one has been issued
    pub fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.token.as_ref().map(|t| t.expires_at)
    }

    /// Whether a student of the given cohort is enrolled in this class
    pub fn enrolls(&self, department: &str, semester: &str) -> bool {
        self.department == department && self.semester == semester
    }
}

/// One weekly recurrence: a weekday plus a `[start, end)` local time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRule {
    #[serde(with = "weekday_name")]
    pub day_of_week: Weekday,
    #[serde(with = "clock_time")]
    pub start_time: NaiveTime,
    #[serde(with = "clock_time")]
    pub end_time: NaiveTime,
    #[serde(default)]
    pub room: String,
}

impl ScheduleRule {
    pub fn new(day_of_week: Weekday, start_time: NaiveTime, end_time: NaiveTime, room: &str) -> Self {
        Self {
            day_of_week,
            start_time,
            end_time,
            room: room.to_string(),
        }
    }

    /// Whether the local time-of-day falls inside `[start, end)`
    pub fn covers(&self, time: NaiveTime) -> bool {
        self.start_time <= time && time < self.end_time
    }

    /// Rules must describe a non-empty window on a single day.
    pub fn validate(&self) -> Result<(), String> {
        if self.start_time >= self.end_time {
            return Err(format!(
                "Schedule on {} starts at {} but ends at {}",
                weekday_name::as_str(self.day_of_week),
                self.start_time.format("%H:%M"),
                self.end_time.format("%H:%M")
            ));
        }
        Ok(())
    }
}

/// Live attendance token of a class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    /// Still inside its validity window at `now`
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Input for creating a class
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClassInput {
    pub subject: String,
    pub department: String,
    pub semester: String,
    #[serde(default)]
    pub schedules: Vec<ScheduleRule>,
}

/// Lowercase full weekday names ("monday") on the wire and in the database.
pub mod weekday_name {
    use chrono::Weekday;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn as_str(day: Weekday) -> &'static str {
        match day {
            Weekday::Mon => "monday",
            Weekday::Tue => "tuesday",
            Weekday::Wed => "wednesday",
            Weekday::Thu => "thursday",
            Weekday::Fri => "friday",
            Weekday::Sat => "saturday",
            Weekday::Sun => "sunday",
        }
    }

    /// Accepts full or three-letter names in any case.
    pub fn parse(s: &str) -> anyhow::Result<Weekday> {
        s.trim()
            .parse::<Weekday>()
            .map_err(|_| anyhow::anyhow!("Invalid day of week: {}", s))
    }

    pub fn serialize<S: Serializer>(day: &Weekday, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(as_str(*day))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Weekday, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }
}

/// "HH:MM" on the wire; "HH:MM:SS" is accepted too.
pub mod clock_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> anyhow::Result<NaiveTime> {
        let s = s.trim();
        NaiveTime::parse_from_str(s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
            .map_err(|_| anyhow::anyhow!("Invalid time of day: {}", s))
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_rule_covers_half_open_window() {
        let rule = ScheduleRule::new(Weekday::Mon, t(9, 0), t(10, 0), "A-101");
        assert!(rule.covers(t(9, 0)));
        assert!(rule.covers(t(9, 59)));
        assert!(!rule.covers(t(10, 0)));
        assert!(!rule.covers(t(8, 59)));
    }

    #[test]
    fn test_rule_validate() {
        assert!(ScheduleRule::new(Weekday::Mon, t(9, 0), t(10, 0), "").validate().is_ok());
        let err = ScheduleRule::new(Weekday::Fri, t(10, 0), t(10, 0), "").validate().unwrap_err();
        assert!(err.contains("friday"));
    }

    #[test]
    fn test_rule_json_shape() {
        let json = r#"{"dayOfWeek":"Wednesday","startTime":"13:30","endTime":"15:00:00","room":"B2"}"#;
        let rule: ScheduleRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.day_of_week, Weekday::Wed);
        assert_eq!(rule.end_time, t(15, 0));

        let out = serde_json::to_value(&rule).unwrap();
        assert_eq!(out["dayOfWeek"], "wednesday");
        assert_eq!(out["startTime"], "13:30");
    }

    #[test]
    fn test_rule_rejects_bad_weekday() {
        let json = r#"{"dayOfWeek":"someday","startTime":"09:00","endTime":"10:00"}"#;
        assert!(serde_json::from_str::<ScheduleRule>(json).is_err());
    }

    #[test]
    fn test_token_liveness() {
        let issued = Utc.with_ymd_and_hms(2024, 7, 15, 9, 0, 0).unwrap();
        let token = SessionToken {
            value: "abc".to_string(),
            issued_at: issued,
            expires_at: issued + chrono::Duration::minutes(10),
        };
        assert!(token.is_live_at(issued + chrono::Duration::minutes(9)));
        assert!(!token.is_live_at(issued + chrono::Duration::minutes(10)));
    }

    #[test]
    fn test_class_serialization_hides_token() {
        let now = Utc::now();
        let class = Class {
            id: 1,
            subject: "Algorithms".to_string(),
            department: "CS".to_string(),
            semester: "2024-odd".to_string(),
            schedules: vec![],
            token: Some(SessionToken {
                value: "secret".to_string(),
                issued_at: now,
                expires_at: now,
            }),
            created_at: now,
        };
        let json = serde_json::to_string(&class).unwrap();
        assert!(!json.contains("secret"));
        assert!(class.enrolls("CS", "2024-odd"));
        assert!(!class.enrolls("CS", "2024-even"));
    }
}
