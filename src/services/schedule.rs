//! Schedule expansion
//!
//! Turns a class's weekly rules into concrete expected sessions over a date
//! window and answers which rule, if any, is running at a local instant.
//!
//! Rules are not versioned: the current rule set is applied uniformly to the
//! whole window, including days before the rules were last edited.

use crate::models::ScheduleRule;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

/// One expected session: a calendar day and the rule that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence<'a> {
    pub date: NaiveDate,
    pub rule: &'a ScheduleRule,
}

/// Every `(date, rule)` pair in `[start, end]`, ordered by date then rule position.
///
/// Returns an empty list when `end < start`. Two rules on the same weekday
/// produce two occurrences on every matching day.
pub fn expand(rules: &[ScheduleRule], start: NaiveDate, end: NaiveDate) -> Vec<Occurrence<'_>> {
    let mut occurrences = Vec::new();
    if rules.is_empty() {
        return occurrences;
    }

    for date in days(start, end) {
        let weekday = date.weekday();
        occurrences.extend(
            rules
                .iter()
                .filter(|rule| rule.day_of_week == weekday)
                .map(|rule| Occurrence { date, rule }),
        );
    }
    occurrences
}

/// Number of occurrences `expand` would return, without materializing them.
pub fn expected_count(rules: &[ScheduleRule], start: NaiveDate, end: NaiveDate) -> u32 {
    if end < start || rules.is_empty() {
        return 0;
    }

    let span = (end - start).num_days() + 1;
    let full_weeks = (span / 7) as u32;
    let remainder = span % 7;

    rules
        .iter()
        .map(|rule| {
            // Offset of the first matching day from `start`
            let offset = (rule.day_of_week.num_days_from_monday() as i64
                - start.weekday().num_days_from_monday() as i64)
                .rem_euclid(7);
            full_weeks + u32::from(offset < remainder)
        })
        .sum()
}

/// The first rule, in position order, whose window contains `at`.
pub fn active_rule(rules: &[ScheduleRule], at: NaiveDateTime) -> Option<&ScheduleRule> {
    let weekday = at.date().weekday();
    let time = at.time();
    rules
        .iter()
        .find(|rule| rule.day_of_week == weekday && rule.covers(time))
}

/// Whether any rule is running at `at`; false for a class without rules.
pub fn is_within_schedule(rules: &[ScheduleRule], at: NaiveDateTime) -> bool {
    active_rule(rules, at).is_some()
}

/// Inclusive day iterator; empty when `end < start`
pub fn days(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let len = if end < start { 0 } else { (end - start).num_days() + 1 };
    (0..len).map(move |offset| start + Duration::days(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn rule(day: Weekday, start: (u32, u32), end: (u32, u32)) -> ScheduleRule {
        ScheduleRule::new(day, at(start.0, start.1), at(end.0, end.1), "R1")
    }

    #[test]
    fn test_single_monday_rule_over_two_weeks() {
        let rules = vec![rule(Weekday::Mon, (9, 0), (10, 0))];
        // 2024-07-15 is a Monday; the 14-day window holds exactly two Mondays
        let start = date(2024, 7, 15);
        let end = date(2024, 7, 28);

        assert_eq!(expected_count(&rules, start, end), 2);
        let dates: Vec<NaiveDate> = expand(&rules, start, end).iter().map(|o| o.date).collect();
        assert_eq!(dates, vec![date(2024, 7, 15), date(2024, 7, 22)]);
    }

    #[test]
    fn test_monday_and_wednesday_until_second_wednesday() {
        let rules = vec![
            rule(Weekday::Mon, (9, 0), (10, 0)),
            rule(Weekday::Wed, (13, 0), (14, 0)),
        ];
        let count = expected_count(&rules, date(2024, 7, 15), date(2024, 7, 24));
        assert_eq!(count, 4);
    }

    #[test]
    fn test_same_day_rules_count_separately() {
        let rules = vec![
            rule(Weekday::Tue, (8, 0), (9, 0)),
            rule(Weekday::Tue, (10, 0), (11, 0)),
        ];
        let occurrences = expand(&rules, date(2024, 7, 16), date(2024, 7, 16));
        assert_eq!(occurrences.len(), 2);
        assert_eq!(occurrences[0].rule.start_time, at(8, 0));
        assert_eq!(occurrences[1].rule.start_time, at(10, 0));
    }

    #[test]
    fn test_today_before_semester_start_is_zero() {
        let rules = vec![rule(Weekday::Mon, (9, 0), (10, 0))];
        assert_eq!(expected_count(&rules, date(2024, 7, 15), date(2024, 7, 1)), 0);
        assert!(expand(&rules, date(2024, 7, 15), date(2024, 7, 1)).is_empty());
    }

    #[test]
    fn test_no_rules_never_in_session() {
        let monday_morning = date(2024, 7, 15).and_time(at(9, 30));
        assert!(!is_within_schedule(&[], monday_morning));
        assert_eq!(expected_count(&[], date(2024, 7, 1), date(2024, 12, 31)), 0);
    }

    #[test]
    fn test_active_rule_window_is_half_open() {
        let rules = vec![
            rule(Weekday::Mon, (9, 0), (10, 0)),
            rule(Weekday::Mon, (10, 0), (11, 0)),
        ];
        let monday = date(2024, 7, 15);

        assert_eq!(active_rule(&rules, monday.and_time(at(9, 5))), Some(&rules[0]));
        assert_eq!(active_rule(&rules, monday.and_time(at(10, 0))), Some(&rules[1]));
        assert_eq!(active_rule(&rules, monday.and_time(at(11, 0))), None);
        // Right time, wrong weekday
        assert_eq!(active_rule(&rules, date(2024, 7, 16).and_time(at(9, 5))), None);
    }

    #[test]
    fn test_days_iterator() {
        assert_eq!(days(date(2024, 2, 28), date(2024, 3, 1)).count(), 3);
        assert_eq!(days(date(2024, 3, 1), date(2024, 2, 28)).count(), 0);
    }

    fn weekday_strategy() -> impl Strategy<Value = Weekday> {
        (0u32..7).prop_map(|n| Weekday::try_from(n as u8).unwrap())
    }

    fn rules_strategy() -> impl Strategy<Value = Vec<ScheduleRule>> {
        prop::collection::vec(
            (weekday_strategy(), 7u32..18).prop_map(|(day, hour)| rule(day, (hour, 0), (hour + 1, 0))),
            0..6,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn count_matches_expansion(
            rules in rules_strategy(),
            start_offset in 0i64..400,
            span in -10i64..200,
        ) {
            let start = date(2024, 1, 1) + Duration::days(start_offset);
            let end = start + Duration::days(span);
            prop_assert_eq!(expected_count(&rules, start, end) as usize, expand(&rules, start, end).len());
        }

        #[test]
        fn whole_weeks_give_one_per_rule_per_week(
            rules in rules_strategy(),
            start_offset in 0i64..400,
            weeks in 0i64..30,
        ) {
            let start = date(2024, 1, 1) + Duration::days(start_offset);
            let end = start + Duration::days(weeks * 7 - 1);
            prop_assert_eq!(expected_count(&rules, start, end), (rules.len() as i64 * weeks) as u32);
        }
    }
}
