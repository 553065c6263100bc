//! Cron expressions and the named-interval tables

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{ReplayError, ReplayResult};

const INTERVALS: [(&str, &str); 6] = [
    ("hourly", "0 * * * *"),
    ("every_6_hours", "0 */6 * * *"),
    ("every_12_hours", "0 */12 * * *"),
    ("daily", "0 0 * * *"),
    ("weekly", "0 0 * * SUN"),
    ("monthly", "0 0 1 * *"),
];

/// Human interval name → five-field cron expression
pub static INTERVAL_TO_CRON: LazyLock<BTreeMap<&'static str, &'static str>> =
    LazyLock::new(|| INTERVALS.iter().copied().collect());

/// Five-field cron expression → human interval name
pub static CRON_TO_INTERVAL: LazyLock<BTreeMap<&'static str, &'static str>> =
    LazyLock::new(|| INTERVALS.iter().map(|&(name, expr)| (expr, name)).collect());

/// A parsed schedule, as given by the user and as the cron parser needs it
#[derive(Debug, Clone)]
pub struct CronSpec {
    /// Expression as stored in the schedule state
    pub expr: String,
    /// Interval name when the expression is one of the named intervals
    pub interval: Option<String>,
    schedule: Schedule,
}

impl CronSpec {
    /// Accepts an interval name or a five/six/seven-field cron expression
    pub fn parse(input: &str) -> ReplayResult<Self> {
        let trimmed = input.trim();
        let (expr, interval) = match INTERVAL_TO_CRON.get(trimmed.to_lowercase().as_str()) {
            Some(expr) => (expr.to_string(), Some(trimmed.to_lowercase())),
            None => {
                let expr = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
                let interval = CRON_TO_INTERVAL.get(expr.as_str()).map(|s| s.to_string());
                (expr, interval)
            }
        };

        let normalized = normalize(&expr)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| ReplayError::InvalidCron {
            expr: expr.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            expr,
            interval,
            schedule,
        })
    }

    /// First fire time strictly after `t`
    pub fn next_after(&self, t: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(t).next()
    }
}

/// The cron parser wants a leading seconds field; five-field input fires at
/// second 0 and counts weekdays the Unix way (0 or 7 = Sunday)
fn normalize(expr: &str) -> ReplayResult<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => {
            let dow = unix_weekdays(expr, fields[4])?;
            Ok(format!("0 {} {}", fields[..4].join(" "), dow))
        }
        6 | 7 => Ok(expr.to_string()),
        n => Err(ReplayError::InvalidCron {
            expr: expr.to_string(),
            reason: format!("expected 5 to 7 fields, found {}", n),
        }),
    }
}

/// Rewrite numeric day-of-week items (0-7, Sunday = 0 and 7) into the
/// parser's 1-7 numbering with Sunday = 1. Names and `*` pass through.
fn unix_weekdays(expr: &str, field: &str) -> ReplayResult<String> {
    let invalid = |reason: String| ReplayError::InvalidCron {
        expr: expr.to_string(),
        reason,
    };
    let day = |s: &str| -> ReplayResult<u32> {
        match s.parse::<u32>() {
            Ok(n) if n <= 7 => Ok(n),
            _ => Err(invalid(format!("day of week '{}' is not in 0-7", s))),
        }
    };
    let is_numeric = |s: &str| s.chars().all(|c| c.is_ascii_digit() || c == '-');

    let mut days: Vec<u32> = Vec::new();
    let mut kept: Vec<&str> = Vec::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };
        if base == "*" || base == "?" || !is_numeric(base) {
            kept.push(item);
            continue;
        }

        let (from, to) = match base.split_once('-') {
            Some((a, b)) => (day(a)?, day(b)?),
            None if step.is_some() => (day(base)?, 6),
            None => {
                let d = day(base)?;
                (d, d)
            }
        };
        if from > to {
            return Err(invalid(format!("day-of-week range '{}' runs backwards", base)));
        }
        let step = match step {
            Some(s) => s
                .parse::<usize>()
                .ok()
                .filter(|&s| s > 0)
                .ok_or_else(|| invalid(format!("bad day-of-week step '{}'", s)))?,
            None => 1,
        };
        days.extend((from..=to).step_by(step).map(|d| d % 7 + 1));
    }

    days.sort_unstable();
    days.dedup();
    let mut items: Vec<String> = days.iter().map(u32::to_string).collect();
    items.extend(kept.iter().map(|s| s.to_string()));
    Ok(items.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_interval_tables_round_trip() {
        assert_eq!(CRON_TO_INTERVAL[INTERVAL_TO_CRON["daily"]], "daily");
        for (name, expr) in INTERVAL_TO_CRON.iter() {
            assert_eq!(CRON_TO_INTERVAL[expr], *name);
        }
        for (expr, name) in CRON_TO_INTERVAL.iter() {
            assert_eq!(INTERVAL_TO_CRON[name], *expr);
        }
        assert_eq!(INTERVAL_TO_CRON.len(), CRON_TO_INTERVAL.len());
    }

    #[test]
    fn test_every_interval_parses() {
        for (name, expr) in INTERVAL_TO_CRON.iter() {
            let spec = CronSpec::parse(name).unwrap();
            assert_eq!(spec.expr, *expr);
            assert_eq!(spec.interval.as_deref(), Some(*name));
        }
    }

    #[test]
    fn test_five_field_expression_fires_on_the_minute() {
        let spec = CronSpec::parse("0 0 * * *").unwrap();
        assert_eq!(spec.interval.as_deref(), Some("daily"));

        let t = Utc.with_ymd_and_hms(2024, 3, 5, 13, 30, 0).unwrap();
        let next = spec.next_after(&t).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_six_field_expression_is_kept() {
        let spec = CronSpec::parse("30 15 * * * *").unwrap();
        assert!(spec.interval.is_none());
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 13, 0, 0).unwrap();
        assert_eq!(
            spec.next_after(&t).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 5, 13, 15, 30).unwrap()
        );
    }

    #[test]
    fn test_weekly_fires_on_sunday() {
        let spec = CronSpec::parse("weekly").unwrap();
        // 2024-03-05 is a Tuesday
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        assert_eq!(
            spec.next_after(&t).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_five_field_weekdays_use_unix_numbering() {
        // 2024-03-05 is a Tuesday
        let tuesday = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        let monday = CronSpec::parse("0 9 * * 1").unwrap();
        assert_eq!(monday.expr, "0 9 * * 1");
        assert_eq!(
            monday.next_after(&tuesday).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 11, 9, 0, 0).unwrap()
        );

        for sunday in ["0 9 * * 0", "0 9 * * 7"] {
            assert_eq!(
                CronSpec::parse(sunday).unwrap().next_after(&tuesday).unwrap(),
                Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap()
            );
        }

        // From a Saturday, weekdays resume on Monday
        let saturday = Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap();
        let weekdays = CronSpec::parse("0 9 * * 1-5").unwrap();
        assert_eq!(
            weekdays.next_after(&saturday).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 11, 9, 0, 0).unwrap()
        );

        let whole_week = CronSpec::parse("0 9 * * 1-7").unwrap();
        assert_eq!(
            whole_week.next_after(&saturday).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_weekday_lists_and_steps() {
        assert_eq!(unix_weekdays("", "0,3,5").unwrap(), "1,4,6");
        assert_eq!(unix_weekdays("", "1-5").unwrap(), "2,3,4,5,6");
        assert_eq!(unix_weekdays("", "0/2").unwrap(), "1,3,5,7");
        assert_eq!(unix_weekdays("", "*").unwrap(), "*");
        assert_eq!(unix_weekdays("", "MON-FRI").unwrap(), "MON-FRI");
        assert!(unix_weekdays("", "8").is_err());
        assert!(unix_weekdays("", "5-1").is_err());
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(matches!(
            CronSpec::parse("fortnightly"),
            Err(ReplayError::InvalidCron { .. })
        ));
        assert!(matches!(
            CronSpec::parse("61 * * * *"),
            Err(ReplayError::InvalidCron { .. })
        ));
    }
}
