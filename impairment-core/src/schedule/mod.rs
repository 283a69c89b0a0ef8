//! Recurrence rules for transient scenarios
//!
//! Everything here is pure: given a rule and "now", compute the next occurrence strictly after
//! "now". The scheduler decides what to do with past-due occurrences.

pub mod cron;
pub mod rrule;

use chrono::{DateTime, Utc};
use cron::CronSchedule;
use rrule::RecurrenceRule;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("empty recurrence rule")]
    Empty,
    #[error("malformed recurrence rule: {0}")]
    Malformed(String),
    #[error("recurrence rule has no FREQ part")]
    MissingFrequency,
    #[error("unsupported recurrence rule part `{0}`")]
    Unsupported(String),
    #[error("invalid value `{value}` for {part}")]
    InvalidValue { part: String, value: String },
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
    #[error("invalid duration `{0}`, expected ISO 8601 (e.g. `PT15M`) or seconds")]
    InvalidDuration(String),
    #[error("transient scenarios need a duration longer than zero")]
    ZeroDuration,
    #[error("transient scenarios need a schedule")]
    MissingSchedule,
    #[error("recurrence rule `{0}` never fires again")]
    NeverFires(String),
}

/// When a transient scenario activates
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recurrence {
    Rule(RecurrenceRule),
    Cron(CronSchedule),
}

impl Recurrence {
    /// The next occurrence strictly after `now`, `None` once the rule is exhausted
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::Rule(rule) => rule.next_after(now),
            Recurrence::Cron(cron) => cron.next_after(now),
        }
    }

    /// The next `count` occurrences after `now`
    pub fn upcoming(&self, now: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut occurrences = Vec::with_capacity(count);
        let mut cursor = now;
        while occurrences.len() < count {
            let Some(next) = self.next_after(cursor) else {
                break;
            };
            occurrences.push(next);
            cursor = next;
        }
        occurrences
    }
}

impl FromStr for Recurrence {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ScheduleError::Empty);
        }

        let upper = s.to_ascii_uppercase();
        let looks_like_rule = ["RRULE:", "FREQ=", "DTSTART"]
            .iter()
            .any(|prefix| upper.starts_with(prefix));

        if looks_like_rule {
            Ok(Recurrence::Rule(RecurrenceRule::parse(s)?))
        } else {
            Ok(Recurrence::Cron(CronSchedule::parse(s)?))
        }
    }
}

impl Display for Recurrence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Recurrence::Rule(rule) => write!(f, "{rule}"),
            Recurrence::Cron(cron) => write!(f, "{cron}"),
        }
    }
}

/// Parses an ISO 8601 duration (`P1DT2H`, `PT15M`, `PT0.5S`) or a plain number of seconds
pub fn parse_duration(s: &str) -> Result<Duration, ScheduleError> {
    let s = s.trim();
    let invalid = || ScheduleError::InvalidDuration(s.to_string());

    if let Ok(seconds) = s.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let rest = s
        .strip_prefix('P')
        .or_else(|| s.strip_prefix('p'))
        .ok_or_else(invalid)?;
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total = 0.0f64;
    let mut in_time = false;
    let mut number = String::new();
    let mut seen_component = false;
    for c in rest.chars() {
        match c.to_ascii_uppercase() {
            'T' if !in_time && number.is_empty() => in_time = true,
            c if c.is_ascii_digit() || c == '.' => number.push(c),
            unit => {
                let value: f64 = number.parse().map_err(|_| invalid())?;
                number.clear();
                let seconds_per_unit = match (in_time, unit) {
                    (false, 'W') => 7.0 * 86_400.0,
                    (false, 'D') => 86_400.0,
                    (true, 'H') => 3_600.0,
                    (true, 'M') => 60.0,
                    (true, 'S') => 1.0,
                    _ => return Err(invalid()),
                };
                total += value * seconds_per_unit;
                seen_component = true;
            }
        }
    }

    if !number.is_empty() || !seen_component {
        return Err(invalid());
    }

    Duration::try_from_secs_f64(total).map_err(|_| invalid())
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_picks_rule_or_cron() {
        assert!(matches!(
            "RRULE:FREQ=DAILY;BYHOUR=12".parse::<Recurrence>().unwrap(),
            Recurrence::Rule(_)
        ));
        assert!(matches!(
            "0 12 * * *".parse::<Recurrence>().unwrap(),
            Recurrence::Cron(_)
        ));
        assert_eq!("  ".parse::<Recurrence>().unwrap_err(), ScheduleError::Empty);
    }

    #[test]
    fn test_upcoming_stops_when_exhausted() {
        let recurrence: Recurrence = "FREQ=DAILY;BYHOUR=12;UNTIL=20240303T120000Z".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let upcoming = recurrence.upcoming(now, 10);
        assert_eq!(upcoming.len(), 3);
        assert_eq!(
            upcoming[2],
            Utc.with_ymd_and_hms(2024, 3, 3, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("PT15M").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("PT1H30M").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("P1DT2H").unwrap(), Duration::from_secs(93_600));
        assert_eq!(parse_duration("PT45S").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("PT0.5S").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("3600").unwrap(), Duration::from_secs(3600));

        for invalid in ["", "P", "PT", "15M", "PT15", "P1H", "PT1D"] {
            assert!(parse_duration(invalid).is_err(), "{invalid} should be rejected");
        }
    }
}
