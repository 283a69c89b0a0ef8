//! Five-field cron expressions (`minute hour day-of-month month day-of-week`), evaluated in UTC

use crate::schedule::ScheduleError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use std::fmt::{Display, Formatter};

/// Days inspected before giving up, enough to reach the next February 29th
const MAX_DAYS: u32 = 366 * 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    days_of_week: u8,
    day_of_month_restricted: bool,
    day_of_week_restricted: bool,
    source: String,
}

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: Field = Field {
    name: "minute",
    min: 0,
    max: 59,
};
const HOUR: Field = Field {
    name: "hour",
    min: 0,
    max: 23,
};
const DAY_OF_MONTH: Field = Field {
    name: "day of month",
    min: 1,
    max: 31,
};
const MONTH: Field = Field {
    name: "month",
    min: 1,
    max: 12,
};
const DAY_OF_WEEK: Field = Field {
    name: "day of week",
    min: 0,
    max: 7,
};

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<_> = expression.split_whitespace().collect();
        let [minute, hour, day_of_month, month, day_of_week] = fields.as_slice() else {
            return Err(ScheduleError::InvalidCron(format!(
                "expected 5 fields, found {}",
                fields.len()
            )));
        };

        let mut days_of_week = parse_field(day_of_week, &DAY_OF_WEEK)?;
        // 7 is an alias for Sunday
        if days_of_week & (1 << 7) != 0 {
            days_of_week |= 1;
        }

        Ok(Self {
            minutes: parse_field(minute, &MINUTE)?,
            hours: parse_field(hour, &HOUR)? as u32,
            days_of_month: parse_field(day_of_month, &DAY_OF_MONTH)? as u32,
            months: parse_field(month, &MONTH)? as u16,
            days_of_week: (days_of_week & 0x7f) as u8,
            day_of_month_restricted: *day_of_month != "*",
            day_of_week_restricted: *day_of_week != "*",
            source: fields.join(" "),
        })
    }

    /// The first matching minute strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let now = now.with_nanosecond(0)?.with_second(0)?;
        let start = now + Duration::minutes(1);

        let mut date = start.date_naive();
        for _ in 0..MAX_DAYS {
            if self.matches_day(date) {
                for hour in (0..24).filter(|h| self.hours & (1 << h) != 0) {
                    for minute in (0..60).filter(|m| self.minutes & (1 << m) != 0) {
                        let candidate = date.and_hms_opt(hour, minute, 0)?.and_utc();
                        if candidate >= start {
                            return Some(candidate);
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }

        None
    }

    fn matches_day(&self, date: NaiveDate) -> bool {
        if self.months & (1 << date.month()) == 0 {
            return false;
        }

        let day_of_month = self.days_of_month & (1 << date.day()) != 0;
        let day_of_week = self.days_of_week & (1 << date.weekday().num_days_from_sunday()) != 0;

        // When both day fields are restricted either one may match, as in Vixie cron
        match (self.day_of_month_restricted, self.day_of_week_restricted) {
            (true, true) => day_of_month || day_of_week,
            _ => day_of_month && day_of_week,
        }
    }
}

impl Display for CronSchedule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_field(raw: &str, field: &Field) -> Result<u64, ScheduleError> {
    let invalid = || ScheduleError::InvalidCron(format!("invalid {} field `{raw}`", field.name));

    let mut mask = 0u64;
    for item in raw.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (start, end) = if range == "*" {
            (field.min, field.max)
        } else if let Some((start, end)) = range.split_once('-') {
            (
                start.parse().map_err(|_| invalid())?,
                end.parse().map_err(|_| invalid())?,
            )
        } else {
            let value: u32 = range.parse().map_err(|_| invalid())?;
            // `5/15` means "from 5 to the end, every 15"
            if step > 1 { (value, field.max) } else { (value, value) }
        };

        if start < field.min || end > field.max || start > end {
            return Err(invalid());
        }

        for value in (start..=end).step_by(step as usize) {
            mask |= 1 << value;
        }
    }

    Ok(mask)
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_every_fifteen_minutes() {
        let cron = CronSchedule::parse("*/15 * * * *").unwrap();
        assert_eq!(
            cron.next_after(utc(2024, 3, 1, 10, 7)).unwrap(),
            utc(2024, 3, 1, 10, 15)
        );
        assert_eq!(
            cron.next_after(utc(2024, 3, 1, 10, 45)).unwrap(),
            utc(2024, 3, 1, 11, 0)
        );
    }

    #[test]
    fn test_weekdays_at_noon() {
        let cron = CronSchedule::parse("0 12 * * 1-5").unwrap();

        // 2024-03-02 is a Saturday
        assert_eq!(
            cron.next_after(utc(2024, 3, 2, 8, 0)).unwrap(),
            utc(2024, 3, 4, 12, 0)
        );
    }

    #[test]
    fn test_day_fields_are_ored_when_both_restricted() {
        let cron = CronSchedule::parse("0 0 13 * 5").unwrap();

        // 2024-03-08 is a Friday, before the 13th
        assert_eq!(
            cron.next_after(utc(2024, 3, 6, 0, 0)).unwrap(),
            utc(2024, 3, 8, 0, 0)
        );
        assert_eq!(
            cron.next_after(utc(2024, 3, 8, 0, 0)).unwrap(),
            utc(2024, 3, 13, 0, 0)
        );
    }

    #[test]
    fn test_leap_day() {
        let cron = CronSchedule::parse("30 6 29 2 *").unwrap();
        assert_eq!(
            cron.next_after(utc(2024, 3, 1, 0, 0)).unwrap(),
            utc(2028, 2, 29, 6, 30)
        );
    }

    #[test]
    fn test_rejects_malformed_expressions() {
        assert!(CronSchedule::parse("* * * *").is_err());
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("5-1 * * * *").is_err());
        assert!(CronSchedule::parse("0 0 0 * *").is_err());
    }
}
