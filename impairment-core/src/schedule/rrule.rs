//! Subset of RFC 5545 recurrence rules, evaluated in UTC

use crate::schedule::ScheduleError;
use chrono::{DateTime, NaiveDateTime, Utc, Weekday};
use std::fmt::{Display, Formatter};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

/// Anchor used when the rule carries no `DTSTART`: Monday 1970-01-05T00:00:00Z
const DEFAULT_ANCHOR: i64 = 4 * DAY;

/// Upper bound on the periods inspected when looking for the next occurrence
const MAX_PERIODS: u64 = 1_000_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Frequency {
    Minutely,
    Hourly,
    Daily,
    Weekly,
}

impl Frequency {
    fn period_secs(self) -> i64 {
        match self {
            Frequency::Minutely => MINUTE,
            Frequency::Hourly => HOUR,
            Frequency::Daily => DAY,
            Frequency::Weekly => WEEK,
        }
    }

    /// Start of the period containing `ts`
    fn floor(self, ts: i64) -> i64 {
        match self {
            Frequency::Weekly => {
                let days = ts.div_euclid(DAY);
                // 1970-01-01 was a Thursday
                let days_since_monday = (days + 3).rem_euclid(7);
                (days - days_since_monday) * DAY
            }
            _ => ts - ts.rem_euclid(self.period_secs()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecurrenceRule {
    frequency: Frequency,
    interval: u32,
    by_second: Vec<u32>,
    by_minute: Option<Vec<u32>>,
    by_hour: Option<Vec<u32>>,
    /// Days counted from Monday
    by_day: Option<Vec<u32>>,
    until: Option<DateTime<Utc>>,
    dtstart: Option<DateTime<Utc>>,
    source: String,
}

impl RecurrenceRule {
    pub fn parse(rule: &str) -> Result<Self, ScheduleError> {
        let source = rule.trim().to_string();
        let body = source
            .strip_prefix("RRULE:")
            .unwrap_or(&source)
            .replace(['\n', '\r'], ";");

        let mut frequency = None;
        let mut interval = 1;
        let mut by_second = None;
        let mut by_minute = None;
        let mut by_hour = None;
        let mut by_day = None;
        let mut until = None;
        let mut dtstart = None;

        for part in body.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // `DTSTART:<ts>` is accepted alongside the iCalendar `DTSTART=<ts>` form
            let part = part.strip_prefix("RRULE:").unwrap_or(part);
            let (key, value) = part
                .split_once('=')
                .or_else(|| part.split_once(':'))
                .ok_or_else(|| ScheduleError::Malformed(format!("`{part}` is not KEY=VALUE")))?;
            let key = key.trim().to_ascii_uppercase();
            let value = value.trim();

            match key.as_str() {
                "FREQ" => {
                    frequency = Some(match value.to_ascii_uppercase().as_str() {
                        "MINUTELY" => Frequency::Minutely,
                        "HOURLY" => Frequency::Hourly,
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "SECONDLY" | "MONTHLY" | "YEARLY" => {
                            return Err(ScheduleError::Unsupported(format!("FREQ={value}")));
                        }
                        _ => return Err(invalid_value("FREQ", value)),
                    })
                }
                "INTERVAL" => {
                    interval = value
                        .parse()
                        .ok()
                        .filter(|&interval: &u32| interval > 0)
                        .ok_or_else(|| invalid_value("INTERVAL", value))?
                }
                "BYSECOND" => by_second = Some(parse_list("BYSECOND", value, 59)?),
                "BYMINUTE" => by_minute = Some(parse_list("BYMINUTE", value, 59)?),
                "BYHOUR" => by_hour = Some(parse_list("BYHOUR", value, 23)?),
                "BYDAY" => by_day = Some(parse_days(value)?),
                "UNTIL" => until = Some(parse_timestamp("UNTIL", value)?),
                "DTSTART" => dtstart = Some(parse_timestamp("DTSTART", value)?),
                "WKST" if value.eq_ignore_ascii_case("MO") => {}
                "COUNT" | "WKST" | "BYMONTH" | "BYMONTHDAY" | "BYYEARDAY" | "BYWEEKNO"
                | "BYSETPOS" => return Err(ScheduleError::Unsupported(part.to_string())),
                _ => return Err(ScheduleError::Malformed(format!("unknown rule part `{key}`"))),
            }
        }

        let frequency = frequency.ok_or(ScheduleError::MissingFrequency)?;
        let anchor = dtstart
            .map(|dt: DateTime<Utc>| dt.timestamp())
            .unwrap_or(DEFAULT_ANCHOR);
        let anchor_of = |unit: i64, modulo: i64| (anchor.div_euclid(unit).rem_euclid(modulo)) as u32;

        // Parts finer than the frequency default to the anchor, as RFC 5545 derives them from DTSTART
        let by_second = by_second.unwrap_or_else(|| vec![anchor_of(1, 60)]);
        let by_minute = by_minute.or_else(|| {
            (frequency != Frequency::Minutely).then(|| vec![anchor_of(MINUTE, 60)])
        });
        let by_hour = by_hour.or_else(|| {
            matches!(frequency, Frequency::Daily | Frequency::Weekly)
                .then(|| vec![anchor_of(HOUR, 24)])
        });
        let by_day = by_day.or_else(|| {
            (frequency == Frequency::Weekly)
                .then(|| vec![((anchor.div_euclid(DAY) + 3).rem_euclid(7)) as u32])
        });

        Ok(Self {
            frequency,
            interval,
            by_second,
            by_minute,
            by_hour,
            by_day,
            until,
            dtstart,
            source,
        })
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn until(&self) -> Option<DateTime<Utc>> {
        self.until
    }

    /// The first occurrence strictly after `now`, if any
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let now = now.timestamp();
        let anchor = self.dtstart.map(|dt| dt.timestamp()).unwrap_or(DEFAULT_ANCHOR);
        let until = self.until.map(|dt| dt.timestamp());

        let period = self.frequency.period_secs();
        let anchor_period = self.frequency.floor(anchor);
        let interval = i64::from(self.interval);

        // First period that may contain a candidate, aligned on the interval
        let from = self.frequency.floor(now.max(anchor));
        let mut index = (from - anchor_period) / period;
        index = index.div_euclid(interval) * interval;

        for _ in 0..MAX_PERIODS {
            let period_start = anchor_period + index * period;
            if until.is_some_and(|until| period_start > until) {
                return None;
            }

            for candidate in self.expand(period_start) {
                if candidate <= now || candidate < anchor {
                    continue;
                }
                if until.is_some_and(|until| candidate > until) {
                    return None;
                }
                if self.limits(candidate) {
                    return DateTime::from_timestamp(candidate, 0);
                }
            }

            index += interval;
        }

        None
    }

    /// Candidate instants of a period, in ascending order
    fn expand(&self, period_start: i64) -> Vec<i64> {
        let all_minutes = [0];
        let minutes = match self.frequency {
            Frequency::Minutely => &all_minutes[..],
            _ => self.by_minute.as_deref().unwrap_or(&all_minutes),
        };
        let hours = match self.frequency {
            Frequency::Daily | Frequency::Weekly => self.by_hour.as_deref().unwrap_or(&[0]),
            _ => &[0],
        };
        let days = match self.frequency {
            Frequency::Weekly => self.by_day.as_deref().unwrap_or(&[0]),
            _ => &[0],
        };

        let mut candidates = Vec::with_capacity(
            days.len() * hours.len() * minutes.len() * self.by_second.len(),
        );
        for &day in days {
            for &hour in hours {
                for &minute in minutes {
                    for &second in &self.by_second {
                        candidates.push(
                            period_start
                                + i64::from(day) * DAY
                                + i64::from(hour) * HOUR
                                + i64::from(minute) * MINUTE
                                + i64::from(second),
                        );
                    }
                }
            }
        }

        candidates.sort_unstable();
        candidates
    }

    /// Applies the parts coarser than the frequency, which restrict instead of expanding
    fn limits(&self, candidate: i64) -> bool {
        let minute = (candidate.div_euclid(MINUTE).rem_euclid(60)) as u32;
        let hour = (candidate.div_euclid(HOUR).rem_euclid(24)) as u32;
        let day = ((candidate.div_euclid(DAY) + 3).rem_euclid(7)) as u32;

        let minute_ok = self.frequency != Frequency::Minutely
            || self.by_minute.as_ref().is_none_or(|m| m.contains(&minute));
        let hour_ok = matches!(self.frequency, Frequency::Daily | Frequency::Weekly)
            || self.by_hour.as_ref().is_none_or(|h| h.contains(&hour));
        let day_ok = self.frequency == Frequency::Weekly
            || self.by_day.as_ref().is_none_or(|d| d.contains(&day));

        minute_ok && hour_ok && day_ok
    }
}

impl Display for RecurrenceRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn invalid_value(part: &str, value: &str) -> ScheduleError {
    ScheduleError::InvalidValue {
        part: part.to_string(),
        value: value.to_string(),
    }
}

fn parse_list(part: &str, value: &str, max: u32) -> Result<Vec<u32>, ScheduleError> {
    let mut values = value
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<u32>()
                .ok()
                .filter(|&v| v <= max)
                .ok_or_else(|| invalid_value(part, v))
        })
        .collect::<Result<Vec<_>, _>>()?;
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

fn parse_days(value: &str) -> Result<Vec<u32>, ScheduleError> {
    let mut days = value
        .split(',')
        .map(|day| {
            let weekday = match day.trim().to_ascii_uppercase().as_str() {
                "MO" => Weekday::Mon,
                "TU" => Weekday::Tue,
                "WE" => Weekday::Wed,
                "TH" => Weekday::Thu,
                "FR" => Weekday::Fri,
                "SA" => Weekday::Sat,
                "SU" => Weekday::Sun,
                _ => return Err(invalid_value("BYDAY", day)),
            };
            Ok(weekday.num_days_from_monday())
        })
        .collect::<Result<Vec<_>, _>>()?;
    days.sort_unstable();
    days.dedup();
    Ok(days)
}

fn parse_timestamp(part: &str, value: &str) -> Result<DateTime<Utc>, ScheduleError> {
    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%SZ")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S"))
        .map_err(|_| invalid_value(part, value))?;
    Ok(naive.and_utc())
}
