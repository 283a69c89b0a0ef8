//! Values expressed the way `tc` expresses them: `50ms`, `2%`, `10mbit`

use crate::impairment::InvalidImpairment;
use serde::{Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

/// A probability expressed in percent, between 0 and 100 inclusive
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct Percentage(f64);

impl Percentage {
    pub fn new(percent: f64) -> Result<Self, InvalidImpairment> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(InvalidImpairment::PercentageOutOfRange(percent));
        }
        Ok(Self(percent))
    }

    pub fn percent(self) -> f64 {
        self.0
    }

    pub fn ratio(self) -> f64 {
        self.0 / 100.0
    }
}

impl Display for Percentage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

impl FromStr for Percentage {
    type Err = InvalidImpairment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let number = s.trim().trim_end_matches('%').trim();
        let percent = number
            .parse::<f64>()
            .map_err(|_| InvalidImpairment::Malformed(s.to_string()))?;
        Percentage::new(percent)
    }
}

impl Serialize for Percentage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Parses a time value with a unit suffix (`us`, `ms`, `s`), defaulting to milliseconds
pub fn parse_time(s: &str) -> Result<Duration, InvalidImpairment> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| InvalidImpairment::Malformed(s.to_string()))?;

    let nanos_per_unit = match unit.trim() {
        "us" | "usec" => 1e3,
        "" | "ms" | "msec" => 1e6,
        "s" | "sec" | "secs" => 1e9,
        _ => return Err(InvalidImpairment::Malformed(s.to_string())),
    };

    let nanos = (value * nanos_per_unit).round();
    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return Err(InvalidImpairment::Malformed(s.to_string()));
    }
    Ok(Duration::from_nanos(nanos as u64))
}

/// Parses a rate with a `tc` unit suffix (`bit`, `kbit`, `mbit`, `gbit`, `bps` for bytes)
pub fn parse_rate(s: &str) -> Result<u64, InvalidImpairment> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| InvalidImpairment::Malformed(s.to_string()))?;

    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "bit" => 1.0,
        "kbit" => 1e3,
        "mbit" => 1e6,
        "gbit" => 1e9,
        "bps" => 8.0,
        "kbps" => 8e3,
        "mbps" => 8e6,
        "gbps" => 8e9,
        _ => return Err(InvalidImpairment::Malformed(s.to_string())),
    };

    let bps = (value * multiplier).round();
    if bps < 1.0 || bps > u64::MAX as f64 {
        return Err(InvalidImpairment::ZeroRate);
    }
    Ok(bps as u64)
}

/// Parses a size in bytes with a `tc` unit suffix (`b`, `k`/`kb`, `m`/`mb`)
pub fn parse_size(s: &str) -> Result<u32, InvalidImpairment> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| InvalidImpairment::Malformed(s.to_string()))?;

    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "k" | "kb" => 1024.0,
        "m" | "mb" => 1024.0 * 1024.0,
        _ => return Err(InvalidImpairment::Malformed(s.to_string())),
    };

    let bytes = (value * multiplier).round();
    if bytes < 1.0 || bytes > f64::from(u32::MAX) {
        return Err(InvalidImpairment::Malformed(s.to_string()));
    }
    Ok(bytes as u32)
}

/// Formats a time the way `tc` accepts it
pub fn format_time(duration: Duration) -> String {
    let micros = duration.as_micros();
    if micros % 1000 == 0 {
        format!("{}ms", micros / 1000)
    } else {
        format!("{micros}us")
    }
}

/// Formats a rate in the largest `tc` unit that represents it exactly
pub fn format_rate(bps: u64) -> String {
    if bps % 1_000_000_000 == 0 {
        format!("{}gbit", bps / 1_000_000_000)
    } else if bps % 1_000_000 == 0 {
        format!("{}mbit", bps / 1_000_000)
    } else if bps % 1_000 == 0 {
        format!("{}kbit", bps / 1_000)
    } else {
        format!("{bps}bit")
    }
}
