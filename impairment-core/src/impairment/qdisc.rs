use crate::impairment::InvalidImpairment;
use crate::impairment::units::{format_rate, format_time};
use serde::Serialize;
use serde_with::{DurationMilliSeconds, serde_as};
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Queueing discipline installed below (or instead of) the netem qdisc
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum QueueDiscipline {
    /// Token bucket filter
    Tbf {
        rate_bps: u64,
        burst_bytes: u32,
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        latency: Duration,
    },
    /// Hierarchical token bucket with a single default class
    Htb {
        rate_bps: u64,
        ceil_bps: Option<u64>,
        burst_bytes: Option<u32>,
    },
    FqCodel {
        limit_packets: Option<u32>,
    },
    Pfifo {
        limit_packets: Option<u32>,
    },
}

impl QueueDiscipline {
    pub fn validate(&self) -> Result<(), InvalidImpairment> {
        match *self {
            QueueDiscipline::Tbf {
                rate_bps,
                burst_bytes,
                latency,
            } => {
                if rate_bps == 0 {
                    return Err(InvalidImpairment::ZeroRate);
                }
                if burst_bytes == 0 {
                    return Err(InvalidImpairment::InvalidQdisc(
                        "tbf burst must be positive".to_string(),
                    ));
                }
                if latency.is_zero() {
                    return Err(InvalidImpairment::InvalidQdisc(
                        "tbf latency must be positive".to_string(),
                    ));
                }
            }
            QueueDiscipline::Htb {
                rate_bps, ceil_bps, ..
            } => {
                if rate_bps == 0 {
                    return Err(InvalidImpairment::ZeroRate);
                }
                if ceil_bps.is_some_and(|ceil| ceil < rate_bps) {
                    return Err(InvalidImpairment::InvalidQdisc(
                        "htb ceil must not be lower than its rate".to_string(),
                    ));
                }
            }
            QueueDiscipline::FqCodel { limit_packets } | QueueDiscipline::Pfifo { limit_packets } => {
                if limit_packets == Some(0) {
                    return Err(InvalidImpairment::InvalidQdisc(
                        "queue limit must be positive".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueueDiscipline::Tbf { .. } => "tbf",
            QueueDiscipline::Htb { .. } => "htb",
            QueueDiscipline::FqCodel { .. } => "fq_codel",
            QueueDiscipline::Pfifo { .. } => "pfifo",
        }
    }
}

impl Display for QueueDiscipline {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueDiscipline::Tbf {
                rate_bps,
                burst_bytes,
                latency,
            } => write!(
                f,
                "tbf rate {} burst {burst_bytes} latency {}",
                format_rate(*rate_bps),
                format_time(*latency)
            ),
            QueueDiscipline::Htb {
                rate_bps, ceil_bps, ..
            } => {
                write!(f, "htb rate {}", format_rate(*rate_bps))?;
                if let Some(ceil) = ceil_bps {
                    write!(f, " ceil {}", format_rate(*ceil))?;
                }
                Ok(())
            }
            QueueDiscipline::FqCodel { limit_packets } | QueueDiscipline::Pfifo { limit_packets } => {
                f.write_str(self.name())?;
                if let Some(limit) = limit_packets {
                    write!(f, " limit {limit}")?;
                }
                Ok(())
            }
        }
    }
}
