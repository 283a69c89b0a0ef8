//! Wall-clock time for the scheduler
//!
//! Recurrence rules speak wall-clock time while tokio timers speak monotonic instants. A [`Clock`]
//! translates between the two. The simulated variant derives wall-clock time from tokio's clock,
//! so pausing and advancing tokio time in tests moves it too.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Debug)]
pub struct Clock {
    source: ClockSource,
}

#[derive(Clone, Debug)]
enum ClockSource {
    System,
    Simulated {
        anchor_instant: Instant,
        anchor_wall: DateTime<Utc>,
    },
}

impl Clock {
    pub fn system() -> Self {
        Self {
            source: ClockSource::System,
        }
    }

    /// A clock that reads `start` now and then follows tokio's (possibly paused) clock
    pub fn simulated(start: DateTime<Utc>) -> Self {
        Self {
            source: ClockSource::Simulated {
                anchor_instant: Instant::now(),
                anchor_wall: start,
            },
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        match &self.source {
            ClockSource::System => Utc::now(),
            ClockSource::Simulated {
                anchor_instant,
                anchor_wall,
            } => add(*anchor_wall, anchor_instant.elapsed()),
        }
    }

    /// The tokio instant at which `at` is reached, or now if it already passed
    pub fn instant_at(&self, at: DateTime<Utc>) -> Instant {
        match &self.source {
            ClockSource::System => Instant::now() + until(Utc::now(), at),
            ClockSource::Simulated {
                anchor_instant,
                anchor_wall,
            } => (*anchor_instant + until(*anchor_wall, at)).max(Instant::now()),
        }
    }
}

fn until(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or_default()
}

pub(crate) fn add(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
