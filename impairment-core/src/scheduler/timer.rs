use crate::scenario::ScenarioId;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum TimerAction {
    Activate,
    Deactivate,
}

#[derive(Clone, Debug)]
pub(super) struct Timer {
    pub(super) at: DateTime<Utc>,
    /// Identifies the timer; a scenario only honors the last one it armed
    pub(super) seq: u64,
    pub(super) scenario: ScenarioId,
    pub(super) action: TimerAction,
}

impl Eq for Timer {}

impl PartialEq<Self> for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl PartialOrd<Self> for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // Reversed, so the max-heap pops the earliest timer first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
pub(super) struct TimerHeap {
    timers: BinaryHeap<Timer>,
    next_seq: u64,
}

impl TimerHeap {
    /// Arms a timer and returns its sequence number
    pub(super) fn push(&mut self, at: DateTime<Utc>, scenario: ScenarioId, action: TimerAction) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.timers.push(Timer {
            at,
            seq,
            scenario,
            action,
        });
        seq
    }

    pub(super) fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.peek().map(|timer| timer.at)
    }

    /// Pops the earliest timer if it is due at `now`
    pub(super) fn pop_due(&mut self, now: DateTime<Utc>) -> Option<Timer> {
        if self.timers.peek()?.at <= now {
            self.timers.pop()
        } else {
            None
        }
    }

    pub(super) fn len(&self) -> usize {
        self.timers.len()
    }

    /// Drops timers nobody will honor, keeping the heap from growing with stale entries
    pub(super) fn retain(&mut self, mut keep: impl FnMut(&Timer) -> bool) {
        self.timers.retain(|timer| keep(timer));
    }
}
