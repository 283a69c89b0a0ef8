//! Append-only record of scheduling decisions
//!
//! Events travel over a bounded channel. Recording never blocks the scheduler: when the buffer is
//! full the event is dropped and counted.

use crate::scenario::ScenarioId;
use crate::target::Target;
use crate::topology::Endpoint;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Created,
    Updated,
    Deleted,
    Activated,
    Deactivated,
    Failed,
    Cancelled,
    MissedOccurrence,
    TopologyReplaced,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Outcome {
    /// The data plane was updated on `endpoints` endpoints
    Applied { endpoints: usize },
    /// Effective impairments did not change
    Unchanged,
    Failed { reason: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub scenario: Option<ScenarioId>,
    pub target: Option<Target>,
    pub endpoint: Option<Endpoint>,
    pub transition: Transition,
    pub outcome: Outcome,
    pub severity: Severity,
    pub message: String,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, transition: Transition, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            scenario: None,
            target: None,
            endpoint: None,
            transition,
            outcome: Outcome::Unchanged,
            severity: Severity::Info,
            message: message.into(),
        }
    }

    pub fn scenario(mut self, scenario: &ScenarioId, target: &Target) -> Self {
        self.scenario = Some(scenario.clone());
        self.target = Some(target.clone());
        self
    }

    pub fn endpoint(mut self, endpoint: &Endpoint) -> Self {
        self.endpoint = Some(endpoint.clone());
        self
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        if matches!(outcome, Outcome::Failed { .. }) {
            self.severity = self.severity.max(Severity::Error);
        }
        self.outcome = outcome;
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EventSender {
            tx,
            dropped: dropped.clone(),
        },
        EventReceiver { rx, dropped },
    )
}

#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    pub fn record(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    transition = ?event.transition,
                    dropped,
                    "event log buffer full, dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventReceiver {
    /// Waits for the next event, `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Events already buffered, without waiting
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_full_buffer_drops_and_counts() {
        let (sender, mut receiver) = channel(2);
        for _ in 0..5 {
            sender.record(Event::new(Utc::now(), Transition::Activated, "activated"));
        }

        assert_eq!(receiver.drain().len(), 2);
        assert_eq!(sender.dropped(), 3);
        assert_eq!(receiver.dropped(), 3);
    }

    #[test]
    fn test_failed_outcome_raises_severity() {
        let event = Event::new(Utc::now(), Transition::Failed, "apply failed").outcome(
            Outcome::Failed {
                reason: "permission denied".to_string(),
            },
        );
        assert_eq!(event.severity, Severity::Error);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["transition"], "failed");
        assert_eq!(json["outcome"]["status"], "failed");
    }
}
