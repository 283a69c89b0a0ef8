//! The scenario scheduler
//!
//! A single loop task owns every scenario, the timer heap and the applied impairment records.
//! [`Scheduler`] is a cheap handle that talks to the loop over a command channel and reads the
//! status snapshot the loop publishes after every command or timer batch.

mod event_loop;
pub mod snapshot;
mod timer;

use crate::applier::{ImpairmentApplier, RetryPolicy};
use crate::clock::Clock;
use crate::event::{self, EventReceiver};
use crate::scenario::{ScenarioDefinition, ScenarioError, ScenarioId, ScenarioState};
use crate::target::{ResolutionError, Target};
use crate::topology::{Endpoint, Topology};
use event_loop::{Command, SchedulerLoop};
use parking_lot::{Mutex, RwLock};
use snapshot::{AppliedImpairment, ScenarioStatus, StatusSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Maximum number of concurrent data-plane operations
    pub workers: usize,
    pub retry: RetryPolicy,
    pub event_buffer: usize,
    /// Activation timers processed later than this are recorded as missed occurrences instead of
    /// firing late. Keep it at or below the timing bound of activations; a larger grace trades
    /// punctuality for fewer missed windows when the loop is held up by slow data-plane calls.
    pub misfire_grace: Duration,
    pub max_idle_sleep: Duration,
    /// How often degraded endpoints are pushed to the data plane again
    pub reconcile_interval: Duration,
    pub command_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            retry: RetryPolicy::default(),
            event_buffer: 1024,
            misfire_grace: Duration::from_secs(1),
            max_idle_sleep: Duration::from_secs(30),
            reconcile_interval: Duration::from_secs(30),
            command_buffer: 64,
        }
    }
}

/// Handle to a running scheduler
pub struct Scheduler {
    commands: mpsc::Sender<Command>,
    snapshot: Arc<RwLock<Arc<StatusSnapshot>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawns the scheduling loop on the current tokio runtime, attached to `topology`
    pub fn start(
        topology: Topology,
        applier: Arc<dyn ImpairmentApplier>,
        clock: Clock,
        config: SchedulerConfig,
    ) -> (Self, EventReceiver) {
        let (events, receiver) = event::channel(config.event_buffer);
        let (commands, command_rx) = mpsc::channel(config.command_buffer.max(1));

        let scheduler_loop = SchedulerLoop::new(topology, applier, events, clock, config);
        let snapshot = scheduler_loop.snapshot_handle();
        let task = tokio::spawn(scheduler_loop.run(command_rx));

        let scheduler = Self {
            commands,
            snapshot,
            task: Mutex::new(Some(task)),
        };

        (scheduler, receiver)
    }

    /// Validates and registers a scenario, returning its initial state
    pub async fn create(&self, definition: ScenarioDefinition) -> Result<ScenarioState, ScenarioError> {
        self.request(|reply| Command::Create { definition, reply })
            .await
    }

    /// Replaces the definition of an existing scenario; on error the old definition stays
    pub async fn update(&self, definition: ScenarioDefinition) -> Result<ScenarioState, ScenarioError> {
        self.request(|reply| Command::Update { definition, reply })
            .await
    }

    /// Removes a scenario. Its endpoints are reconciled before this returns
    pub async fn delete(&self, id: &ScenarioId) -> Result<(), ScenarioError> {
        let id = id.clone();
        self.request(|reply| Command::Delete { id, reply }).await
    }

    /// Activates a transient scenario now, for its configured duration
    pub async fn trigger(&self, id: &ScenarioId) -> Result<ScenarioState, ScenarioError> {
        let id = id.clone();
        self.request(|reply| Command::Trigger { id, reply }).await
    }

    /// Attaches a strictly newer topology generation and returns the scenarios it cancelled
    pub async fn replace_topology(&self, topology: Topology) -> Result<Vec<ScenarioId>, ScenarioError> {
        self.request(|reply| Command::ReplaceTopology { topology, reply })
            .await
    }

    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn status(&self, id: &ScenarioId) -> Option<ScenarioStatus> {
        self.snapshot().scenarios.get(id).cloned()
    }

    /// The applied impairment of every endpoint `target` covers, `None` when nothing applies
    pub fn query_target(
        &self,
        target: &Target,
    ) -> Result<Vec<(Endpoint, Option<AppliedImpairment>)>, ResolutionError> {
        let snapshot = self.snapshot();
        let endpoints = target.resolve(&snapshot.topology)?;
        Ok(endpoints
            .into_iter()
            .map(|endpoint| {
                let applied = snapshot.applied.get(&endpoint).cloned();
                (endpoint, applied)
            })
            .collect())
    }

    /// Cancels every scenario, reverts every endpoint and waits for the loop to exit
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = done.await;
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                tracing::error!(%error, "scheduler loop panicked");
            }
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, ScenarioError>>) -> Command,
    ) -> Result<T, ScenarioError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ScenarioError::SchedulerClosed)?;
        response.await.map_err(|_| ScenarioError::SchedulerClosed)?
    }
}
