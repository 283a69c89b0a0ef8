use super::SchedulerConfig;
use super::snapshot::{AppliedImpairment, ScenarioStatus, StatusSnapshot};
use super::timer::{Timer, TimerAction, TimerHeap};
use crate::applier::{ApplyError, DispatchOutcome, Dispatcher, ImpairmentApplier, Operation};
use crate::clock::{self, Clock};
use crate::conflict::{self, ActiveSpec};
use crate::event::{Event, EventSender, Outcome, Severity, Transition};
use crate::impairment::ImpairmentSpec;
use crate::metrics::{ApplierCounters, MetricsSnapshot};
use crate::scenario::{Activation, ScenarioDefinition, ScenarioError, ScenarioId, ScenarioState};
use crate::schedule::ScheduleError;
use crate::topology::{Endpoint, Topology};
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::{FutureExt, select_biased};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Timers due this close to the wake-up instant are processed in the same batch
const TIMER_SLACK: Duration = Duration::from_millis(1);

type Reply<T> = oneshot::Sender<Result<T, ScenarioError>>;

pub(super) enum Command {
    Create {
        definition: ScenarioDefinition,
        reply: Reply<ScenarioState>,
    },
    Update {
        definition: ScenarioDefinition,
        reply: Reply<ScenarioState>,
    },
    Delete {
        id: ScenarioId,
        reply: Reply<()>,
    },
    Trigger {
        id: ScenarioId,
        reply: Reply<ScenarioState>,
    },
    ReplaceTopology {
        topology: Topology,
        reply: Reply<Vec<ScenarioId>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Wake {
    Timers,
    Command(Command),
    Shutdown(Option<oneshot::Sender<()>>),
}

struct ScenarioEntry {
    definition: ScenarioDefinition,
    state: ScenarioState,
    /// Endpoints of the target as of the last resolution
    endpoints: Vec<Endpoint>,
    /// Sequence number of the only timer this scenario still honors
    armed: Option<u64>,
    cancel: CancellationToken,
}

impl ScenarioEntry {
    fn status(&self) -> ScenarioStatus {
        ScenarioStatus {
            kind: self.definition.kind(),
            target: self.definition.target.clone(),
            priority: self.definition.priority,
            description: self.definition.description.clone(),
            state: self.state.clone(),
            endpoints: self.endpoints.clone(),
        }
    }

    fn event(&self, at: DateTime<Utc>, transition: Transition, message: impl Into<String>) -> Event {
        Event::new(at, transition, message).scenario(&self.definition.id, &self.definition.target)
    }

    /// Arms the activation timer for the first occurrence after `after`, resynchronizing to the
    /// next future occurrence when that one is already older than the misfire grace
    fn arm_next(&mut self, timers: &mut TimerHeap, after: DateTime<Utc>, now: DateTime<Utc>, grace: TimeDelta) {
        let Activation::Transient { recurrence, .. } = &self.definition.activation else {
            return;
        };

        let next = match recurrence.next_after(after) {
            Some(at) if now - at > grace => recurrence.next_after(now),
            next => next,
        };

        match next {
            Some(at) => {
                self.armed = Some(timers.push(at, self.definition.id.clone(), TimerAction::Activate));
                self.state = ScenarioState::Scheduled { next: at };
            }
            None => {
                self.armed = None;
                self.state = ScenarioState::Idle;
            }
        }
    }

    /// Marks the scenario as terminally cancelled and returns the endpoints it stops affecting
    fn cancel(&mut self, reason: String) -> Vec<Endpoint> {
        self.cancel.cancel();
        self.armed = None;
        let was_active = self.state.is_active();
        self.state = ScenarioState::Cancelled { reason };
        let endpoints = std::mem::take(&mut self.endpoints);
        if was_active { endpoints } else { Vec::new() }
    }
}

/// An event whose outcome depends on the reconciliation that follows it
struct PendingEvent {
    event: Event,
    endpoints: Option<Vec<Endpoint>>,
}

#[derive(Default)]
struct Batch {
    touched: BTreeSet<Endpoint>,
    events: Vec<PendingEvent>,
}

impl Batch {
    /// Records an event whose outcome is known upfront
    fn record(&mut self, event: Event) {
        self.events.push(PendingEvent {
            event,
            endpoints: None,
        });
    }

    /// Records an event whose outcome is that of reconciling `endpoints`
    fn record_for(&mut self, event: Event, endpoints: &[Endpoint]) {
        self.touched.extend(endpoints.iter().cloned());
        self.events.push(PendingEvent {
            event,
            endpoints: Some(endpoints.to_vec()),
        });
    }

    fn is_empty(&self) -> bool {
        self.touched.is_empty() && self.events.is_empty()
    }
}

#[derive(Default)]
struct ReconcileReport {
    changed: BTreeSet<Endpoint>,
    failed: BTreeMap<Endpoint, ApplyError>,
}

impl ReconcileReport {
    fn outcome_for(&self, endpoints: &[Endpoint]) -> Outcome {
        if let Some(error) = endpoints.iter().find_map(|endpoint| self.failed.get(endpoint)) {
            return Outcome::Failed {
                reason: error.to_string(),
            };
        }

        let changed = endpoints
            .iter()
            .filter(|endpoint| self.changed.contains(*endpoint))
            .count();
        if changed == 0 {
            Outcome::Unchanged
        } else {
            Outcome::Applied { endpoints: changed }
        }
    }
}

pub(super) struct SchedulerLoop {
    topology: Arc<Topology>,
    scenarios: BTreeMap<ScenarioId, ScenarioEntry>,
    timers: TimerHeap,
    applied: BTreeMap<Endpoint, AppliedImpairment>,
    dispatcher: Dispatcher,
    counters: Arc<ApplierCounters>,
    events: EventSender,
    clock: Clock,
    config: SchedulerConfig,
    misfire_grace: TimeDelta,
    next_reconcile: DateTime<Utc>,
    shutdown: CancellationToken,
    snapshot: Arc<RwLock<Arc<StatusSnapshot>>>,
}

impl SchedulerLoop {
    pub(super) fn new(
        topology: Topology,
        applier: Arc<dyn ImpairmentApplier>,
        events: EventSender,
        clock: Clock,
        config: SchedulerConfig,
    ) -> Self {
        let counters = Arc::new(ApplierCounters::default());
        let dispatcher = Dispatcher::new(applier, config.workers, config.retry.clone(), counters.clone());
        let now = clock.now();
        let topology = Arc::new(topology);

        let snapshot = Arc::new(RwLock::new(Arc::new(StatusSnapshot {
            taken_at: now,
            topology: topology.clone(),
            scenarios: BTreeMap::new(),
            applied: BTreeMap::new(),
            metrics: MetricsSnapshot::default(),
        })));

        Self {
            topology,
            scenarios: BTreeMap::new(),
            timers: TimerHeap::default(),
            applied: BTreeMap::new(),
            dispatcher,
            counters,
            events,
            misfire_grace: TimeDelta::from_std(config.misfire_grace).unwrap_or(TimeDelta::MAX),
            next_reconcile: clock::add(now, config.reconcile_interval),
            clock,
            config,
            shutdown: CancellationToken::new(),
            snapshot,
        }
    }

    pub(super) fn snapshot_handle(&self) -> Arc<RwLock<Arc<StatusSnapshot>>> {
        self.snapshot.clone()
    }

    pub(super) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!(
            topology = self.topology.name(),
            generation = %self.topology.generation(),
            "scheduler started"
        );

        let shutdown = self.shutdown.clone();
        loop {
            let deadline = self.clock.instant_at(self.next_wake());
            let wake = select_biased! {
                _ = shutdown.cancelled().fuse() => Wake::Shutdown(None),
                command = commands.recv().fuse() => match command {
                    Some(Command::Shutdown { reply }) => Wake::Shutdown(Some(reply)),
                    Some(command) => Wake::Command(command),
                    None => Wake::Shutdown(None),
                },
                _ = tokio::time::sleep_until(deadline).fuse() => Wake::Timers,
            };

            match wake {
                Wake::Timers => self.on_timers().await,
                Wake::Command(command) => self.on_command(command).await,
                Wake::Shutdown(reply) => {
                    self.teardown().await;
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                    return;
                }
            }

            self.publish();
        }
    }

    fn next_wake(&self) -> DateTime<Utc> {
        let idle = clock::add(self.clock.now(), self.config.max_idle_sleep);
        [self.timers.next_deadline(), Some(self.next_reconcile)]
            .into_iter()
            .flatten()
            .fold(idle, |earliest, at| earliest.min(at))
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Create { definition, reply } => {
                let result = self.create(definition).await;
                let _ = reply.send(result);
            }
            Command::Update { definition, reply } => {
                let result = self.update(definition).await;
                let _ = reply.send(result);
            }
            Command::Delete { id, reply } => {
                let result = self.delete(&id).await;
                let _ = reply.send(result);
            }
            Command::Trigger { id, reply } => {
                let result = self.trigger(&id).await;
                let _ = reply.send(result);
            }
            Command::ReplaceTopology { topology, reply } => {
                let result = self.replace_topology(topology).await;
                let _ = reply.send(result);
            }
            // Handled by the select in `run`
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Checks a definition against the current topology and builds its entry, without arming it
    fn prepare(&self, definition: ScenarioDefinition) -> Result<ScenarioEntry, ScenarioError> {
        let endpoints = definition.validate_against(&self.topology)?;
        if let Activation::Transient { recurrence, .. } = &definition.activation {
            if recurrence.next_after(self.clock.now()).is_none() {
                return Err(ScheduleError::NeverFires(recurrence.to_string()).into());
            }
        }

        Ok(ScenarioEntry {
            definition,
            state: ScenarioState::Idle,
            endpoints,
            armed: None,
            cancel: self.shutdown.child_token(),
        })
    }

    /// Starts a prepared entry: persistent scenarios activate, transient ones wait for their rule
    fn install(&mut self, mut entry: ScenarioEntry, transition: Transition, batch: &mut Batch) -> ScenarioState {
        let now = self.clock.now();
        match entry.definition.activation {
            Activation::Persistent => {
                entry.state = ScenarioState::Active {
                    since: now,
                    until: None,
                };
                info!(scenario = %entry.definition.id, "persistent scenario active");
                let event = entry.event(now, transition, format!("active on {} endpoint(s)", entry.endpoints.len()));
                batch.record_for(event, &entry.endpoints);
            }
            Activation::Transient { .. } => {
                entry.arm_next(&mut self.timers, now, now, self.misfire_grace);
                let message = match &entry.state {
                    ScenarioState::Scheduled { next } => format!("next activation at {next}"),
                    _ => "no further activation".to_string(),
                };
                info!(scenario = %entry.definition.id, "{message}");
                batch.record(entry.event(now, transition, message));
            }
        }

        let state = entry.state.clone();
        self.scenarios.insert(entry.definition.id.clone(), entry);
        state
    }

    async fn create(&mut self, definition: ScenarioDefinition) -> Result<ScenarioState, ScenarioError> {
        if self.scenarios.contains_key(&definition.id) {
            return Err(ScenarioError::DuplicateScenario(definition.id));
        }

        let entry = self.prepare(definition)?;
        let mut batch = Batch::default();
        let state = self.install(entry, Transition::Created, &mut batch);
        self.commit(batch).await;
        Ok(state)
    }

    async fn update(&mut self, definition: ScenarioDefinition) -> Result<ScenarioState, ScenarioError> {
        if !self.scenarios.contains_key(&definition.id) {
            return Err(ScenarioError::UnknownScenario(definition.id));
        }

        let entry = self.prepare(definition)?;
        let mut batch = Batch::default();
        if let Some(previous) = self.remove(&entry.definition.id) {
            batch.touched.extend(previous);
        }

        let state = self.install(entry, Transition::Updated, &mut batch);
        self.commit(batch).await;
        Ok(state)
    }

    async fn delete(&mut self, id: &ScenarioId) -> Result<(), ScenarioError> {
        let target = self
            .scenarios
            .get(id)
            .map(|entry| entry.definition.target.clone())
            .ok_or_else(|| ScenarioError::UnknownScenario(id.clone()))?;

        let mut batch = Batch::default();
        let endpoints = self.remove(id).unwrap_or_default();
        let event = Event::new(self.clock.now(), Transition::Deleted, "scenario deleted").scenario(id, &target);
        batch.record_for(event, &endpoints);
        info!(scenario = %id, "scenario deleted");

        self.commit(batch).await;
        Ok(())
    }

    /// Drops a scenario and its timers, returning the endpoints it was affecting
    fn remove(&mut self, id: &ScenarioId) -> Option<Vec<Endpoint>> {
        let mut entry = self.scenarios.remove(id)?;
        self.timers.retain(|timer| &timer.scenario != id);
        Some(entry.cancel("removed".to_string()))
    }

    async fn trigger(&mut self, id: &ScenarioId) -> Result<ScenarioState, ScenarioError> {
        let now = self.clock.now();
        let entry = self
            .scenarios
            .get_mut(id)
            .ok_or_else(|| ScenarioError::UnknownScenario(id.clone()))?;

        let Activation::Transient { duration, .. } = entry.definition.activation else {
            return Err(ScenarioError::NotTransient(id.clone()));
        };
        match entry.state {
            ScenarioState::Active { .. } => return Err(ScenarioError::AlreadyActive(id.clone())),
            ScenarioState::Cancelled { .. } => return Err(ScenarioError::Cancelled(id.clone())),
            _ => {}
        }

        entry.endpoints = entry.definition.resolve_endpoints(&self.topology)?;

        let until = clock::add(now, duration);
        entry.state = ScenarioState::Active {
            since: now,
            until: Some(until),
        };
        entry.armed = Some(self.timers.push(until, id.clone(), TimerAction::Deactivate));
        info!(scenario = %id, %until, "scenario triggered");

        let mut batch = Batch::default();
        let event = entry.event(now, Transition::Activated, format!("triggered manually until {until}"));
        batch.record_for(event, &entry.endpoints);
        let state = entry.state.clone();

        self.commit(batch).await;
        Ok(state)
    }

    async fn replace_topology(&mut self, topology: Topology) -> Result<Vec<ScenarioId>, ScenarioError> {
        let current = self.topology.generation();
        if topology.generation() <= current {
            return Err(ScenarioError::StaleGeneration {
                requested: topology.generation(),
                current,
            });
        }

        let now = self.clock.now();
        let topology = Arc::new(topology);
        let mut batch = Batch::default();
        batch.touched.extend(self.applied.keys().cloned());

        let mut cancelled = Vec::new();
        for (id, entry) in &mut self.scenarios {
            if matches!(entry.state, ScenarioState::Cancelled { .. }) {
                continue;
            }

            match entry.definition.resolve_endpoints(&topology) {
                Ok(endpoints) => {
                    if entry.state.is_active() {
                        batch.touched.extend(endpoints.iter().cloned());
                    }
                    entry.endpoints = endpoints;
                }
                Err(error) => {
                    warn!(scenario = %id, %error, "target no longer resolves, cancelling scenario");
                    let reason = error.to_string();
                    let event = entry
                        .event(now, Transition::Cancelled, reason.clone())
                        .severity(Severity::Warning);
                    let endpoints = entry.cancel(reason);
                    batch.record_for(event, &endpoints);
                    cancelled.push(id.clone());
                }
            }
        }

        info!(
            from = %current,
            to = %topology.generation(),
            cancelled = cancelled.len(),
            "topology replaced"
        );
        batch.record(Event::new(
            now,
            Transition::TopologyReplaced,
            format!("topology {current} replaced by {}", topology.generation()),
        ));

        self.dispatcher.topology_changed(&topology);
        self.topology = topology;
        self.commit(batch).await;
        Ok(cancelled)
    }

    async fn on_timers(&mut self) {
        let now = self.clock.now();
        let horizon = clock::add(now, TIMER_SLACK);
        let mut batch = Batch::default();

        // Timers armed while handling the batch are picked up if they are due too
        while let Some(timer) = self.timers.pop_due(horizon) {
            self.fire(timer, now, &mut batch);
        }

        if now >= self.next_reconcile {
            self.next_reconcile = clock::add(now, self.config.reconcile_interval);
            let degraded: Vec<_> = self
                .applied
                .iter()
                .filter(|(_, applied)| applied.is_degraded())
                .map(|(endpoint, _)| endpoint.clone())
                .collect();
            if !degraded.is_empty() {
                debug!(endpoints = degraded.len(), "reconciling degraded endpoints");
                batch.touched.extend(degraded);
            }
        }

        if !batch.is_empty() {
            debug!(pending_timers = self.timers.len(), "processing timer batch");
            self.commit(batch).await;
        }
    }

    fn fire(&mut self, timer: Timer, now: DateTime<Utc>, batch: &mut Batch) {
        let Some(entry) = self.scenarios.get_mut(&timer.scenario) else {
            return;
        };
        if entry.cancel.is_cancelled() || entry.armed != Some(timer.seq) {
            return;
        }
        entry.armed = None;

        let Activation::Transient { duration, .. } = entry.definition.activation else {
            return;
        };

        match timer.action {
            TimerAction::Activate => {
                let until = clock::add(timer.at, duration);
                if now - timer.at > self.misfire_grace || until <= now {
                    warn!(scenario = %timer.scenario, occurrence = %timer.at, "missed occurrence");
                    let event = entry
                        .event(now, Transition::MissedOccurrence, format!("missed occurrence at {}", timer.at))
                        .severity(Severity::Warning);
                    batch.record(event);
                    entry.arm_next(&mut self.timers, now, now, self.misfire_grace);
                    return;
                }

                match entry.definition.resolve_endpoints(&self.topology) {
                    Ok(endpoints) => entry.endpoints = endpoints,
                    Err(error) => {
                        warn!(scenario = %timer.scenario, %error, "target no longer resolves, cancelling scenario");
                        let reason = error.to_string();
                        let event = entry
                            .event(now, Transition::Cancelled, reason.clone())
                            .severity(Severity::Warning);
                        entry.cancel(reason);
                        batch.record(event);
                        return;
                    }
                }

                entry.state = ScenarioState::Active {
                    since: timer.at,
                    until: Some(until),
                };
                entry.armed = Some(self.timers.push(until, timer.scenario.clone(), TimerAction::Deactivate));
                info!(scenario = %timer.scenario, %until, "scenario activated");
                let event = entry.event(now, Transition::Activated, format!("active until {until}"));
                batch.record_for(event, &entry.endpoints);
            }
            TimerAction::Deactivate => {
                let endpoints = entry.endpoints.clone();
                // An occurrence that starts exactly when this window ends still counts
                let after = timer.at - TimeDelta::nanoseconds(1);
                entry.arm_next(&mut self.timers, after, now, self.misfire_grace);
                info!(scenario = %timer.scenario, "scenario deactivated");
                let event = entry.event(now, Transition::Deactivated, "window ended");
                batch.record_for(event, &endpoints);
            }
        }
    }

    /// Reconciles the touched endpoints, then records the batch's events with their outcomes
    async fn commit(&mut self, batch: Batch) {
        let report = self.reconcile(&batch.touched).await;
        for pending in batch.events {
            let event = match pending.endpoints {
                Some(endpoints) => pending.event.outcome(report.outcome_for(&endpoints)),
                None => pending.event,
            };
            self.events.record(event);
        }
    }

    async fn reconcile(&mut self, touched: &BTreeSet<Endpoint>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut jobs = Vec::new();

        for endpoint in touched {
            if !self.topology.contains_endpoint(endpoint) {
                if self.applied.remove(endpoint).is_some() {
                    debug!(%endpoint, "endpoint left the topology");
                }
                continue;
            }

            let resolution = {
                let active: Vec<_> = self
                    .scenarios
                    .values()
                    .filter(|entry| entry.state.is_active() && entry.endpoints.contains(endpoint))
                    .map(|entry| ActiveSpec {
                        priority: entry.definition.priority,
                        spec: &entry.definition.impairments,
                        scenario: &entry.definition.id,
                    })
                    .collect();
                conflict::resolve_with_provenance(endpoint, &active)
            };

            let applied = self.applied.entry(endpoint.clone()).or_default();
            applied.effective = resolution.spec;
            applied.winners = resolution.winners;

            if !applied.is_degraded() {
                if applied.effective.is_none() {
                    self.applied.remove(endpoint);
                }
                continue;
            }

            let operation = if applied.effective.is_none() {
                Operation::Revert
            } else {
                Operation::Apply(applied.effective.clone())
            };
            jobs.push((endpoint.clone(), operation));
        }

        if jobs.is_empty() {
            return report;
        }

        for outcome in self.dispatcher.dispatch_all(jobs).await {
            self.record_outcome(outcome, &mut report);
        }

        report
    }

    fn record_outcome(&mut self, outcome: DispatchOutcome, report: &mut ReconcileReport) {
        let DispatchOutcome {
            endpoint,
            operation,
            result,
        } = outcome;

        match result {
            Ok(()) => {
                let enforced = match operation {
                    Operation::Apply(spec) => spec,
                    Operation::Revert => ImpairmentSpec::none(),
                };
                debug!(%endpoint, %enforced, "data plane updated");

                let clear = match self.applied.get_mut(&endpoint) {
                    Some(applied) => {
                        applied.enforced = enforced;
                        applied.effective.is_none() && applied.enforced.is_none()
                    }
                    None => false,
                };
                if clear {
                    self.applied.remove(&endpoint);
                }
                report.changed.insert(endpoint);
            }
            Err(error) => {
                let action = match operation {
                    Operation::Apply(_) => "apply",
                    Operation::Revert => "revert",
                };
                error!(%endpoint, %error, "{action} failed, keeping the last applied impairments");
                let event = Event::new(
                    self.clock.now(),
                    Transition::Failed,
                    format!("{action} on {endpoint} failed"),
                )
                .endpoint(&endpoint)
                .outcome(Outcome::Failed {
                    reason: error.to_string(),
                });
                self.events.record(event);
                report.failed.insert(endpoint, error);
            }
        }
    }

    async fn teardown(&mut self) {
        info!(scenarios = self.scenarios.len(), "scheduler shutting down");
        self.shutdown.cancel();

        let now = self.clock.now();
        let mut batch = Batch::default();
        batch.touched.extend(self.applied.keys().cloned());

        for entry in self.scenarios.values_mut() {
            if matches!(entry.state, ScenarioState::Cancelled { .. }) {
                continue;
            }
            let event = entry.event(now, Transition::Cancelled, "scheduler shut down");
            let endpoints = entry.cancel("scheduler shut down".to_string());
            batch.record_for(event, &endpoints);
        }

        self.timers.retain(|_| false);
        self.commit(batch).await;
        self.dispatcher.close();
        self.publish();
        info!("scheduler stopped");
    }

    fn metrics(&self) -> MetricsSnapshot {
        let mut applied_by_target = BTreeMap::new();
        for applied in self.applied.values().filter(|applied| !applied.effective.is_none()) {
            for scenario in applied.contributors() {
                if let Some(entry) = self.scenarios.get(&scenario) {
                    *applied_by_target
                        .entry(entry.definition.target.to_string())
                        .or_default() += 1;
                }
            }
        }

        MetricsSnapshot {
            scenarios: self.scenarios.len(),
            active_scenarios: self
                .scenarios
                .values()
                .filter(|entry| entry.state.is_active())
                .count(),
            applied_impairments: self
                .applied
                .values()
                .filter(|applied| !applied.effective.is_none())
                .count(),
            applied_by_target,
            degraded_endpoints: self
                .applied
                .values()
                .filter(|applied| applied.is_degraded())
                .count(),
            apply_calls: ApplierCounters::read(&self.counters.apply_calls),
            revert_calls: ApplierCounters::read(&self.counters.revert_calls),
            applier_failures: ApplierCounters::read(&self.counters.failures),
            applier_retries: ApplierCounters::read(&self.counters.retries),
            events_dropped: self.events.dropped(),
        }
    }

    fn publish(&self) {
        let snapshot = StatusSnapshot {
            taken_at: self.clock.now(),
            topology: self.topology.clone(),
            scenarios: self
                .scenarios
                .iter()
                .map(|(id, entry)| (id.clone(), entry.status()))
                .collect(),
            applied: self.applied.clone(),
            metrics: self.metrics(),
        };

        *self.snapshot.write() = Arc::new(snapshot);
    }
}
