use crate::impairment::{ImpairmentKind, ImpairmentSpec};
use crate::metrics::MetricsSnapshot;
use crate::scenario::{ScenarioId, ScenarioKind, ScenarioState};
use crate::target::Target;
use crate::topology::{Endpoint, Topology};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_with::{DisplayFromStr, serde_as};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// What the scheduler knows about one endpoint
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AppliedImpairment {
    /// The conflict-resolved spec over the active scenarios touching the endpoint
    pub effective: ImpairmentSpec,
    /// The scenario that won each kind of `effective`
    pub winners: BTreeMap<ImpairmentKind, ScenarioId>,
    /// The last spec the data plane accepted
    pub enforced: ImpairmentSpec,
}

impl AppliedImpairment {
    pub fn contributors(&self) -> BTreeSet<ScenarioId> {
        self.winners.values().cloned().collect()
    }

    /// The data plane lags behind after exhausting retries
    pub fn is_degraded(&self) -> bool {
        self.effective != self.enforced
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScenarioStatus {
    pub kind: ScenarioKind,
    pub target: Target,
    pub priority: i32,
    pub description: Option<String>,
    pub state: ScenarioState,
    pub endpoints: Vec<Endpoint>,
}

impl ScenarioStatus {
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            ScenarioState::Scheduled { next } => Some(*next),
            ScenarioState::Active { until, .. } => *until,
            _ => None,
        }
    }
}

/// Consistent view of the scheduler, published after every command or timer batch
#[serde_as]
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub taken_at: DateTime<Utc>,
    #[serde(skip)]
    pub topology: Arc<Topology>,
    pub scenarios: BTreeMap<ScenarioId, ScenarioStatus>,
    #[serde_as(as = "BTreeMap<DisplayFromStr, _>")]
    pub applied: BTreeMap<Endpoint, AppliedImpairment>,
    pub metrics: MetricsSnapshot,
}

impl StatusSnapshot {
    pub fn active_scenarios(&self) -> impl Iterator<Item = (&ScenarioId, &ScenarioStatus)> {
        self.scenarios
            .iter()
            .filter(|(_, status)| status.state.is_active())
    }
}
