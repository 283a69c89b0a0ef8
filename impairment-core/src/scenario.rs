use crate::impairment::{ImpairmentSpec, InvalidImpairment};
use crate::schedule::{Recurrence, ScheduleError};
use crate::target::{InvalidTarget, ResolutionError, Target};
use crate::topology::spec::Capability;
use crate::topology::{Endpoint, Generation, NodeId, Topology};
use crate::util::string_id;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

string_id!(ScenarioId);

pub const DEFAULT_PRIORITY: i32 = 100;
pub const DEFAULT_TRANSIENT_DURATION: Duration = Duration::from_secs(15 * 60);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Activation {
    /// Active from creation until deletion
    Persistent,
    /// Active for `duration` starting at every occurrence of `recurrence`
    Transient {
        recurrence: Recurrence,
        duration: Duration,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    Persistent,
    Transient,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScenarioDefinition {
    pub id: ScenarioId,
    pub activation: Activation,
    pub target: Target,
    pub impairments: ImpairmentSpec,
    /// Higher wins
    pub priority: i32,
    pub description: Option<String>,
    /// The topology generation the definition was written against, if it cares
    pub generation: Option<Generation>,
}

impl ScenarioDefinition {
    pub fn persistent(id: impl Into<ScenarioId>, target: Target, impairments: ImpairmentSpec) -> Self {
        Self {
            id: id.into(),
            activation: Activation::Persistent,
            target,
            impairments,
            priority: DEFAULT_PRIORITY,
            description: None,
            generation: None,
        }
    }

    pub fn transient(
        id: impl Into<ScenarioId>,
        target: Target,
        impairments: ImpairmentSpec,
        recurrence: Recurrence,
        duration: Duration,
    ) -> Result<Self, ScheduleError> {
        if duration.is_zero() {
            return Err(ScheduleError::ZeroDuration);
        }

        Ok(Self {
            id: id.into(),
            activation: Activation::Transient {
                recurrence,
                duration,
            },
            target,
            impairments,
            priority: DEFAULT_PRIORITY,
            description: None,
            generation: None,
        })
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn for_generation(mut self, generation: Generation) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn kind(&self) -> ScenarioKind {
        match self.activation {
            Activation::Persistent => ScenarioKind::Persistent,
            Activation::Transient { .. } => ScenarioKind::Transient,
        }
    }

    /// Checks the definition against a topology and returns the endpoints it affects
    pub fn validate_against(&self, topology: &Topology) -> Result<Vec<Endpoint>, ScenarioError> {
        if let Some(generation) = self.generation.filter(|&g| g != topology.generation()) {
            return Err(ScenarioError::StaleGeneration {
                requested: generation,
                current: topology.generation(),
            });
        }

        self.resolve_endpoints(topology)
    }

    /// Resolves the target and checks routing capabilities, ignoring the pinned generation
    pub fn resolve_endpoints(&self, topology: &Topology) -> Result<Vec<Endpoint>, ScenarioError> {
        let endpoints = self.target.resolve(topology)?;
        if let Some(capability) = self
            .impairments
            .routing_event()
            .and_then(|event| event.required_capability())
        {
            for endpoint in &endpoints {
                let has_capability = topology
                    .node(&endpoint.node)
                    .is_some_and(|node| node.has_capability(capability));
                if !has_capability {
                    return Err(ScenarioError::MissingCapability {
                        node: endpoint.node.clone(),
                        capability,
                    });
                }
            }
        }

        Ok(endpoints)
    }
}

/// A transient scenario cycles `Scheduled -> Active -> Scheduled`: once a window ends the scenario
/// is idle until its next occurrence, which `Scheduled` carries. `Idle` only remains for a rule
/// with no occurrence left, so a scenario in that state never activates again on its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ScenarioState {
    /// Idle between windows, waiting for the next occurrence
    Scheduled { next: DateTime<Utc> },
    /// Contributing to the effective impairments of its endpoints
    Active {
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    },
    /// The recurrence rule is exhausted; a manual trigger can still activate it
    Idle,
    /// Terminal, the target no longer resolves
    Cancelled { reason: String },
}

impl ScenarioState {
    pub fn is_active(&self) -> bool {
        matches!(self, ScenarioState::Active { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScenarioError {
    #[error("unknown scenario `{0}`")]
    UnknownScenario(ScenarioId),
    #[error("scenario `{0}` already exists")]
    DuplicateScenario(ScenarioId),
    #[error("stale topology generation {requested}, current is {current}")]
    StaleGeneration {
        requested: Generation,
        current: Generation,
    },
    #[error("scenario `{0}` is persistent and cannot be triggered")]
    NotTransient(ScenarioId),
    #[error("scenario `{0}` is already active")]
    AlreadyActive(ScenarioId),
    #[error("node `{node}` does not run {capability}")]
    MissingCapability {
        node: NodeId,
        capability: Capability,
    },
    #[error("scenario `{0}` was cancelled")]
    Cancelled(ScenarioId),
    #[error("the scheduler is shut down")]
    SchedulerClosed,
    #[error(transparent)]
    InvalidTarget(#[from] InvalidTarget),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    InvalidImpairment(#[from] InvalidImpairment),
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::impairment::Impairment;
    use crate::impairment::routing::RoutingEvent;
    use crate::test_util::default_topology;

    #[test]
    fn test_validate_rejects_stale_generation() {
        let topology = default_topology().generation(Generation(3)).call();
        let scenario =
            ScenarioDefinition::persistent("s", Target::node("r1"), ImpairmentSpec::none())
                .for_generation(Generation(2));

        assert_eq!(
            scenario.validate_against(&topology).unwrap_err(),
            ScenarioError::StaleGeneration {
                requested: Generation(2),
                current: Generation(3)
            }
        );
    }

    #[test]
    fn test_validate_checks_routing_capabilities() {
        let topology = default_topology().call();
        let ospf_cost = ImpairmentSpec::new([Impairment::RoutingEvent(RoutingEvent::OspfCost {
            cost: 500,
        })])
        .unwrap();

        let on_router =
            ScenarioDefinition::persistent("ospf", Target::node("r1"), ospf_cost.clone());
        assert_eq!(on_router.validate_against(&topology).unwrap().len(), 2);

        let on_link = ScenarioDefinition::persistent(
            "ospf-link",
            "link:h1->r1".parse().unwrap(),
            ospf_cost,
        );
        assert!(matches!(
            on_link.validate_against(&topology).unwrap_err(),
            ScenarioError::MissingCapability { node, capability: Capability::Ospf } if node.as_str() == "h1"
        ));
    }

    #[test]
    fn test_transient_requires_positive_duration() {
        let result = ScenarioDefinition::transient(
            "t",
            Target::node("r1"),
            ImpairmentSpec::none(),
            "FREQ=DAILY".parse().unwrap(),
            Duration::ZERO,
        );
        assert_eq!(result.unwrap_err(), ScheduleError::ZeroDuration);
    }
}
