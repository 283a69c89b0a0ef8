//! Per-endpoint conflict resolution between overlapping scenarios
//!
//! Within a kind the highest priority wins outright, ties go to the lexicographically smallest
//! scenario id. Values of the same kind are never blended.

use crate::impairment::{ImpairmentKind, ImpairmentSpec};
use crate::scenario::ScenarioId;
use crate::topology::Endpoint;
use std::collections::{BTreeMap, BTreeSet};

/// A spec contributed by an active scenario
#[derive(Clone, Copy, Debug)]
pub struct ActiveSpec<'a> {
    pub priority: i32,
    pub spec: &'a ImpairmentSpec,
    pub scenario: &'a ScenarioId,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resolution {
    pub spec: ImpairmentSpec,
    /// The scenario that won each kind
    pub winners: BTreeMap<ImpairmentKind, ScenarioId>,
}

impl Resolution {
    pub fn contributors(&self) -> BTreeSet<ScenarioId> {
        self.winners.values().cloned().collect()
    }
}

/// Computes the effective spec of an endpoint
pub fn resolve(endpoint: &Endpoint, active: &[ActiveSpec<'_>]) -> ImpairmentSpec {
    resolve_with_provenance(endpoint, active).spec
}

pub fn resolve_with_provenance(endpoint: &Endpoint, active: &[ActiveSpec<'_>]) -> Resolution {
    let mut winners: BTreeMap<ImpairmentKind, ActiveSpec<'_>> = BTreeMap::new();
    for candidate in active {
        for kind in candidate.spec.kinds() {
            let wins = match winners.get(&kind) {
                None => true,
                Some(current) => beats(candidate, current),
            };

            if wins {
                winners.insert(kind, *candidate);
            }
        }
    }

    let mut resolution = Resolution::default();
    for (kind, winner) in winners {
        if let Some(impairment) = winner.spec.get(kind) {
            resolution.spec.insert_validated(impairment.clone());
            resolution.winners.insert(kind, winner.scenario.clone());
        }
    }

    tracing::trace!(
        %endpoint,
        contributions = active.len(),
        effective = %resolution.spec,
        "resolved conflicts"
    );

    resolution
}

fn beats(candidate: &ActiveSpec<'_>, current: &ActiveSpec<'_>) -> bool {
    candidate.priority > current.priority
        || (candidate.priority == current.priority && candidate.scenario < current.scenario)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::impairment::Impairment;
    use std::time::Duration;

    fn endpoint() -> Endpoint {
        Endpoint::new("r1", "r1-eth0")
    }

    #[test]
    fn test_empty_active_set_is_no_impairment() {
        assert!(resolve(&endpoint(), &[]).is_none());
    }

    #[test]
    fn test_precedence_per_kind() {
        let a_id = ScenarioId::from("a");
        let b_id = ScenarioId::from("b");
        let a = ImpairmentSpec::new([Impairment::loss(2.0).unwrap()]).unwrap();
        let b = ImpairmentSpec::new([Impairment::delay(Duration::from_millis(50))]).unwrap();

        let resolution = resolve_with_provenance(
            &endpoint(),
            &[
                ActiveSpec {
                    priority: 5,
                    spec: &a,
                    scenario: &a_id,
                },
                ActiveSpec {
                    priority: 10,
                    spec: &b,
                    scenario: &b_id,
                },
            ],
        );

        let expected = ImpairmentSpec::new([
            Impairment::delay(Duration::from_millis(50)),
            Impairment::loss(2.0).unwrap(),
        ])
        .unwrap();
        assert_eq!(resolution.spec, expected);
        assert_eq!(resolution.contributors(), [a_id, b_id].into_iter().collect());
    }

    #[test]
    fn test_shared_kind_is_overridden_not_blended() {
        let a_id = ScenarioId::from("a");
        let b_id = ScenarioId::from("b");
        let a = ImpairmentSpec::new([
            Impairment::loss(2.0).unwrap(),
            Impairment::delay(Duration::from_millis(10)),
        ])
        .unwrap();
        let b = ImpairmentSpec::new([Impairment::delay(Duration::from_millis(50))]).unwrap();

        let effective = resolve(
            &endpoint(),
            &[
                ActiveSpec {
                    priority: 5,
                    spec: &a,
                    scenario: &a_id,
                },
                ActiveSpec {
                    priority: 10,
                    spec: &b,
                    scenario: &b_id,
                },
            ],
        );

        assert_eq!(
            effective.get(ImpairmentKind::Delay),
            Some(&Impairment::delay(Duration::from_millis(50)))
        );
        assert_eq!(
            effective.get(ImpairmentKind::Loss),
            Some(&Impairment::loss(2.0).unwrap())
        );
    }

    #[test]
    fn test_ties_and_input_order() {
        let ids: Vec<_> = ["charlie", "alpha", "bravo"]
            .into_iter()
            .map(ScenarioId::from)
            .collect();
        let specs: Vec<_> = [1.0, 2.0, 3.0]
            .into_iter()
            .map(|loss| ImpairmentSpec::new([Impairment::loss(loss).unwrap()]).unwrap())
            .collect();
        let active: Vec<_> = ids
            .iter()
            .zip(&specs)
            .map(|(scenario, spec)| ActiveSpec {
                priority: 7,
                spec,
                scenario,
            })
            .collect();

        let forward = resolve_with_provenance(&endpoint(), &active);
        let mut reversed = active.clone();
        reversed.reverse();
        let backward = resolve_with_provenance(&endpoint(), &reversed);

        assert_eq!(forward, backward);
        assert_eq!(forward.winners[&ImpairmentKind::Loss], ScenarioId::from("alpha"));
        assert_eq!(
            forward.spec.get(ImpairmentKind::Loss),
            Some(&Impairment::loss(2.0).unwrap())
        );
    }
}
