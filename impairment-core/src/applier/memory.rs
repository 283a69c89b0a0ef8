//! In-memory data plane, for simulation runs and tests

use crate::applier::{ApplyError, ImpairmentApplier};
use crate::clock::Clock;
use crate::impairment::ImpairmentSpec;
use crate::topology::{Endpoint, Generation, Topology};
use chrono::{DateTime, Utc};
use fastrand::Rng;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

#[derive(Clone, Debug, PartialEq)]
pub struct DataPlaneCall {
    pub at: DateTime<Utc>,
    pub endpoint: Endpoint,
    pub operation: DataPlaneOperation,
    pub succeeded: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DataPlaneOperation {
    Apply(ImpairmentSpec),
    Revert,
}

/// Records every call and keeps the impairments currently enforced per endpoint
pub struct InMemoryDataPlane {
    clock: Clock,
    state: Mutex<DataPlaneState>,
    random_failures: Option<Mutex<RandomFailures>>,
}

#[derive(Default)]
struct DataPlaneState {
    enforced: BTreeMap<Endpoint, ImpairmentSpec>,
    calls: Vec<DataPlaneCall>,
    scripted_failures: HashMap<Endpoint, VecDeque<ApplyError>>,
    topology_generation: Option<Generation>,
}

struct RandomFailures {
    rng: Rng,
    ratio: f64,
}

impl InMemoryDataPlane {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            state: Mutex::default(),
            random_failures: None,
        }
    }

    /// Fails the given share of calls with a transient error
    pub fn with_random_failures(mut self, ratio: f64, rng: Rng) -> Self {
        self.random_failures = Some(Mutex::new(RandomFailures {
            rng,
            ratio: ratio.clamp(0.0, 1.0),
        }));
        self
    }

    /// Makes the next call for `endpoint` fail with `error`; queued failures are consumed in order
    pub fn fail_next(&self, endpoint: &Endpoint, error: ApplyError) {
        self.state
            .lock()
            .scripted_failures
            .entry(endpoint.clone())
            .or_default()
            .push_back(error);
    }

    pub fn enforced(&self, endpoint: &Endpoint) -> Option<ImpairmentSpec> {
        self.state.lock().enforced.get(endpoint).cloned()
    }

    pub fn enforced_all(&self) -> BTreeMap<Endpoint, ImpairmentSpec> {
        self.state.lock().enforced.clone()
    }

    /// The last generation announced through `topology_changed`
    pub fn topology_generation(&self) -> Option<Generation> {
        self.state.lock().topology_generation
    }

    pub fn calls(&self) -> Vec<DataPlaneCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_for(&self, endpoint: &Endpoint) -> Vec<DataPlaneCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| &call.endpoint == endpoint)
            .cloned()
            .collect()
    }

    fn execute(&self, endpoint: &Endpoint, operation: DataPlaneOperation) -> Result<(), ApplyError> {
        let at = self.clock.now();
        let mut state = self.state.lock();

        let scripted = state
            .scripted_failures
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front);
        let failure = scripted.or_else(|| self.random_failure());

        state.calls.push(DataPlaneCall {
            at,
            endpoint: endpoint.clone(),
            operation: operation.clone(),
            succeeded: failure.is_none(),
        });

        if let Some(error) = failure {
            debug!(%endpoint, %error, "simulated data plane failure");
            return Err(error);
        }

        match operation {
            DataPlaneOperation::Apply(spec) if !spec.is_none() => {
                debug!(%endpoint, %spec, "applied impairments");
                state.enforced.insert(endpoint.clone(), spec);
            }
            _ => {
                debug!(%endpoint, "reverted impairments");
                state.enforced.remove(endpoint);
            }
        }

        Ok(())
    }

    fn random_failure(&self) -> Option<ApplyError> {
        let random_failures = self.random_failures.as_ref()?;
        let mut random_failures = random_failures.lock();
        let ratio = random_failures.ratio;
        (random_failures.rng.f64() < ratio)
            .then(|| ApplyError::Transient("simulated transient failure".to_string()))
    }
}

impl ImpairmentApplier for InMemoryDataPlane {
    fn apply<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        spec: &'a ImpairmentSpec,
    ) -> BoxFuture<'a, Result<(), ApplyError>> {
        let result = self.execute(endpoint, DataPlaneOperation::Apply(spec.clone()));
        futures_util::future::ready(result).boxed()
    }

    fn revert<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<(), ApplyError>> {
        let result = self.execute(endpoint, DataPlaneOperation::Revert);
        futures_util::future::ready(result).boxed()
    }

    fn topology_changed(&self, topology: &Topology) {
        self.state.lock().topology_generation = Some(topology.generation());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::impairment::Impairment;

    #[tokio::test]
    async fn test_apply_and_revert_track_enforced_state() {
        let data_plane = InMemoryDataPlane::new(Clock::system());
        let endpoint = Endpoint::new("h1", "h1-eth0");
        let spec = ImpairmentSpec::new([Impairment::loss(0.3).unwrap()]).unwrap();

        data_plane.apply(&endpoint, &spec).await.unwrap();
        assert_eq!(data_plane.enforced(&endpoint), Some(spec.clone()));

        data_plane.apply(&endpoint, &ImpairmentSpec::none()).await.unwrap();
        assert_eq!(data_plane.enforced(&endpoint), None);

        data_plane.apply(&endpoint, &spec).await.unwrap();
        data_plane.revert(&endpoint).await.unwrap();
        assert_eq!(data_plane.enforced(&endpoint), None);
        assert_eq!(data_plane.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_failures_leave_state_untouched() {
        let data_plane = InMemoryDataPlane::new(Clock::system())
            .with_random_failures(1.0, Rng::with_seed(42));
        let endpoint = Endpoint::new("h1", "h1-eth0");
        let spec = ImpairmentSpec::new([Impairment::loss(0.3).unwrap()]).unwrap();

        let result = data_plane.apply(&endpoint, &spec).await;
        assert!(matches!(result, Err(ApplyError::Transient(_))));
        assert_eq!(data_plane.enforced(&endpoint), None);
        assert!(!data_plane.calls()[0].succeeded);
    }
}
