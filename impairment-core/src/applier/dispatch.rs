use crate::applier::{ApplyError, ImpairmentApplier, RetryPolicy};
use crate::impairment::ImpairmentSpec;
use crate::metrics::ApplierCounters;
use crate::topology::{Endpoint, Topology};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Operation {
    Apply(ImpairmentSpec),
    Revert,
}

#[derive(Debug)]
pub(crate) struct DispatchOutcome {
    pub(crate) endpoint: Endpoint,
    pub(crate) operation: Operation,
    pub(crate) result: Result<(), ApplyError>,
}

/// Runs data-plane operations on a bounded pool, one at a time per endpoint
#[derive(Clone)]
pub(crate) struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    applier: Arc<dyn ImpairmentApplier>,
    workers: Semaphore,
    endpoint_locks: Mutex<HashMap<Endpoint, Arc<async_lock::Mutex<()>>>>,
    retry: RetryPolicy,
    counters: Arc<ApplierCounters>,
}

impl Dispatcher {
    pub(crate) fn new(
        applier: Arc<dyn ImpairmentApplier>,
        workers: usize,
        retry: RetryPolicy,
        counters: Arc<ApplierCounters>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                applier,
                workers: Semaphore::new(workers.max(1)),
                endpoint_locks: Mutex::default(),
                retry,
                counters,
            }),
        }
    }

    /// Runs every job to completion, including retries, and returns the outcomes in job order
    pub(crate) async fn dispatch_all(&self, jobs: Vec<(Endpoint, Operation)>) -> Vec<DispatchOutcome> {
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|(endpoint, operation)| {
                let inner = self.inner.clone();
                let job_endpoint = endpoint.clone();
                let job_operation = operation.clone();
                let handle = tokio::spawn(async move {
                    inner.run(&job_endpoint, &job_operation).await
                });
                (endpoint, operation, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (endpoint, operation, handle) in handles {
            let result = handle.await.unwrap_or_else(|error| {
                Err(ApplyError::Transient(format!("applier task failed: {error}")))
            });
            outcomes.push(DispatchOutcome {
                endpoint,
                operation,
                result,
            });
        }

        outcomes
    }

    /// No job is in flight here, since `dispatch_all` awaits every job it starts
    pub(crate) fn topology_changed(&self, topology: &Topology) {
        self.inner.applier.topology_changed(topology);
    }

    /// Stops accepting work; the pool is drained because `dispatch_all` awaits every job
    pub(crate) fn close(&self) {
        self.inner.workers.close();
    }
}

impl DispatcherInner {
    fn endpoint_lock(&self, endpoint: &Endpoint) -> Arc<async_lock::Mutex<()>> {
        self.endpoint_locks
            .lock()
            .entry(endpoint.clone())
            .or_default()
            .clone()
    }

    async fn run(&self, endpoint: &Endpoint, operation: &Operation) -> Result<(), ApplyError> {
        let lock = self.endpoint_lock(endpoint);
        let _serialized = lock.lock().await;
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| ApplyError::Transient("the worker pool is closed".to_string()))?;

        let mut attempt = 1;
        loop {
            let result = match operation {
                Operation::Apply(spec) => {
                    ApplierCounters::bump(&self.counters.apply_calls);
                    self.applier.apply(endpoint, spec).await
                }
                Operation::Revert => {
                    ApplierCounters::bump(&self.counters.revert_calls);
                    self.applier.revert(endpoint).await
                }
            };

            match result {
                Ok(()) => return Ok(()),
                Err(error) if error.is_retryable() && attempt < self.retry.max_attempts => {
                    let backoff = self.retry.backoff(attempt);
                    debug!(
                        %endpoint,
                        attempt,
                        ?backoff,
                        %error,
                        "data plane operation failed, retrying"
                    );
                    ApplierCounters::bump(&self.counters.retries);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(error) => {
                    warn!(%endpoint, attempt, %error, "data plane operation failed");
                    ApplierCounters::bump(&self.counters.failures);
                    return Err(error);
                }
            }
        }
    }
}
