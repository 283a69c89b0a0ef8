//! Data-plane control surface
//!
//! An [`ImpairmentApplier`] enforces one effective spec on one endpoint per call. It does not
//! need to be idempotent on its own: the scheduler only calls it when the effective spec of an
//! endpoint actually changed.

mod dispatch;
pub mod memory;
pub mod tc;

pub(crate) use dispatch::{DispatchOutcome, Dispatcher, Operation};

use crate::impairment::ImpairmentSpec;
use crate::topology::{Endpoint, Topology};
use futures_util::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;

pub trait ImpairmentApplier: Send + Sync {
    /// Replaces whatever is enforced on `endpoint` by `spec`
    fn apply<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        spec: &'a ImpairmentSpec,
    ) -> BoxFuture<'a, Result<(), ApplyError>>;

    /// Removes every impairment from `endpoint`
    fn revert<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<(), ApplyError>>;

    /// Called once a new topology generation is in force, before any call that targets it
    fn topology_changed(&self, _topology: &Topology) {}
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("transient data plane failure: {0}")]
    Transient(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("unsupported by the data plane: {0}")]
    Unsupported(String),
}

impl ApplyError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApplyError::Transient(_))
    }
}

/// Bounded exponential backoff between attempts of one data-plane operation
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Includes the first attempt
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            multiplier: 2,
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// The pause after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Upper bound on the time spent waiting between attempts of one operation
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts.max(1))
            .map(|attempt| self.backoff(attempt))
            .sum()
    }
}
