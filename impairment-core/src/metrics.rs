use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters bumped by the dispatcher while it talks to the data plane
#[derive(Default)]
pub(crate) struct ApplierCounters {
    pub(crate) apply_calls: AtomicU64,
    pub(crate) revert_calls: AtomicU64,
    pub(crate) failures: AtomicU64,
    pub(crate) retries: AtomicU64,
}

impl ApplierCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub scenarios: usize,
    pub active_scenarios: usize,
    /// Endpoints with a non-empty effective impairment
    pub applied_impairments: usize,
    /// Applied impairments keyed by the target of each contributing scenario
    pub applied_by_target: BTreeMap<String, usize>,
    /// Endpoints whose enforced impairment lags behind the effective one
    pub degraded_endpoints: usize,
    pub apply_calls: u64,
    pub revert_calls: u64,
    pub applier_failures: u64,
    pub applier_retries: u64,
    pub events_dropped: u64,
}
