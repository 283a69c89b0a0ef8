//! Scheduling and conflict resolution of network impairment scenarios
//!
//! Scenarios bind a [`target::Target`] in a compiled [`topology::Topology`] to an
//! [`impairment::ImpairmentSpec`]. The [`scheduler::Scheduler`] activates them persistently or on
//! a recurrence, resolves overlapping scenarios per endpoint and pushes the effective impairments
//! to an [`applier::ImpairmentApplier`].

pub mod applier;
pub mod clock;
pub mod conflict;
pub mod event;
pub mod impairment;
pub mod metrics;
pub mod scenario;
pub mod schedule;
pub mod scheduler;
pub mod target;
pub mod topology;
mod util;
