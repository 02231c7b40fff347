//! The queue contract: a typed work stage elements pass through.

use crate::jobs::{JobContext, JobFuture, JobOutcome};
use std::sync::Arc;
use strata_core::{Element, ElementSet};

/// Queue flavors sharing one concurrency budget each.
///
/// Fetch-type and track-type queues are network-bound, build-type queues
/// are CPU/IO-bound; separate budgets keep builds from starving fetches
/// and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    /// Source fetching and artifact pulling.
    Fetch,
    /// Sandbox builds.
    Build,
    /// Artifact pushing.
    Push,
    /// Source ref tracking.
    Track,
}

/// A scheduling stage with a skip/process/done contract.
///
/// `ready` and `skip` are consulted on the scheduler task; `process` runs
/// in a worker and must be idempotent against retry; `done` runs back on
/// the scheduler task and applies all state transitions. Returning `false`
/// from `done` (or a non-zero return code) marks the element failed and
/// blocks its dependents.
pub trait Queue: Send + Sync {
    /// Imperative name shown while working ("Fetch", "Build", ...).
    fn action_name(&self) -> &'static str;

    /// Past-tense name shown on completion ("Fetched", "Built", ...).
    fn complete_name(&self) -> &'static str;

    /// Which concurrency budget this queue draws from.
    fn queue_type(&self) -> QueueType;

    /// Whether the element's prerequisites for this queue are satisfied.
    fn ready(&self, _element: &Element, _set: &ElementSet) -> bool {
        true
    }

    /// Whether the work can be elided entirely; skipped elements are
    /// promoted to the next queue without spending a worker.
    fn skip(&self, _element: &Element) -> bool {
        false
    }

    /// Build the element's work as a self-contained future. Implementations
    /// snapshot whatever they need from `element` and `set`; the future
    /// must not retain references to scheduler state.
    fn process(&self, element: &Element, set: &ElementSet, ctx: &Arc<JobContext>) -> JobFuture;

    /// Post-processing on the scheduler task. Returns `false` to mark the
    /// element failed.
    fn done(&self, element: &mut Element, outcome: &JobOutcome, ctx: &JobContext) -> bool;
}
