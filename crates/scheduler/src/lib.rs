//! The strata scheduler: a DAG-driven, multi-queue work engine.
//!
//! Elements flow through an ordered chain of queues (track, fetch, pull,
//! build, push). Each queue decides per element whether work can be
//! skipped, dispatches `process` jobs to a bounded worker pool, and applies
//! state transitions in `done` on the scheduler task. The scheduler itself
//! is single-threaded and cooperative: it blocks on a completion channel,
//! handles one completion at a time, recomputes readiness for the affected
//! dependents only, and re-enters dispatch.

mod jobs;
mod queue;
mod queues;
mod scheduler;
pub mod staging;

pub use jobs::{JobContext, JobFuture, JobOutcome, JobPayload};
pub use queue::{Queue, QueueType};
pub use queues::{BuildQueue, FetchQueue, PullQueue, PushQueue, TrackQueue};
pub use scheduler::{FailurePolicy, JobLimits, Scheduler, SchedulerReport};
