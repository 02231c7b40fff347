//! `strata track`: pin fresh source refs.

use super::run_scheduler;
use crate::cli::TargetArgs;
use crate::context::Invocation;
use miette::Report;
use strata_scheduler::{FailurePolicy, JobLimits, Queue, TrackQueue};

pub async fn run(invocation: &Invocation, args: &TargetArgs) -> miette::Result<bool> {
    let queues: Vec<Box<dyn Queue>> = vec![Box::new(
        TrackQueue::new(&invocation.project).map_err(Report::new)?,
    )];
    run_scheduler(
        invocation,
        queues,
        JobLimits::default(),
        FailurePolicy::KeepGoing,
        &args.targets,
    )
    .await
}
