//! `strata fetch`: bring element sources into the local mirror.

use super::run_scheduler;
use crate::cli::FetchArgs;
use crate::context::Invocation;
use miette::Report;
use strata_scheduler::{FailurePolicy, FetchQueue, JobLimits, Queue, TrackQueue};

pub async fn run(invocation: &Invocation, args: &FetchArgs) -> miette::Result<bool> {
    let mut queues: Vec<Box<dyn Queue>> = Vec::new();
    if args.track {
        queues.push(Box::new(
            TrackQueue::new(&invocation.project).map_err(Report::new)?,
        ));
    }
    queues.push(Box::new(FetchQueue::new(false)));

    run_scheduler(
        invocation,
        queues,
        JobLimits::default(),
        FailurePolicy::KeepGoing,
        &args.targets,
    )
    .await
}
