//! `strata build`: fetch, pull, build and push.

use super::run_scheduler;
use crate::cli::BuildArgs;
use crate::context::Invocation;
use strata_scheduler::{
    BuildQueue, FailurePolicy, FetchQueue, JobLimits, PullQueue, PushQueue, Queue,
};

pub async fn run(invocation: &Invocation, args: &BuildArgs) -> miette::Result<bool> {
    let mut queues: Vec<Box<dyn Queue>> = vec![Box::new(FetchQueue::new(true))];
    if !invocation.remotes.is_empty() {
        queues.push(Box::new(PullQueue));
    }
    queues.push(Box::new(BuildQueue));
    if !invocation.push_remotes.is_empty() {
        queues.push(Box::new(PushQueue));
    }

    let mut limits = JobLimits::default();
    if let Some(fetchers) = args.fetchers {
        limits.fetchers = fetchers.max(1);
    }
    if let Some(builders) = args.builders {
        limits.builders = builders.max(1);
    }
    let policy = if args.keep_going {
        FailurePolicy::KeepGoing
    } else {
        FailurePolicy::FailFast
    };

    run_scheduler(invocation, queues, limits, policy, &args.targets).await
}
