//! `strata push`: publish local artifacts to remote caches.

use super::run_scheduler;
use crate::cli::TargetArgs;
use crate::context::Invocation;
use miette::miette;
use strata_scheduler::{FailurePolicy, JobLimits, PushQueue, Queue};

pub async fn run(invocation: &Invocation, args: &TargetArgs) -> miette::Result<bool> {
    if invocation.push_remotes.is_empty() {
        return Err(miette!(
            "no push-enabled artifact remotes configured in project.conf"
        ));
    }
    let queues: Vec<Box<dyn Queue>> = vec![Box::new(PushQueue)];
    run_scheduler(
        invocation,
        queues,
        JobLimits::default(),
        FailurePolicy::KeepGoing,
        &args.targets,
    )
    .await
}
