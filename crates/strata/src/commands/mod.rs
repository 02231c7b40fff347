//! Command implementations.

pub mod build;
pub mod fetch;
pub mod pull;
pub mod push;
pub mod shell;
pub mod show;
pub mod track;

use crate::context::Invocation;
use miette::Report;
use strata_scheduler::{FailurePolicy, JobLimits, Queue, Scheduler, SchedulerReport};

/// Load the targets, run them through a queue chain, print the summary.
pub(crate) async fn run_scheduler(
    invocation: &Invocation,
    queues: Vec<Box<dyn Queue>>,
    limits: JobLimits,
    policy: FailurePolicy,
    targets: &[String],
) -> miette::Result<bool> {
    let mut set = strata_core::load_elements(&invocation.project, &invocation.registry, targets)
        .map_err(Report::new)?;
    let ctx = invocation.job_context();
    let scheduler = Scheduler::new(queues, limits, policy);
    let report = scheduler.run(&mut set, targets, &ctx).await.map_err(Report::new)?;
    print_report(&report);
    Ok(report.is_success())
}

fn print_report(report: &SchedulerReport) {
    println!(
        "{} succeeded, {} failed, {} skipped",
        report.succeeded.len(),
        report.failed.len(),
        report.skipped.len()
    );
    for name in &report.failed {
        println!("  failed: {name}");
    }
    for name in &report.skipped {
        println!("  skipped: {name}");
    }
    if report.cancelled {
        println!("run interrupted");
    }
}
