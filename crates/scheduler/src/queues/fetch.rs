//! The fetch queue: advance element sources to `Cached`.

use crate::jobs::{JobContext, JobFuture, JobOutcome, JobPayload};
use crate::queue::{Queue, QueueType};
use std::sync::Arc;
use strata_core::{Consistency, Element, ElementSet, SourceContext};

/// Fetches every source of an element into the project mirror.
pub struct FetchQueue {
    skip_cached: bool,
}

impl FetchQueue {
    /// `skip_cached` elides fetching for elements whose artifact is already
    /// in the local store; useful when fetch runs as part of a build.
    #[must_use]
    pub fn new(skip_cached: bool) -> Self {
        Self { skip_cached }
    }
}

impl Queue for FetchQueue {
    fn action_name(&self) -> &'static str {
        "Fetch"
    }

    fn complete_name(&self) -> &'static str {
        "Fetched"
    }

    fn queue_type(&self) -> QueueType {
        QueueType::Fetch
    }

    fn skip(&self, element: &Element) -> bool {
        if self.skip_cached && element.is_cached() {
            return true;
        }
        // Also skips elements with no sources
        element.consistency() == Consistency::Cached
    }

    fn process(&self, element: &Element, _set: &ElementSet, ctx: &Arc<JobContext>) -> JobFuture {
        let element = element.clone();
        let ctx = Arc::clone(ctx);
        Box::pin(async move {
            let handle = tokio::task::spawn_blocking(move || {
                let mirror_dir = ctx.project.mirror_dir();
                for source in &element.sources {
                    if ctx.cancel.is_cancelled() {
                        return JobOutcome::failed("fetch cancelled");
                    }
                    if source.consistency() == Consistency::Cached {
                        continue;
                    }
                    let plugin = match ctx.registry.source(&source.kind) {
                        Ok(plugin) => plugin,
                        Err(e) => return JobOutcome::failed(e.to_string()),
                    };
                    let sctx = SourceContext {
                        project: &ctx.project,
                        element: &element.name,
                        mirror_dir: &mirror_dir,
                    };
                    if let Err(e) = plugin.fetch(source, &sctx) {
                        return JobOutcome::failed(e.to_string());
                    }
                }
                JobOutcome::ok(JobPayload::None)
            });
            handle
                .await
                .unwrap_or_else(|e| JobOutcome::failed(format!("fetch worker panicked: {e}")))
        })
    }

    fn done(&self, element: &mut Element, outcome: &JobOutcome, _ctx: &JobContext) -> bool {
        if outcome.returncode != 0 {
            return false;
        }
        for source in &mut element.sources {
            // Successful fetch, the payload is in the mirror now
            source.bump_consistency(Consistency::Cached);
        }
        true
    }
}
