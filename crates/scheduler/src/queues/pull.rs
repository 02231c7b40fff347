//! The pull queue: try to satisfy a build from a remote artifact cache.

use crate::jobs::{JobContext, JobFuture, JobOutcome, JobPayload};
use crate::queue::{Queue, QueueType};
use std::sync::Arc;
use strata_core::{Element, ElementSet};
use tracing::debug;

/// Pulls an element's artifact from the configured remotes.
///
/// Unavailability is not a failure: the element simply proceeds to the
/// build queue, which consults the recalculated cache state.
pub struct PullQueue;

impl Queue for PullQueue {
    fn action_name(&self) -> &'static str {
        "Pull"
    }

    fn complete_name(&self) -> &'static str {
        "Pulled"
    }

    fn queue_type(&self) -> QueueType {
        QueueType::Fetch
    }

    fn skip(&self, element: &Element) -> bool {
        // Nothing to pull without a key; already-cached artifacts need none
        element.is_cached() || element.cache_key().is_none()
    }

    fn process(&self, element: &Element, _set: &ElementSet, ctx: &Arc<JobContext>) -> JobFuture {
        let name = element.name.clone();
        let key = element.cache_key().map(String::from);
        let ctx = Arc::clone(ctx);
        Box::pin(async move {
            let handle = tokio::task::spawn_blocking(move || {
                let Some(key) = key else {
                    return JobOutcome::failed("element has no cache key");
                };
                for remote in &ctx.remotes {
                    if ctx.cancel.is_cancelled() {
                        return JobOutcome::failed("pull cancelled");
                    }
                    match ctx.store.pull(&key, remote.as_ref()) {
                        Ok(true) => {
                            debug!(element = %name, remote = %remote.location(), "Pulled artifact");
                            return JobOutcome::ok(JobPayload::Pulled(true));
                        }
                        Ok(false) => {}
                        Err(e) => return JobOutcome::failed(e.to_string()),
                    }
                }
                JobOutcome::ok(JobPayload::Pulled(false))
            });
            handle
                .await
                .unwrap_or_else(|e| JobOutcome::failed(format!("pull worker panicked: {e}")))
        })
    }

    fn done(&self, element: &mut Element, outcome: &JobOutcome, ctx: &JobContext) -> bool {
        if outcome.returncode != 0 {
            return false;
        }
        // Return code is zero even when the artifact was unavailable;
        // re-query the store to observe an out-of-band arrival
        let cached = element.cache_key().map(|key| ctx.store.contains(key));
        if let Some(cached) = cached {
            element.update_cached(cached);
        }
        if matches!(outcome.payload, JobPayload::Pulled(true)) {
            element.update_remote_cached(true);
        }
        true
    }
}
