//! The push queue: publish built artifacts to remote caches.

use crate::jobs::{JobContext, JobFuture, JobOutcome, JobPayload};
use crate::queue::{Queue, QueueType};
use std::sync::Arc;
use strata_core::{Element, ElementSet};
use tracing::debug;

/// Pushes an element's artifact to every push-enabled remote.
pub struct PushQueue;

impl Queue for PushQueue {
    fn action_name(&self) -> &'static str {
        "Push"
    }

    fn complete_name(&self) -> &'static str {
        "Pushed"
    }

    fn queue_type(&self) -> QueueType {
        QueueType::Push
    }

    fn skip(&self, element: &Element) -> bool {
        // Nothing to push without a local artifact
        !element.is_cached() || element.cache_key().is_none()
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
                let mut pushed = false;
                for remote in &ctx.push_remotes {
                    if ctx.cancel.is_cancelled() {
                        return JobOutcome::failed("push cancelled");
                    }
                    match ctx.store.push(&key, remote.as_ref()) {
                        Ok(true) => {
                            debug!(element = %name, remote = %remote.location(), "Pushed artifact");
                            pushed = true;
                        }
                        Ok(false) => {}
                        Err(e) => return JobOutcome::failed(e.to_string()),
                    }
                }
                JobOutcome::ok(JobPayload::Pushed(pushed))
            });
            handle
                .await
                .unwrap_or_else(|e| JobOutcome::failed(format!("push worker panicked: {e}")))
        })
    }

    fn done(&self, element: &mut Element, outcome: &JobOutcome, _ctx: &JobContext) -> bool {
        if outcome.returncode != 0 {
            return false;
        }
        if matches!(outcome.payload, JobPayload::Pushed(true)) {
            element.update_remote_cached(true);
        }
        true
    }
}
