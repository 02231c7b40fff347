//! The track queue: pin fresh refs for element sources.

use crate::jobs::{JobContext, JobFuture, JobOutcome, JobPayload};
use crate::queue::{Queue, QueueType};
use std::sync::{Arc, Mutex};
use strata_core::refs::ProjectRefs;
use strata_core::{Element, ElementSet, Project, RefStorage, SourceContext};
use tracing::error;

/// Tracks every source of an element, pinning new immutable refs.
///
/// With `ref-storage: project.refs`, tracked refs are written back through
/// the project.refs document; inline storage leaves persisting refs to the
/// user (the new refs are reported).
pub struct TrackQueue {
    refs: Option<Mutex<ProjectRefs>>,
}

impl TrackQueue {
    /// Build the queue, loading the ref store the project uses.
    pub fn new(project: &Project) -> strata_core::Result<Self> {
        let refs = match project.ref_storage {
            RefStorage::ProjectRefs => Some(Mutex::new(ProjectRefs::load(&project.directory)?)),
            RefStorage::Inline => None,
        };
        Ok(Self { refs })
    }
}

impl Queue for TrackQueue {
    fn action_name(&self) -> &'static str {
        "Track"
    }

    fn complete_name(&self) -> &'static str {
        "Tracked"
    }

    fn queue_type(&self) -> QueueType {
        QueueType::Track
    }

    fn skip(&self, element: &Element) -> bool {
        element.sources.is_empty()
    }

    fn process(&self, element: &Element, _set: &ElementSet, ctx: &Arc<JobContext>) -> JobFuture {
        let element = element.clone();
        let ctx = Arc::clone(ctx);
        Box::pin(async move {
            let handle = tokio::task::spawn_blocking(move || {
                let mirror_dir = ctx.project.mirror_dir();
                let mut tracked = Vec::with_capacity(element.sources.len());
                for source in &element.sources {
                    if ctx.cancel.is_cancelled() {
                        return JobOutcome::failed("track cancelled");
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
                    match plugin.track(source, &sctx) {
                        Ok(reference) => tracked.push((source.index, reference)),
                        Err(e) => return JobOutcome::failed(e.to_string()),
                    }
                }
                JobOutcome::ok(JobPayload::TrackedRefs(tracked))
            });
            handle
                .await
                .unwrap_or_else(|e| JobOutcome::failed(format!("track worker panicked: {e}")))
        })
    }

    fn done(&self, element: &mut Element, outcome: &JobOutcome, _ctx: &JobContext) -> bool {
        if outcome.returncode != 0 {
            return false;
        }
        let JobPayload::TrackedRefs(tracked) = &outcome.payload else {
            return false;
        };
        for (index, reference) in tracked {
            if let Some(source) = element.sources.get_mut(*index) {
                source.set_reference(reference.clone());
            }
            if let Some(refs) = &self.refs {
                let Ok(mut refs) = refs.lock() else {
                    return false;
                };
                refs.record(&element.name, *index, reference.clone());
            }
        }
        if let Some(refs) = &self.refs {
            let saved = refs.lock().map(|refs| refs.save());
            match saved {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(element = %element.name, error = %e, "Failed to save project.refs");
                    return false;
                }
                Err(_) => return false,
            }
        }
        true
    }
}
