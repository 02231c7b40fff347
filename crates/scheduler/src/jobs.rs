//! Job descriptors and completion records.
//!
//! Workers never share mutable element state with the scheduler: `process`
//! builds a self-contained future from element snapshots, and everything
//! flowing back travels in a [`JobOutcome`].

use std::path::PathBuf;
use std::sync::Arc;
use strata_cas::{ArtifactRemote, ArtifactStore};
use strata_core::{Project, Registry};
use tokio_util::sync::CancellationToken;

/// Shared, immutable context handed to every job.
pub struct JobContext {
    /// The loaded project.
    pub project: Arc<Project>,
    /// The kind registry.
    pub registry: Arc<Registry>,
    /// The local artifact store.
    pub store: Arc<ArtifactStore>,
    /// Remotes artifacts may be pulled from.
    pub remotes: Vec<Arc<dyn ArtifactRemote>>,
    /// Remotes artifacts may be pushed to.
    pub push_remotes: Vec<Arc<dyn ArtifactRemote>>,
    /// Scratch space for build staging and sandbox rootfs directories.
    pub runtime_dir: PathBuf,
    /// Global cooperative cancellation flag.
    pub cancel: CancellationToken,
}

/// Job-specific result data carried back to `done`.
#[derive(Debug, Clone)]
pub enum JobPayload {
    /// Nothing beyond the return code.
    None,
    /// Newly tracked refs, by source index.
    TrackedRefs(Vec<(usize, String)>),
    /// Whether a pull actually materialized the artifact.
    Pulled(bool),
    /// A completed build's cache key.
    Built {
        /// The key the artifact was committed under.
        key: String,
    },
    /// Whether any remote accepted the artifact.
    Pushed(bool),
}

/// A worker's completion record.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// Zero for success; non-zero marks the element failed.
    pub returncode: i32,
    /// Job-specific result data.
    pub payload: JobPayload,
    /// Human-readable failure description, when non-zero.
    pub message: Option<String>,
}

impl JobOutcome {
    /// A successful completion.
    #[must_use]
    pub fn ok(payload: JobPayload) -> Self {
        Self {
            returncode: 0,
            payload,
            message: None,
        }
    }

    /// A failed completion.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            returncode: 1,
            payload: JobPayload::None,
            message: Some(message.into()),
        }
    }

    /// A failed completion with a specific return code.
    #[must_use]
    pub fn failed_with_code(returncode: i32, message: impl Into<String>) -> Self {
        Self {
            returncode,
            payload: JobPayload::None,
            message: Some(message.into()),
        }
    }
}

/// The self-contained future a queue builds for one element's work.
pub type JobFuture = std::pin::Pin<Box<dyn Future<Output = JobOutcome> + Send + 'static>>;
