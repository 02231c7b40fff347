//! Invocation context: project, registry, stores and remotes.

use crate::cli::{Cli, parse_option_overrides};
use miette::{IntoDiagnostic, Report, miette};
use std::path::PathBuf;
use std::sync::Arc;
use strata_cas::{ArtifactRemote, ArtifactStore, DirectoryRemote};
use strata_core::{Project, Registry};
use strata_scheduler::JobContext;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Everything a command needs, loaded once per invocation.
pub struct Invocation {
    pub project: Arc<Project>,
    pub registry: Arc<Registry>,
    pub store: Arc<ArtifactStore>,
    pub remotes: Vec<Arc<dyn ArtifactRemote>>,
    pub push_remotes: Vec<Arc<dyn ArtifactRemote>>,
    pub runtime_dir: PathBuf,
    pub cancel: CancellationToken,
}

impl Invocation {
    /// Load the project and open the artifact stores.
    pub fn load(cli: &Cli, cancel: CancellationToken) -> miette::Result<Self> {
        let options = parse_option_overrides(&cli.options).map_err(|e| miette!("{e}"))?;
        let project = Project::load(&cli.directory, &options).map_err(Report::new)?;
        let registry = Registry::with_builtins();

        let cache_dir = cli
            .cache_dir
            .clone()
            .unwrap_or_else(|| cache_root(&project));
        debug!(cache = %cache_dir.display(), "Opening artifact store");
        let store = ArtifactStore::open(&cache_dir).map_err(Report::new)?;

        let mut remotes: Vec<Arc<dyn ArtifactRemote>> = Vec::new();
        let mut push_remotes: Vec<Arc<dyn ArtifactRemote>> = Vec::new();
        for spec in &project.remotes {
            if spec.url.contains("://") && !spec.url.starts_with("file://") {
                return Err(miette!(
                    "artifact remote '{}': only directory and file:// remotes are supported",
                    spec.url
                ));
            }
            let path = spec.url.strip_prefix("file://").unwrap_or(&spec.url);
            let remote: Arc<dyn ArtifactRemote> =
                Arc::new(DirectoryRemote::open(path).map_err(Report::new)?);
            if spec.push {
                push_remotes.push(Arc::clone(&remote));
            }
            remotes.push(remote);
        }

        let runtime_dir = std::env::var_os("STRATA_RUNTIME_DIR")
            .map_or_else(|| std::env::temp_dir().join("strata"), PathBuf::from);
        std::fs::create_dir_all(&runtime_dir).into_diagnostic()?;

        Ok(Self {
            project: Arc::new(project),
            registry: Arc::new(registry),
            store: Arc::new(store),
            remotes,
            push_remotes,
            runtime_dir,
            cancel,
        })
    }

    /// The shared job context handed to scheduler workers.
    #[must_use]
    pub fn job_context(&self) -> Arc<JobContext> {
        Arc::new(JobContext {
            project: Arc::clone(&self.project),
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            remotes: self.remotes.clone(),
            push_remotes: self.push_remotes.clone(),
            runtime_dir: self.runtime_dir.clone(),
            cancel: self.cancel.clone(),
        })
    }
}

/// Default artifact cache location, first writable candidate wins:
/// the OS cache dir, then `~/.strata/cache`, then the system temp dir.
fn cache_root(project: &Project) -> PathBuf {
    let mut candidates = Vec::new();
    if let Some(cache) = dirs::cache_dir() {
        candidates.push(cache.join("strata").join("artifacts"));
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".strata").join("cache"));
    }
    candidates.push(std::env::temp_dir().join("strata").join("artifacts"));

    for candidate in candidates {
        if std::fs::create_dir_all(&candidate).is_ok() {
            return candidate;
        }
    }
    // Last resort: keep it project-local
    project.directory.join(".strata").join("artifacts")
}
