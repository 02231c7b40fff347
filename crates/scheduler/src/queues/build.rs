//! The build queue: stage, run the recipe in a sandbox, commit the result.

use crate::jobs::{JobContext, JobFuture, JobOutcome, JobPayload};
use crate::queue::{Queue, QueueType};
use crate::staging::{stage_artifacts, stage_sources};
use chrono::Utc;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use strata_cas::ArtifactMeta;
use strata_core::{CollectMode, Consistency, Element, ElementSet};
use strata_sandbox::{Sandbox, SandboxFlags};
use tracing::{debug, info};
use walkdir::WalkDir;

static BUILD_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Builds an element inside a sandbox and commits the artifact.
pub struct BuildQueue;

struct BuildJob {
    element: Element,
    dep_artifacts: Vec<(String, String)>,
    ctx: Arc<JobContext>,
}

impl BuildJob {
    async fn run(self) -> JobOutcome {
        let Some(key) = self.element.cache_key().map(String::from) else {
            return JobOutcome::failed("element has no cache key; sources are unresolved");
        };

        let scratch = self.ctx.runtime_dir.join(format!(
            "build-{}-{}",
            self.element.name.replace(['/', '\\'], "_"),
            BUILD_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let outcome = self.run_in(&key, &scratch).await;
        let _ = fs::remove_dir_all(&scratch);
        outcome
    }

    async fn run_in(&self, key: &str, scratch: &Path) -> JobOutcome {
        let root = scratch.join("root");
        let build_dir = scratch.join("build");
        let install_dir = scratch.join("install");
        for dir in [&root, &build_dir, &install_dir] {
            if let Err(e) = fs::create_dir_all(dir) {
                return JobOutcome::failed(format!(
                    "cannot create build scratch '{}': {e}",
                    dir.display()
                ));
            }
        }

        if let Err(e) = stage_artifacts(
            &self.ctx.store,
            &self.dep_artifacts,
            &root,
            self.ctx.project.fail_on_overlap,
        ) {
            return JobOutcome::failed(e.to_string());
        }

        let recipe = match self
            .ctx
            .registry
            .element(&self.element.kind)
            .and_then(|plugin| plugin.recipe(&self.element, &self.ctx.project))
        {
            Ok(recipe) => recipe,
            Err(e) => return JobOutcome::failed(e.to_string()),
        };

        if recipe.stage_sources
            && let Err(e) =
                stage_sources(&self.element, &self.ctx.project, &self.ctx.registry, &build_dir)
        {
            return JobOutcome::failed(e.to_string());
        }

        if !recipe.commands.is_empty() {
            if let Some(outcome) = self
                .run_commands(&recipe.commands, &root, &build_dir, &install_dir)
                .await
            {
                return outcome;
            }
        }

        let collect = match recipe.collect {
            CollectMode::InstallRoot => install_dir,
            CollectMode::StagedRoot => root,
        };
        let meta = ArtifactMeta {
            element: self.element.name.clone(),
            cache_key: key.to_string(),
            strong_key: self.element.strong_key().map(String::from),
            created_at: Utc::now(),
            files: count_files(&collect),
        };
        if let Err(e) = self.ctx.store.commit(key, &collect, &meta) {
            return JobOutcome::failed(format!("artifact commit failed: {e}"));
        }
        info!(element = %self.element.name, key, "Built and committed artifact");
        JobOutcome::ok(JobPayload::Built {
            key: key.to_string(),
        })
    }

    /// Run the recipe commands; `Some` is an early failure outcome.
    async fn run_commands(
        &self,
        commands: &[String],
        root: &Path,
        build_dir: &Path,
        install_dir: &Path,
    ) -> Option<JobOutcome> {
        let defaults = &self.ctx.project.sandbox;
        let sandbox = Sandbox::new(self.ctx.runtime_dir.join("sandbox"), root)
            .with_marked_directory(defaults.build_dir.clone(), build_dir)
            .with_marked_directory(defaults.install_dir.clone(), install_dir)
            .with_environment(self.element.environment.clone())
            .with_work_dir(defaults.build_dir.clone());
        let flags = SandboxFlags {
            root_read_only: true,
            ..Default::default()
        };

        for command in commands {
            // Cancellation is checked between subprocess invocations; an
            // in-flight command is allowed to finish
            if self.ctx.cancel.is_cancelled() {
                return Some(JobOutcome::failed("build cancelled"));
            }
            debug!(element = %self.element.name, command = %command, "Running build command");
            let argv = vec!["sh".to_string(), "-c".to_string(), command.clone()];
            match sandbox.run(&argv, flags, None, None).await {
                Ok(0) => {}
                Ok(code) => {
                    return Some(JobOutcome::failed_with_code(
                        code,
                        format!("Command '{command}' failed with exit code {code}"),
                    ));
                }
                Err(e) => return Some(JobOutcome::failed(e.to_string())),
            }
        }
        None
    }
}

fn count_files(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .count() as u64
}

impl Queue for BuildQueue {
    fn action_name(&self) -> &'static str {
        "Build"
    }

    fn complete_name(&self) -> &'static str {
        "Built"
    }

    fn queue_type(&self) -> QueueType {
        QueueType::Build
    }

    fn ready(&self, element: &Element, set: &ElementSet) -> bool {
        element.cache_key().is_some()
            && element.consistency() == Consistency::Cached
            && element
                .build_dep_names()
                .all(|dep| set.get(dep).is_some_and(Element::is_cached))
    }

    fn skip(&self, element: &Element) -> bool {
        element.is_cached()
    }

    fn process(&self, element: &Element, set: &ElementSet, ctx: &Arc<JobContext>) -> JobFuture {
        let dep_artifacts: Vec<(String, String)> = element
            .build_dep_names()
            .filter_map(|dep| {
                set.get(dep)
                    .and_then(Element::cache_key)
                    .map(|key| (dep.to_string(), key.to_string()))
            })
            .collect();
        let job = BuildJob {
            element: element.clone(),
            dep_artifacts,
            ctx: Arc::clone(ctx),
        };
        Box::pin(job.run())
    }

    fn done(&self, element: &mut Element, outcome: &JobOutcome, ctx: &JobContext) -> bool {
        if outcome.returncode != 0 {
            return false;
        }
        let cached = element
            .cache_key()
            .map(|key| ctx.store.contains(key))
            .unwrap_or(false);
        element.update_cached(cached);
        // A build that committed nothing is a failure
        cached
    }
}
