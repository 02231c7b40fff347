//! End-to-end scheduler scenarios over a temporary project.
//!
//! These run without privileges: build recipes either have no commands
//! (assembly-only) or are expected to fail, so no chroot is entered.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use strata_cas::{ArtifactMeta, ArtifactRemote, ArtifactStore, DirectoryRemote};
use strata_core::{Consistency, ElementSet, Project, Registry, keys, load_elements};
use strata_scheduler::{
    BuildQueue, FailurePolicy, FetchQueue, JobContext, JobLimits, PullQueue, Queue, Scheduler,
    TrackQueue,
};

struct Fixture {
    _dir: TempDir,
    _store_dir: TempDir,
    project: Arc<Project>,
    registry: Arc<Registry>,
    store: Arc<ArtifactStore>,
    runtime_dir: TempDir,
}

impl Fixture {
    fn new(project_conf: &str, elements: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("elements")).unwrap();
        fs::write(dir.path().join("project.conf"), project_conf).unwrap();
        for (name, body) in elements {
            fs::write(dir.path().join("elements").join(name), body).unwrap();
        }
        let project = Project::load(dir.path(), &BTreeMap::new()).unwrap();
        let store_dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(store_dir.path()).unwrap();
        Self {
            project: Arc::new(project),
            registry: Arc::new(Registry::with_builtins()),
            store: Arc::new(store),
            _store_dir: store_dir,
            runtime_dir: TempDir::new().unwrap(),
            _dir: dir,
        }
    }

    fn project_dir(&self) -> &Path {
        &self.project.directory
    }

    fn load(&self, targets: &[&str]) -> ElementSet {
        let targets: Vec<String> = targets.iter().map(|s| (*s).to_string()).collect();
        load_elements(&self.project, &self.registry, &targets).unwrap()
    }

    fn ctx(&self) -> Arc<JobContext> {
        self.ctx_with(Vec::new(), CancellationToken::new())
    }

    fn ctx_with(
        &self,
        remotes: Vec<Arc<dyn strata_cas::ArtifactRemote>>,
        cancel: CancellationToken,
    ) -> Arc<JobContext> {
        Arc::new(JobContext {
            project: Arc::clone(&self.project),
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            remotes,
            push_remotes: Vec::new(),
            runtime_dir: self.runtime_dir.path().to_path_buf(),
            cancel,
        })
    }

    fn key_of(&self, set: &mut ElementSet, name: &str) -> String {
        keys::compute_keys(set, &self.project, &self.registry).unwrap();
        set.get(name).unwrap().cache_key().unwrap().to_string()
    }
}

fn make_tarball(dir: &Path, name: &str) -> String {
    let payload = dir.join(format!("{name}-payload"));
    fs::create_dir_all(&payload).unwrap();
    fs::write(payload.join("data.txt"), name.as_bytes()).unwrap();
    let tarball = dir.join(name);
    let file = fs::File::create(&tarball).unwrap();
    let mut builder = tar::Builder::new(file);
    builder.append_dir_all(".", &payload).unwrap();
    builder.finish().unwrap();
    name.to_string()
}

fn fetch_build_queues() -> Vec<Box<dyn Queue>> {
    vec![Box::new(FetchQueue::new(true)), Box::new(BuildQueue)]
}

#[tokio::test]
async fn simple_build_runs_both_queues_then_skips_on_rerun() {
    let fixture = Fixture::new(
        "name: scenario\nelement-path: elements\n",
        &[(
            "app.stack",
            "kind: stack\nsources:\n  - kind: tar\n    url: app.tar\n",
        )],
    );
    make_tarball(fixture.project_dir(), "app.tar");

    // Track first so the tar source has a pinned ref
    let mut set = fixture.load(&["app.stack"]);
    assert_eq!(
        set.get("app.stack").unwrap().consistency(),
        Consistency::Inconsistent
    );
    let track_chain = || -> Vec<Box<dyn Queue>> {
        vec![
            Box::new(TrackQueue::new(&fixture.project).unwrap()),
            Box::new(FetchQueue::new(true)),
            Box::new(BuildQueue),
        ]
    };
    let scheduler = Scheduler::new(track_chain(), JobLimits::default(), FailurePolicy::FailFast);
    let report = scheduler
        .run(&mut set, &["app.stack".to_string()], &fixture.ctx())
        .await
        .unwrap();

    assert!(report.is_success(), "{report:?}");
    let app = set.get("app.stack").unwrap();
    assert_eq!(app.consistency(), Consistency::Cached);
    assert!(app.is_cached());
    let key = app.cache_key().unwrap().to_string();
    assert!(fixture.store.contains(&key));

    // Second run over the same chain: fetch and build both skip, the
    // element completes without touching the store again
    let scheduler = Scheduler::new(track_chain(), JobLimits::default(), FailurePolicy::FailFast);
    let report = scheduler
        .run(&mut set, &["app.stack".to_string()], &fixture.ctx())
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(
        set.get("app.stack").unwrap().cache_key().map(String::from),
        Some(key)
    );
}

#[tokio::test]
async fn zero_source_element_is_cached_consistency_and_builds() {
    let fixture = Fixture::new(
        "name: scenario\nelement-path: elements\n",
        &[("base.stack", "kind: stack\n")],
    );
    let mut set = fixture.load(&["base.stack"]);
    assert_eq!(
        set.get("base.stack").unwrap().consistency(),
        Consistency::Cached
    );

    let scheduler = Scheduler::new(
        fetch_build_queues(),
        JobLimits::default(),
        FailurePolicy::FailFast,
    );
    let report = scheduler
        .run(&mut set, &["base.stack".to_string()], &fixture.ctx())
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");
    assert!(set.get("base.stack").unwrap().is_cached());
}

#[tokio::test]
async fn local_sources_flow_into_dependent_artifacts() {
    let fixture = Fixture::new(
        "name: scenario\nelement-path: elements\n",
        &[
            (
                "files.stack",
                "kind: stack\nsources:\n  - kind: local\n    url: files\n",
            ),
            ("img.stack", "kind: compose\ndepends:\n  - files.stack\n"),
        ],
    );
    fs::create_dir_all(fixture.project_dir().join("files")).unwrap();
    fs::write(fixture.project_dir().join("files/etc-motd"), b"hello").unwrap();

    let mut set = fixture.load(&["img.stack"]);
    let scheduler = Scheduler::new(
        fetch_build_queues(),
        JobLimits::default(),
        FailurePolicy::FailFast,
    );
    let report = scheduler
        .run(&mut set, &["img.stack".to_string()], &fixture.ctx())
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");

    // The compose artifact is the union of its dependencies' artifacts;
    // the files element itself installs nothing (no commands), so the
    // compose tree is empty but committed
    let img = set.get("img.stack").unwrap();
    assert!(img.is_cached());
    assert!(fixture.store.contains(img.cache_key().unwrap()));
}

#[tokio::test]
async fn cache_hit_via_pull_skips_the_build() {
    let fixture = Fixture::new(
        "name: scenario\nelement-path: elements\n",
        &[(
            // A build of this element would fail (its command is false),
            // so success proves the pull satisfied it
            "app.stack",
            "kind: stack\ncommands:\n  - \"false\"\n",
        )],
    );

    // Compute the key, then seed a remote with an artifact under it
    let mut probe = fixture.load(&["app.stack"]);
    let key = fixture.key_of(&mut probe, "app.stack");

    let remote_dir = TempDir::new().unwrap();
    let remote = DirectoryRemote::open(remote_dir.path()).unwrap();
    let tree = TempDir::new().unwrap();
    fs::write(tree.path().join("prebuilt"), b"from-remote").unwrap();
    remote
        .upload(
            &key,
            &ArtifactMeta {
                element: "app.stack".into(),
                cache_key: key.clone(),
                strong_key: None,
                created_at: chrono::Utc::now(),
                files: 1,
            },
            tree.path(),
        )
        .unwrap();

    let mut set = fixture.load(&["app.stack"]);
    let queues: Vec<Box<dyn Queue>> = vec![Box::new(PullQueue), Box::new(BuildQueue)];
    let scheduler = Scheduler::new(queues, JobLimits::default(), FailurePolicy::FailFast);
    let remotes: Vec<Arc<dyn strata_cas::ArtifactRemote>> =
        vec![Arc::new(DirectoryRemote::open(remote_dir.path()).unwrap())];
    let ctx = fixture.ctx_with(remotes, CancellationToken::new());
    let report = scheduler
        .run(&mut set, &["app.stack".to_string()], &ctx)
        .await
        .unwrap();

    assert!(report.is_success(), "{report:?}");
    let app = set.get("app.stack").unwrap();
    assert!(app.is_cached());
    assert!(app.is_remote_cached());
    assert_eq!(
        fs::read(fixture.store.extract(&key).unwrap().join("prebuilt")).unwrap(),
        b"from-remote"
    );
}

#[tokio::test]
async fn fail_fast_stops_dispatch_after_first_failure() {
    let fixture = Fixture::new(
        "name: scenario\nelement-path: elements\n",
        &[
            (
                // Pinned ref but the tarball does not exist: fetch fails
                "broken.stack",
                "kind: stack\nsources:\n  - kind: tar\n    url: missing.tar\n    ref: 0000000000000000000000000000000000000000000000000000000000000000\n",
            ),
            ("fine.stack", "kind: stack\n"),
        ],
    );

    let mut set = fixture.load(&["broken.stack", "fine.stack"]);
    let scheduler = Scheduler::new(
        fetch_build_queues(),
        JobLimits::default(),
        FailurePolicy::FailFast,
    );
    let report = scheduler
        .run(
            &mut set,
            &["broken.stack".to_string(), "fine.stack".to_string()],
            &fixture.ctx(),
        )
        .await
        .unwrap();

    assert_eq!(report.failed, vec!["broken.stack".to_string()]);
    assert!(!report.is_success());
    // The sibling was never failed; whether it completed depends on what
    // was in flight when the failure landed
    assert!(!report.failed.contains(&"fine.stack".to_string()));
}

#[tokio::test]
async fn keep_going_blocks_transitive_dependents_only() {
    let fixture = Fixture::new(
        "name: scenario\nelement-path: elements\n",
        &[
            (
                "a.stack",
                "kind: stack\nsources:\n  - kind: tar\n    url: missing.tar\n    ref: 0000000000000000000000000000000000000000000000000000000000000000\n",
            ),
            ("b.stack", "kind: stack\ndepends:\n  - a.stack\n"),
            ("c.stack", "kind: stack\ndepends:\n  - b.stack\n"),
            ("standalone.stack", "kind: stack\n"),
        ],
    );

    let mut set = fixture.load(&["c.stack", "standalone.stack"]);
    let scheduler = Scheduler::new(
        fetch_build_queues(),
        JobLimits::default(),
        FailurePolicy::KeepGoing,
    );
    let report = scheduler
        .run(
            &mut set,
            &["c.stack".to_string(), "standalone.stack".to_string()],
            &fixture.ctx(),
        )
        .await
        .unwrap();

    assert_eq!(report.failed, vec!["a.stack".to_string()]);
    let mut skipped = report.skipped.clone();
    skipped.sort();
    assert_eq!(
        skipped,
        vec!["b.stack".to_string(), "c.stack".to_string()]
    );
    // Independent work still ran to completion
    assert!(report.succeeded.contains(&"standalone.stack".to_string()));
}

#[tokio::test]
async fn overlap_fails_the_dependent_build_when_configured() {
    let fixture = Fixture::new(
        "name: scenario\nelement-path: elements\nfail-on-overlap: true\n",
        &[
            ("a.stack", "kind: stack\n"),
            ("b.stack", "kind: stack\n"),
            (
                "both.stack",
                "kind: compose\ndepends:\n  - a.stack\n  - b.stack\n",
            ),
        ],
    );

    // Pre-commit overlapping artifacts under a's and b's keys, as a pull
    // from an untrusted cache could
    let mut set = fixture.load(&["both.stack"]);
    keys::compute_keys(&mut set, &fixture.project, &fixture.registry).unwrap();
    for name in ["a.stack", "b.stack"] {
        let key = set.get(name).unwrap().cache_key().unwrap().to_string();
        let tree = TempDir::new().unwrap();
        fs::create_dir_all(tree.path().join("etc")).unwrap();
        fs::write(tree.path().join("etc/conf"), name.as_bytes()).unwrap();
        fixture
            .store
            .commit(
                &key,
                tree.path(),
                &ArtifactMeta {
                    element: name.into(),
                    cache_key: key.clone(),
                    strong_key: None,
                    created_at: chrono::Utc::now(),
                    files: 1,
                },
            )
            .unwrap();
    }

    let scheduler = Scheduler::new(
        fetch_build_queues(),
        JobLimits::default(),
        FailurePolicy::KeepGoing,
    );
    let report = scheduler
        .run(&mut set, &["both.stack".to_string()], &fixture.ctx())
        .await
        .unwrap();

    assert_eq!(report.failed, vec!["both.stack".to_string()]);
    // The cached dependencies themselves sail through untouched
    assert!(report.succeeded.contains(&"a.stack".to_string()));
    assert!(report.succeeded.contains(&"b.stack".to_string()));
}

#[tokio::test]
async fn consistency_is_monotonic_across_queues() {
    let fixture = Fixture::new(
        "name: scenario\nelement-path: elements\n",
        &[(
            "app.stack",
            "kind: stack\nsources:\n  - kind: tar\n    url: app.tar\n",
        )],
    );
    make_tarball(fixture.project_dir(), "app.tar");

    let mut set = fixture.load(&["app.stack"]);
    let queues: Vec<Box<dyn Queue>> = vec![
        Box::new(TrackQueue::new(&fixture.project).unwrap()),
        Box::new(FetchQueue::new(false)),
    ];
    let scheduler = Scheduler::new(queues, JobLimits::default(), FailurePolicy::FailFast);
    let report = scheduler
        .run(&mut set, &["app.stack".to_string()], &fixture.ctx())
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(
        set.get("app.stack").unwrap().consistency(),
        Consistency::Cached
    );

    // Fetching again neither regresses consistency nor refetches
    let queues: Vec<Box<dyn Queue>> = vec![Box::new(FetchQueue::new(false))];
    let scheduler = Scheduler::new(queues, JobLimits::default(), FailurePolicy::FailFast);
    let report = scheduler
        .run(&mut set, &["app.stack".to_string()], &fixture.ctx())
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(
        set.get("app.stack").unwrap().consistency(),
        Consistency::Cached
    );
}

#[tokio::test]
async fn pre_cancelled_run_dispatches_nothing() {
    let fixture = Fixture::new(
        "name: scenario\nelement-path: elements\n",
        &[("app.stack", "kind: stack\n")],
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut set = fixture.load(&["app.stack"]);
    let scheduler = Scheduler::new(
        fetch_build_queues(),
        JobLimits::default(),
        FailurePolicy::FailFast,
    );
    let report = scheduler
        .run(
            &mut set,
            &["app.stack".to_string()],
            &fixture.ctx_with(Vec::new(), cancel),
        )
        .await
        .unwrap();
    assert!(report.cancelled);
    assert!(report.succeeded.is_empty());
    assert!(!set.get("app.stack").unwrap().is_cached());
}

#[tokio::test]
async fn unbuildable_element_is_failed_not_hung() {
    // A source with no ref and no track queue in the chain: the build
    // queue can never become ready
    let fixture = Fixture::new(
        "name: scenario\nelement-path: elements\n",
        &[(
            "app.stack",
            "kind: stack\nsources:\n  - kind: tar\n    url: app.tar\n",
        )],
    );
    make_tarball(fixture.project_dir(), "app.tar");

    let mut set = fixture.load(&["app.stack"]);
    let queues: Vec<Box<dyn Queue>> = vec![Box::new(BuildQueue)];
    let scheduler = Scheduler::new(queues, JobLimits::default(), FailurePolicy::FailFast);
    let report = scheduler
        .run(&mut set, &["app.stack".to_string()], &fixture.ctx())
        .await
        .unwrap();
    assert_eq!(report.failed, vec!["app.stack".to_string()]);
}

#[tokio::test]
async fn tracked_refs_are_persisted_to_project_refs() {
    let fixture = Fixture::new(
        "name: scenario\nelement-path: elements\nref-storage: project.refs\n",
        &[(
            "app.stack",
            "kind: stack\nsources:\n  - kind: tar\n    url: app.tar\n",
        )],
    );
    make_tarball(fixture.project_dir(), "app.tar");

    let mut set = fixture.load(&["app.stack"]);
    let queues: Vec<Box<dyn Queue>> =
        vec![Box::new(TrackQueue::new(&fixture.project).unwrap())];
    let scheduler = Scheduler::new(queues, JobLimits::default(), FailurePolicy::FailFast);
    let report = scheduler
        .run(&mut set, &["app.stack".to_string()], &fixture.ctx())
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");

    let refs_file = fixture.project_dir().join("project.refs");
    assert!(refs_file.exists());
    let text = fs::read_to_string(refs_file).unwrap();
    assert!(text.contains("app.stack"), "{text}");

    // A fresh load picks the tracked ref up from project.refs
    let set2 = fixture.load(&["app.stack"]);
    assert!(set2.get("app.stack").unwrap().sources[0].reference().is_some());
}

#[tokio::test]
async fn build_dep_artifacts_must_exist_before_dependent_dispatch() {
    // A staged dependency artifact is a precondition the scheduler
    // enforces through ready(): the dependent's build only starts after
    // the dependency's artifact is committed
    let fixture = Fixture::new(
        "name: scenario\nelement-path: elements\n",
        &[
            ("base.stack", "kind: stack\n"),
            (
                "app.stack",
                "kind: stack\ndepends:\n  - filename: base.stack\n    type: build\n",
            ),
        ],
    );
    let mut set = fixture.load(&["app.stack"]);
    let scheduler = Scheduler::new(
        fetch_build_queues(),
        JobLimits::default(),
        FailurePolicy::FailFast,
    );
    let report = scheduler
        .run(&mut set, &["app.stack".to_string()], &fixture.ctx())
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");
    assert!(set.get("base.stack").unwrap().is_cached());
    assert!(set.get("app.stack").unwrap().is_cached());
}
