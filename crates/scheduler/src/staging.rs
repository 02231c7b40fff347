//! Staging of dependency artifacts and element sources into a build root.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use strata_cas::ArtifactStore;
use strata_core::{Element, Error, Project, Registry, Result, SourceContext};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Stage the artifact trees of `deps` (name, cache key) into `root`.
///
/// When two artifacts provide the same file, `fail_on_overlap` decides
/// between a hard overlap error naming both elements and a warn-and-replace
/// where the later artifact wins.
pub fn stage_artifacts(
    store: &ArtifactStore,
    deps: &[(String, String)],
    root: &Path,
    fail_on_overlap: bool,
) -> Result<()> {
    let mut owners: HashMap<String, String> = HashMap::new();

    for (name, key) in deps {
        let tree = store
            .extract(key)
            .map_err(|e| Error::cache(e.to_string()))?;
        for entry in WalkDir::new(&tree).follow_links(false) {
            let entry = entry.map_err(|e| {
                Error::io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walkdir")),
                    &tree,
                    "walk",
                )
            })?;
            let rel = entry
                .path()
                .strip_prefix(&tree)
                .map_err(|_| Error::cache("artifact tree entry escapes its root".to_string()))?;
            let target = root.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)
                    .map_err(|e| Error::io(e, &target, "create_dir_all"))?;
                continue;
            }

            let rel_display = rel.to_string_lossy().replace('\\', "/");
            if let Some(first) = owners.get(&rel_display) {
                if fail_on_overlap {
                    return Err(Error::Overlap {
                        path: rel_display,
                        first: first.clone(),
                        second: name.clone(),
                    });
                }
                warn!(
                    path = %rel_display,
                    first = %first,
                    second = %name,
                    "Overlapping staged file, later artifact wins"
                );
            }
            owners.insert(rel_display, name.clone());

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| Error::io(e, &target, "copy"))?;
        }
        debug!(element = %name, key = %key, "Staged dependency artifact");
    }
    Ok(())
}

/// Stage an element's sources, in order, into the build directory.
pub fn stage_sources(
    element: &Element,
    project: &Project,
    registry: &Registry,
    build_dir: &Path,
) -> Result<()> {
    let mirror_dir = project.mirror_dir();
    let ctx = SourceContext {
        project,
        element: &element.name,
        mirror_dir: &mirror_dir,
    };
    for source in &element.sources {
        let plugin = registry.source(&source.kind)?;
        plugin.stage(source, &ctx, build_dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use strata_cas::ArtifactMeta;
    use tempfile::TempDir;

    fn key(fill: char) -> String {
        std::iter::repeat_n(fill, 64).collect()
    }

    fn commit_tree(store: &ArtifactStore, k: &str, files: &[(&str, &[u8])]) {
        let tree = TempDir::new().unwrap();
        for (path, content) in files {
            let full = tree.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        store
            .commit(
                k,
                tree.path(),
                &ArtifactMeta {
                    element: "dep.stack".into(),
                    cache_key: k.into(),
                    strong_key: None,
                    created_at: Utc::now(),
                    files: files.len() as u64,
                },
            )
            .unwrap();
    }

    #[test]
    fn artifacts_union_into_the_root() {
        let store_dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(store_dir.path()).unwrap();
        let (ka, kb) = (key('a'), key('b'));
        commit_tree(&store, &ka, &[("usr/bin/a", b"a")]);
        commit_tree(&store, &kb, &[("usr/lib/b.so", b"b")]);

        let root = TempDir::new().unwrap();
        stage_artifacts(
            &store,
            &[
                ("a.stack".to_string(), ka),
                ("b.stack".to_string(), kb),
            ],
            root.path(),
            true,
        )
        .unwrap();
        assert!(root.path().join("usr/bin/a").exists());
        assert!(root.path().join("usr/lib/b.so").exists());
    }

    #[test]
    fn overlap_fails_when_configured() {
        let store_dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(store_dir.path()).unwrap();
        let (ka, kb) = (key('c'), key('d'));
        commit_tree(&store, &ka, &[("etc/conf", b"from-a")]);
        commit_tree(&store, &kb, &[("etc/conf", b"from-b")]);

        let root = TempDir::new().unwrap();
        let err = stage_artifacts(
            &store,
            &[
                ("a.stack".to_string(), ka),
                ("b.stack".to_string(), kb),
            ],
            root.path(),
            true,
        )
        .unwrap_err();
        match err {
            Error::Overlap {
                path,
                first,
                second,
            } => {
                assert_eq!(path, "etc/conf");
                assert_eq!(first, "a.stack");
                assert_eq!(second, "b.stack");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn overlap_later_wins_when_allowed() {
        let store_dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(store_dir.path()).unwrap();
        let (ka, kb) = (key('e'), key('f'));
        commit_tree(&store, &ka, &[("etc/conf", b"from-a")]);
        commit_tree(&store, &kb, &[("etc/conf", b"from-b")]);

        let root = TempDir::new().unwrap();
        stage_artifacts(
            &store,
            &[
                ("a.stack".to_string(), ka),
                ("b.stack".to_string(), kb),
            ],
            root.path(),
            false,
        )
        .unwrap();
        assert_eq!(
            fs::read(root.path().join("etc/conf")).unwrap(),
            b"from-b"
        );
    }
}
