//! The local artifact store.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};
use walkdir::WalkDir;

const OBJECTS_DIR: &str = "objects";
const STAGING_DIR: &str = "staging";
const FILES_DIR: &str = "files";
const META_FILE: &str = "artifact.json";

static STAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Metadata stored next to every artifact tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactMeta {
    /// The element that produced the artifact.
    pub element: String,
    /// The addressing cache key.
    pub cache_key: String,
    /// The strong key (runtime deps folded in), when known.
    pub strong_key: Option<String>,
    /// When the artifact was committed.
    pub created_at: DateTime<Utc>,
    /// Number of files in the tree.
    pub files: u64,
}

/// A content-addressed store of artifact trees.
///
/// All mutating operations are atomic per key; the store may be shared by
/// concurrent processes on the same filesystem.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for sub in [OBJECTS_DIR, STAGING_DIR] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir, "create_dir_all"))?;
        }
        Ok(Self { root })
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidKey {
                message: format!("expected 64 hex characters, got '{key}'"),
            });
        }
        Ok(())
    }

    fn object_dir(&self, key: &str) -> PathBuf {
        self.root
            .join(OBJECTS_DIR)
            .join(&key[0..2])
            .join(&key[2..4])
            .join(key)
    }

    /// Whether an artifact for this key is fully present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        Self::validate_key(key).is_ok() && self.object_dir(key).join(META_FILE).exists()
    }

    /// The directory of a committed artifact's tree.
    pub fn extract(&self, key: &str) -> Result<PathBuf> {
        Self::validate_key(key)?;
        let dir = self.object_dir(key);
        if !dir.join(META_FILE).exists() {
            return Err(Error::NotFound {
                key: key.to_string(),
            });
        }
        Ok(dir.join(FILES_DIR))
    }

    /// Read an artifact's metadata record.
    pub fn metadata(&self, key: &str) -> Result<ArtifactMeta> {
        Self::validate_key(key)?;
        let path = self.object_dir(key).join(META_FILE);
        if !path.exists() {
            return Err(Error::NotFound {
                key: key.to_string(),
            });
        }
        let text = fs::read_to_string(&path).map_err(|e| Error::io(e, &path, "read"))?;
        serde_json::from_str(&text).map_err(|e| Error::Corrupt {
            key: key.to_string(),
            message: format!("unreadable metadata: {e}"),
        })
    }

    /// Commit a tree under a key.
    ///
    /// The tree is copied into a staging directory on the same filesystem
    /// and moved into place with a single rename: afterwards the key is
    /// either fully present or (on error) fully absent. Committing a key
    /// that already exists is a no-op.
    pub fn commit(&self, key: &str, tree: &Path, meta: &ArtifactMeta) -> Result<()> {
        Self::validate_key(key)?;
        if self.contains(key) {
            debug!(key, "Artifact already committed, skipping");
            return Ok(());
        }

        let stage = self.root.join(STAGING_DIR).join(format!(
            "{key}.{}.{}",
            std::process::id(),
            STAGE_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let result = self.commit_staged(key, tree, meta, &stage);
        if result.is_err() {
            let _ = fs::remove_dir_all(&stage);
        }
        result
    }

    fn commit_staged(
        &self,
        key: &str,
        tree: &Path,
        meta: &ArtifactMeta,
        stage: &Path,
    ) -> Result<()> {
        let files_dir = stage.join(FILES_DIR);
        fs::create_dir_all(&files_dir).map_err(|e| Error::io(e, &files_dir, "create_dir_all"))?;
        copy_tree(tree, &files_dir)?;

        let meta_path = stage.join(META_FILE);
        let json = serde_json::to_vec_pretty(meta).map_err(|e| Error::Metadata {
            message: e.to_string(),
        })?;
        fs::write(&meta_path, json).map_err(|e| Error::io(e, &meta_path, "write"))?;

        let target = self.object_dir(key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }
        match fs::rename(stage, &target) {
            Ok(()) => {
                debug!(key, "Committed artifact");
                Ok(())
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::AlreadyExists
                    || e.kind() == std::io::ErrorKind::DirectoryNotEmpty
                    || target.join(META_FILE).exists() =>
            {
                // Lost a commit race; the other writer's artifact is
                // equivalent by construction
                debug!(key, "Concurrent commit won the race, discarding stage");
                let _ = fs::remove_dir_all(stage);
                Ok(())
            }
            Err(e) => Err(Error::io(e, &target, "rename")),
        }
    }

    /// Iterate all committed keys.
    pub fn list_keys(&self) -> Result<Vec<String>> {
        let objects = self.root.join(OBJECTS_DIR);
        let mut keys = Vec::new();
        if !objects.exists() {
            return Ok(keys);
        }
        for entry in WalkDir::new(&objects).min_depth(3).max_depth(3) {
            let entry = entry.map_err(|e| {
                Error::io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walkdir")),
                    &objects,
                    "walk",
                )
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && Self::validate_key(name).is_ok()
                && entry.path().join(META_FILE).exists()
            {
                keys.push(name.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Pull an artifact from a remote into the local store.
    ///
    /// Returns `false` without error when the remote does not have the key;
    /// unavailability is an expected outcome, not a failure.
    pub fn pull(&self, key: &str, remote: &dyn crate::ArtifactRemote) -> Result<bool> {
        Self::validate_key(key)?;
        if self.contains(key) {
            return Ok(true);
        }
        let stage = self.root.join(STAGING_DIR).join(format!(
            "pull.{key}.{}.{}",
            std::process::id(),
            STAGE_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&stage).map_err(|e| Error::io(e, &stage, "create_dir_all"))?;
        let pulled = match remote.download(key, &stage) {
            Ok(Some(meta)) => {
                self.commit(key, &stage, &meta)?;
                true
            }
            Ok(None) => false,
            Err(e) => {
                let _ = fs::remove_dir_all(&stage);
                return Err(e);
            }
        };
        let _ = fs::remove_dir_all(&stage);
        Ok(pulled)
    }

    /// Push a local artifact to a remote.
    ///
    /// Returns `false` when the remote already has the key.
    pub fn push(&self, key: &str, remote: &dyn crate::ArtifactRemote) -> Result<bool> {
        let tree = self.extract(key)?;
        let meta = self.metadata(key)?;
        if remote.has(key)? {
            return Ok(false);
        }
        remote.upload(key, &meta, &tree)?;
        Ok(true)
    }
}

/// Copy a directory tree, creating parents as needed.
///
/// Only regular files and directories are carried over. Builds may leave
/// sockets, FIFOs and other special files behind in their output trees;
/// those are skipped with a warning rather than failing collection.
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let mut copied = 0u64;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            Error::io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walkdir")),
                src,
                "walk",
            )
        })?;
        let rel = entry.path().strip_prefix(src).map_err(|_| Error::Io {
            source: std::io::Error::other("path escapes tree root"),
            path: Some(entry.path().into()),
            operation: "strip_prefix".into(),
        })?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io(e, &target, "create_dir_all"))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| Error::io(e, &target, "copy"))?;
            copied += 1;
        } else {
            warn!(
                path = %entry.path().display(),
                "Ignoring special file while copying artifact tree"
            );
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(fill: char) -> String {
        std::iter::repeat_n(fill, 64).collect()
    }

    fn meta(k: &str) -> ArtifactMeta {
        ArtifactMeta {
            element: "e.stack".into(),
            cache_key: k.into(),
            strong_key: None,
            created_at: Utc::now(),
            files: 1,
        }
    }

    fn tree_with(content: &[u8]) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("usr/bin")).unwrap();
        fs::write(dir.path().join("usr/bin/app"), content).unwrap();
        dir
    }

    #[test]
    fn commit_then_extract_is_tree_equal() {
        let root = TempDir::new().unwrap();
        let store = ArtifactStore::open(root.path()).unwrap();
        let tree = tree_with(b"binary");
        let k = key('a');

        assert!(!store.contains(&k));
        store.commit(&k, tree.path(), &meta(&k)).unwrap();
        assert!(store.contains(&k));

        let extracted = store.extract(&k).unwrap();
        assert_eq!(
            fs::read(extracted.join("usr/bin/app")).unwrap(),
            b"binary"
        );
        assert_eq!(store.metadata(&k).unwrap().element, "e.stack");
    }

    #[test]
    fn duplicate_commit_is_a_noop() {
        let root = TempDir::new().unwrap();
        let store = ArtifactStore::open(root.path()).unwrap();
        let k = key('b');

        let first = tree_with(b"first");
        store.commit(&k, first.path(), &meta(&k)).unwrap();

        let second = tree_with(b"second");
        store.commit(&k, second.path(), &meta(&k)).unwrap();

        let extracted = store.extract(&k).unwrap();
        assert_eq!(fs::read(extracted.join("usr/bin/app")).unwrap(), b"first");
    }

    #[test]
    fn extract_missing_key_is_not_found() {
        let root = TempDir::new().unwrap();
        let store = ArtifactStore::open(root.path()).unwrap();
        assert!(matches!(
            store.extract(&key('c')),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        let root = TempDir::new().unwrap();
        let store = ArtifactStore::open(root.path()).unwrap();
        assert!(matches!(
            store.extract("short"),
            Err(Error::InvalidKey { .. })
        ));
        assert!(!store.contains("zz"));
    }

    #[test]
    fn list_keys_sees_only_committed_artifacts() {
        let root = TempDir::new().unwrap();
        let store = ArtifactStore::open(root.path()).unwrap();
        let tree = tree_with(b"x");

        let k1 = key('1');
        let k2 = key('2');
        store.commit(&k1, tree.path(), &meta(&k1)).unwrap();
        store.commit(&k2, tree.path(), &meta(&k2)).unwrap();

        // A partially staged artifact must not be visible
        let half = store.root.join(OBJECTS_DIR).join("33").join("33").join(key('3'));
        fs::create_dir_all(half.join(FILES_DIR)).unwrap();

        assert_eq!(store.list_keys().unwrap(), vec![k1, k2]);
        assert!(!store.contains(&key('3')));
    }

    #[cfg(unix)]
    #[test]
    fn sockets_in_the_output_tree_are_ignored() {
        use std::os::unix::net::UnixListener;

        let root = TempDir::new().unwrap();
        let store = ArtifactStore::open(root.path()).unwrap();
        let k = key('a');

        // A build may leave a socket behind next to its real output
        let tree = tree_with(b"binary");
        let _listener = UnixListener::bind(tree.path().join("usr/bin/sock")).unwrap();

        store.commit(&k, tree.path(), &meta(&k)).unwrap();
        assert!(store.contains(&k));

        let extracted = store.extract(&k).unwrap();
        assert_eq!(fs::read(extracted.join("usr/bin/app")).unwrap(), b"binary");
        assert!(!extracted.join("usr/bin/sock").exists());
    }

    #[test]
    fn staging_leftovers_do_not_count_as_artifacts() {
        let root = TempDir::new().unwrap();
        let store = ArtifactStore::open(root.path()).unwrap();
        let k = key('d');
        fs::create_dir_all(store.root.join(STAGING_DIR).join(format!("{k}.1.1"))).unwrap();
        assert!(!store.contains(&k));
        assert!(store.list_keys().unwrap().is_empty());
    }
}
