//! Remote artifact cache transport.

use crate::store::{ArtifactMeta, ArtifactStore, copy_tree};
use crate::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Transport to a remote artifact cache.
///
/// Downloads report unavailability as `None` rather than an error; a remote
/// not holding a key is an expected outcome.
pub trait ArtifactRemote: Send + Sync {
    /// Human-readable endpoint location, for logs.
    fn location(&self) -> String;

    /// Whether the remote holds this key.
    fn has(&self, key: &str) -> Result<bool>;

    /// Download the artifact tree for `key` into `dest`.
    ///
    /// Returns the artifact's metadata, or `None` if the remote does not
    /// hold the key.
    fn download(&self, key: &str, dest: &Path) -> Result<Option<ArtifactMeta>>;

    /// Upload a local artifact tree under `key`.
    fn upload(&self, key: &str, meta: &ArtifactMeta, tree: &Path) -> Result<()>;
}

/// A remote backed by a directory, typically on a shared filesystem.
///
/// The layout is identical to the local store, so a directory remote is
/// also usable as a seed cache for tests and CI runners.
pub struct DirectoryRemote {
    store: ArtifactStore,
    location: PathBuf,
}

impl DirectoryRemote {
    /// Open (creating if needed) a directory remote.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let location = path.into();
        Ok(Self {
            store: ArtifactStore::open(&location)?,
            location,
        })
    }
}

impl ArtifactRemote for DirectoryRemote {
    fn location(&self) -> String {
        self.location.display().to_string()
    }

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.store.contains(key))
    }

    fn download(&self, key: &str, dest: &Path) -> Result<Option<ArtifactMeta>> {
        if !self.store.contains(key) {
            return Ok(None);
        }
        let tree = self.store.extract(key)?;
        copy_tree(&tree, dest)?;
        let meta = self.store.metadata(key)?;
        debug!(key, remote = %self.location(), "Downloaded artifact");
        Ok(Some(meta))
    }

    fn upload(&self, key: &str, meta: &ArtifactMeta, tree: &Path) -> Result<()> {
        self.store.commit(key, tree, meta)?;
        debug!(key, remote = %self.location(), "Uploaded artifact");
        Ok(())
    }
}
