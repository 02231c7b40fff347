//! The `project.refs` document: out-of-line source ref storage.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const REFS_FILE: &str = "project.refs";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RefEntry {
    #[serde(default, rename = "ref")]
    reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RefsDocument {
    #[serde(default)]
    elements: BTreeMap<String, Vec<RefEntry>>,
}

/// Source refs stored per element, indexed by source position.
///
/// Used when the project declares `ref-storage: project.refs`; tracking
/// writes back through this document instead of element files.
#[derive(Debug, Clone)]
pub struct ProjectRefs {
    path: PathBuf,
    document: RefsDocument,
}

impl ProjectRefs {
    /// Load `project.refs` from the project directory; a missing file is an
    /// empty document.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(REFS_FILE);
        let document = if path.exists() {
            let text = fs::read_to_string(&path).map_err(|e| Error::io(e, &path, "read"))?;
            serde_yaml::from_str(&text).map_err(|e| Error::load_in(&path, e.to_string()))?
        } else {
            RefsDocument::default()
        };
        Ok(Self { path, document })
    }

    /// The stored ref for an element's source, if any.
    #[must_use]
    pub fn lookup(&self, element: &str, index: usize) -> Option<&str> {
        self.document
            .elements
            .get(element)?
            .get(index)?
            .reference
            .as_deref()
    }

    /// Record a tracked ref for an element's source.
    pub fn record(&mut self, element: &str, index: usize, reference: String) {
        let entries = self.document.elements.entry(element.to_string()).or_default();
        if entries.len() <= index {
            entries.resize_with(index + 1, RefEntry::default);
        }
        entries[index].reference = Some(reference);
    }

    /// Write the document back to disk.
    pub fn save(&self) -> Result<()> {
        let text = serde_yaml::to_string(&self.document)
            .map_err(|e| Error::load(format!("Failed to serialize {REFS_FILE}: {e}")))?;
        fs::write(&self.path, text).map_err(|e| Error::io(e, &self.path, "write"))
    }
}
