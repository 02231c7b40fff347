//! Error taxonomy shared across the strata crates.

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Main error type for strata core operations.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Malformed project or element configuration.
    #[error("{}{message}", .path.as_ref().map(|p| format!("{}: ", p.display())).unwrap_or_default())]
    #[diagnostic(code(strata::load::invalid))]
    Load {
        /// What went wrong.
        message: String,
        /// The originating file, when known.
        path: Option<Box<Path>>,
    },

    /// A plugin kind could not be resolved or instantiated.
    #[error("Plugin '{kind}': {message}")]
    #[diagnostic(code(strata::plugin::unresolved))]
    Plugin {
        /// The kind that failed to resolve.
        kind: String,
        /// What went wrong.
        message: String,
    },

    /// A source failed to fetch or track.
    #[error("Source '{url}' of element '{element}': {message}")]
    #[diagnostic(code(strata::source::failed))]
    Source {
        /// The owning element.
        element: String,
        /// The user-visible source URL.
        url: String,
        /// What went wrong.
        message: String,
    },

    /// A build failed: non-zero exit or sandbox-assembly failure.
    #[error("Element '{element}' failed to build: {message}")]
    #[diagnostic(code(strata::build::failed))]
    Build {
        /// The element that failed.
        element: String,
        /// What went wrong.
        message: String,
    },

    /// Two elements staged the same file into one sandbox root.
    #[error("Overlap at '{path}': staged by both '{first}' and '{second}'")]
    #[diagnostic(code(strata::build::overlap))]
    Overlap {
        /// The overlapping path, relative to the sandbox root.
        path: String,
        /// The element that staged the file first.
        first: String,
        /// The element whose staging collided.
        second: String,
    },

    /// Artifact store I/O failure.
    #[error("Artifact cache: {message}")]
    #[diagnostic(code(strata::cache::failed))]
    Cache {
        /// What went wrong.
        message: String,
    },

    /// I/O error with path context.
    #[error("I/O error during {operation}: {source}")]
    #[diagnostic(code(strata::io::error))]
    Io {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
        /// The path where the I/O error occurred, if applicable.
        path: Option<Box<Path>>,
        /// Description of the operation that failed.
        operation: String,
    },
}

impl Error {
    /// A load error with no file context.
    pub fn load(message: impl Into<String>) -> Self {
        Self::Load {
            message: message.into(),
            path: None,
        }
    }

    /// A load error attributed to a file.
    pub fn load_in(path: &Path, message: impl Into<String>) -> Self {
        Self::Load {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    /// A plugin resolution error.
    pub fn plugin(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// A source fetch/track error.
    pub fn source(
        element: impl Into<String>,
        url: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Source {
            element: element.into(),
            url: url.into(),
            message: message.into(),
        }
    }

    /// A per-element build error.
    pub fn build(element: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Build {
            element: element.into(),
            message: message.into(),
        }
    }

    /// An artifact cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// An I/O error with the failing path and operation attached.
    pub fn io(source: std::io::Error, path: &Path, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
            operation: operation.into(),
        }
    }
}

/// Result type alias for strata core operations.
pub type Result<T> = std::result::Result<T, Error>;
