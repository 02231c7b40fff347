//! Error types for the artifact store.

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Main error type for artifact store operations.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error with path context.
    #[error("I/O error during {operation}: {source}")]
    #[diagnostic(code(strata_cas::io::error))]
    Io {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
        /// The path where the I/O error occurred, if applicable.
        path: Option<Box<Path>>,
        /// Description of the operation that failed.
        operation: String,
    },

    /// The requested key is not in the store.
    #[error("Artifact not found: {key}")]
    #[diagnostic(code(strata_cas::not_found))]
    NotFound {
        /// The missing cache key.
        key: String,
    },

    /// A stored artifact is malformed.
    #[error("Artifact {key} is corrupt: {message}")]
    #[diagnostic(code(strata_cas::corrupt))]
    Corrupt {
        /// The affected cache key.
        key: String,
        /// What is wrong with it.
        message: String,
    },

    /// A cache key failed validation.
    #[error("Invalid cache key: {message}")]
    #[diagnostic(code(strata_cas::invalid_key))]
    InvalidKey {
        /// What is wrong with the key.
        message: String,
    },

    /// Metadata (de)serialization failure.
    #[error("Metadata error: {message}")]
    #[diagnostic(code(strata_cas::metadata))]
    Metadata {
        /// What went wrong.
        message: String,
    },
}

impl Error {
    pub(crate) fn io(source: std::io::Error, path: &Path, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
            operation: operation.into(),
        }
    }
}

/// Result type alias for artifact store operations.
pub type Result<T> = std::result::Result<T, Error>;
