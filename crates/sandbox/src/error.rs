//! Error types for sandbox assembly and execution.

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Main error type for sandbox operations.
///
/// Command exit codes are not errors; `run` returns them. These errors mean
/// the sandbox could not be constructed or the command could not launch.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// An operation needed privileges the process does not have.
    #[error(
        "Permission denied during {operation} of '{path}'; sandboxed builds require root privileges"
    )]
    #[diagnostic(code(strata_sandbox::permission))]
    Permission {
        /// The privileged operation that failed.
        operation: String,
        /// The affected path.
        path: String,
    },

    /// A non-optional mount's host path does not exist.
    #[error("Host path '{path}' for mount '{mount_point}' does not exist")]
    #[diagnostic(code(strata_sandbox::missing_host_path))]
    HostPathMissing {
        /// The missing host path.
        path: String,
        /// The mount point it was meant to serve.
        mount_point: String,
    },

    /// A bind mount or remount failed for a non-permission reason.
    #[error("Failed to mount '{target}': {source}")]
    #[diagnostic(code(strata_sandbox::mount))]
    Mount {
        /// The mount target inside the rootfs.
        target: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Creating a device node failed for a non-permission reason.
    #[error("Could not create device '{path}': {source}")]
    #[diagnostic(code(strata_sandbox::mknod))]
    Mknod {
        /// The device node path.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The command could not be launched inside the rootfs.
    #[error("Could not run command in sandbox: {message}")]
    #[diagnostic(code(strata_sandbox::spawn))]
    Spawn {
        /// What went wrong.
        message: String,
    },

    /// I/O error with path context.
    #[error("I/O error during {operation}: {source}")]
    #[diagnostic(code(strata_sandbox::io))]
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
    /// Classify an I/O failure of a privileged operation: permission
    /// problems get their own variant so callers can give precise advice.
    pub fn privileged(source: std::io::Error, path: &Path, operation: &str) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            Self::Permission {
                operation: operation.to_string(),
                path: path.display().to_string(),
            }
        } else {
            Self::Io {
                source,
                path: Some(path.into()),
                operation: operation.to_string(),
            }
        }
    }

    pub(crate) fn io(source: std::io::Error, path: &Path, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
            operation: operation.into(),
        }
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, Error>;
