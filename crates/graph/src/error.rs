//! Error types for element graph operations.

use std::fmt;

/// Result type for element graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during element graph operations.
#[derive(Debug, Clone)]
pub enum Error {
    /// A dependency cycle was detected in the graph.
    CycleDetected {
        /// Human-readable description of the cycle.
        message: String,
    },

    /// An element depends on another element that doesn't exist.
    MissingDependency {
        /// The element that has the missing dependency.
        element: String,
        /// The name of the missing dependency.
        dependency: String,
    },

    /// Multiple missing dependencies were found.
    MissingDependencies {
        /// List of (element, missing_dependency) pairs.
        missing: Vec<(String, String)>,
    },

    /// An element name was queried that is not in the graph.
    UnknownElement {
        /// The unknown element name.
        name: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleDetected { message } => {
                write!(f, "Cycle detected in element graph: {message}")
            }
            Self::MissingDependency {
                element,
                dependency,
            } => {
                write!(
                    f,
                    "Element '{element}' depends on missing element '{dependency}'"
                )
            }
            Self::MissingDependencies { missing } => {
                let list = missing
                    .iter()
                    .map(|(element, dep)| {
                        format!("Element '{element}' depends on missing element '{dep}'")
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "Missing dependencies: {list}")
            }
            Self::UnknownElement { name } => {
                write!(f, "Unknown element '{name}'")
            }
        }
    }
}

impl std::error::Error for Error {}
