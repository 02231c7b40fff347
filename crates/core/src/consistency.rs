//! The source consistency lattice.

use serde::{Deserialize, Serialize};

/// How settled a source is, from "nothing pinned" to "present on disk".
///
/// Values form an ordered lattice; per-source transitions are monotonic
/// within a scheduler run and `Cached` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    /// No immutable ref is pinned; the source cannot be fetched or keyed.
    Inconsistent,
    /// A ref is pinned but the payload is not in the local mirror yet.
    Resolved,
    /// The payload is present locally and ready to stage.
    Cached,
}

impl Consistency {
    /// Whether a ref is pinned at this level.
    #[must_use]
    pub fn is_resolved(self) -> bool {
        self >= Consistency::Resolved
    }
}

impl std::fmt::Display for Consistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Consistency::Inconsistent => "inconsistent",
            Consistency::Resolved => "resolved",
            Consistency::Cached => "cached",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_order() {
        assert!(Consistency::Inconsistent < Consistency::Resolved);
        assert!(Consistency::Resolved < Consistency::Cached);
    }

    #[test]
    fn resolved_levels() {
        assert!(!Consistency::Inconsistent.is_resolved());
        assert!(Consistency::Resolved.is_resolved());
        assert!(Consistency::Cached.is_resolved());
    }
}
