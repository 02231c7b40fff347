//! Sources: the fetchable inputs of an element.

use crate::Consistency;
use serde::{Deserialize, Serialize};

/// A source descriptor as written in an element file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SourceDescriptor {
    /// The source kind, resolved through the plugin registry.
    pub kind: String,
    /// The user-visible URL, possibly using an `alias:` prefix.
    pub url: String,
    /// The pinned immutable ref, when stored inline.
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
}

/// A source attached to a loaded element.
///
/// The consistency value only moves up the lattice during a scheduler run;
/// `Cached` is absorbing.
#[derive(Debug, Clone)]
pub struct Source {
    /// The source kind.
    pub kind: String,
    /// The URL as written, aliases unresolved.
    pub url: String,
    /// The pinned immutable ref, if any.
    reference: Option<String>,
    /// Position within the owning element's source list.
    pub index: usize,
    consistency: Consistency,
}

impl Source {
    /// Build a source from its descriptor.
    #[must_use]
    pub fn from_descriptor(descriptor: &SourceDescriptor, index: usize) -> Self {
        let consistency = if descriptor.reference.is_some() {
            Consistency::Resolved
        } else {
            Consistency::Inconsistent
        };
        Self {
            kind: descriptor.kind.clone(),
            url: descriptor.url.clone(),
            reference: descriptor.reference.clone(),
            index,
            consistency,
        }
    }

    /// The pinned ref, if resolved.
    #[must_use]
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    /// Current lattice position.
    #[must_use]
    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    /// Pin a new ref, moving to at least `Resolved`.
    pub fn set_reference(&mut self, reference: String) {
        self.reference = Some(reference);
        self.bump_consistency(Consistency::Resolved);
    }

    /// Raise consistency; downward transitions are ignored.
    pub fn bump_consistency(&mut self, consistency: Consistency) {
        self.consistency = self.consistency.max(consistency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(reference: Option<&str>) -> SourceDescriptor {
        SourceDescriptor {
            kind: "tar".into(),
            url: "upstream:foo.tar".into(),
            reference: reference.map(String::from),
        }
    }

    #[test]
    fn unresolved_source_starts_inconsistent() {
        let source = Source::from_descriptor(&descriptor(None), 0);
        assert_eq!(source.consistency(), Consistency::Inconsistent);
        assert!(source.reference().is_none());
    }

    #[test]
    fn inline_ref_starts_resolved() {
        let source = Source::from_descriptor(&descriptor(Some("abc")), 0);
        assert_eq!(source.consistency(), Consistency::Resolved);
        assert_eq!(source.reference(), Some("abc"));
    }

    #[test]
    fn consistency_never_decreases() {
        let mut source = Source::from_descriptor(&descriptor(Some("abc")), 0);
        source.bump_consistency(Consistency::Cached);
        source.bump_consistency(Consistency::Resolved);
        assert_eq!(source.consistency(), Consistency::Cached);
    }

    #[test]
    fn tracking_pins_a_ref() {
        let mut source = Source::from_descriptor(&descriptor(None), 0);
        source.set_reference("deadbeef".into());
        assert_eq!(source.consistency(), Consistency::Resolved);
        assert_eq!(source.reference(), Some("deadbeef"));
    }
}
