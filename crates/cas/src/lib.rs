//! Content-addressed artifact storage for strata.
//!
//! Artifacts are filesystem trees indexed by an element cache key. Each key
//! maps to a directory holding the tree plus a small metadata record, laid
//! out under a two-level fan-out to avoid huge flat directories:
//!
//! ```text
//! <root>/
//!   objects/
//!     ab/
//!       cd/
//!         abcdef0123.../    (one artifact)
//!           files/          (the tree)
//!           artifact.json   (metadata)
//!   staging/                (same-filesystem commit staging)
//! ```
//!
//! Commits stage into `staging/` and finish with a single `rename`, so a
//! key is either fully present or absent, never partial. A concurrent
//! duplicate commit loses the rename race and becomes a no-op.

mod error;
mod remote;
mod store;

pub use error::{Error, Result};
pub use remote::{ArtifactRemote, DirectoryRemote};
pub use store::{ArtifactMeta, ArtifactStore};
