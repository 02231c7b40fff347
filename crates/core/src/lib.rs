//! Core types for the strata build system.
//!
//! This crate holds the data model shared by the scheduler, the artifact
//! store and the CLI: projects, elements and their sources, the source
//! consistency lattice, the deterministic cache-key engine, the element
//! loader and the plugin registry for source and element kinds.

pub mod consistency;
pub mod digest;
pub mod element;
mod error;
pub mod keys;
pub mod loader;
pub mod plugin;
pub mod project;
pub mod refs;
pub mod source;

mod elements;
mod sources;

pub use consistency::Consistency;
pub use element::{DepType, Dependency, Element, ElementSet};
pub use error::{Error, Result};
pub use keys::{ElementKeys, compute_keys};
pub use loader::load_elements;
pub use plugin::{BuildRecipe, CollectMode, ElementPlugin, Registry, SourceContext, SourcePlugin};
pub use project::{HostMount, Project, RefStorage, RemoteSpec};
pub use source::Source;
