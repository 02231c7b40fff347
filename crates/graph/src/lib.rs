//! Element dependency graph algorithms for strata.
//!
//! This crate provides the directed acyclic graph (DAG) used to order
//! element builds and to answer reverse-dependency queries, built on
//! petgraph.
//!
//! # Key Types
//!
//! - [`ElementGraph`]: the graph structure for building and querying element
//!   dependencies
//! - [`GraphNodeData`]: trait that node payloads must implement
//! - [`GraphNode`]: a node pairing an element name with its payload

mod error;
mod graph;

pub use error::{Error, Result};
pub use graph::{ElementGraph, GraphNode};

/// Trait for element data that can be stored in the dependency graph.
///
/// The returned names are the element's direct dependencies of any type;
/// the graph does not distinguish build from runtime edges, callers that
/// care filter on their own dependency records.
pub trait GraphNodeData: Clone {
    /// Returns the names of elements this element depends on.
    fn dependency_names(&self) -> Vec<String>;
}
