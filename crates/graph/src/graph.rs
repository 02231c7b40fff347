//! Element graph builder using petgraph.
//!
//! Edges run from a dependency to its dependent, so topological order yields
//! dependencies before the elements that need them, and the out-neighbors of
//! a node are exactly its reverse dependencies.

use crate::{Error, GraphNodeData, Result};
use petgraph::Direction;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::IntoNodeReferences;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A node in the element graph.
#[derive(Debug, Clone)]
pub struct GraphNode<T> {
    /// Name of the element.
    pub name: String,
    /// The element payload.
    pub data: T,
}

/// Element graph for dependency resolution and build ordering.
#[derive(Debug)]
pub struct ElementGraph<T: GraphNodeData> {
    graph: DiGraph<GraphNode<T>, ()>,
    name_to_node: HashMap<String, NodeIndex>,
}

impl<T: GraphNodeData> ElementGraph<T> {
    /// Create a new empty element graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            name_to_node: HashMap::new(),
        }
    }

    /// Number of elements in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Whether an element with this name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.name_to_node.contains_key(name)
    }

    /// Add a single element to the graph.
    ///
    /// If an element with the same name already exists, returns the existing
    /// node index without replacing the payload.
    pub fn add_node(&mut self, name: &str, data: T) -> NodeIndex {
        if let Some(&node) = self.name_to_node.get(name) {
            return node;
        }

        let node = GraphNode {
            name: name.to_string(),
            data,
        };

        let node_index = self.graph.add_node(node);
        self.name_to_node.insert(name.to_string(), node_index);
        debug!("Added element node '{}'", name);

        node_index
    }

    /// Get a reference to an element node by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&GraphNode<T>> {
        self.name_to_node
            .get(name)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Add dependency edges after all elements have been added.
    ///
    /// # Errors
    ///
    /// Returns an error if any element depends on a non-existent element.
    pub fn add_dependency_edges(&mut self) -> Result<()> {
        let mut missing_deps = Vec::new();
        let mut edges_to_add = Vec::new();

        for (node_index, node) in self.graph.node_references() {
            for dep_name in node.data.dependency_names() {
                if let Some(&dep_node_index) = self.name_to_node.get(&dep_name) {
                    edges_to_add.push((dep_node_index, node_index));
                } else {
                    missing_deps.push((node.name.clone(), dep_name));
                }
            }
        }

        if !missing_deps.is_empty() {
            return Err(Error::MissingDependencies {
                missing: missing_deps,
            });
        }

        for (from, to) in edges_to_add {
            self.graph.add_edge(from, to, ());
        }

        Ok(())
    }

    /// Check if the graph has cycles.
    #[must_use]
    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Get the topologically sorted list of elements, dependencies first.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains cycles.
    pub fn topological_sort(&self) -> Result<Vec<GraphNode<T>>> {
        match toposort(&self.graph, None) {
            Ok(sorted_indices) => Ok(sorted_indices
                .into_iter()
                .map(|idx| self.graph[idx].clone())
                .collect()),
            Err(cycle) => {
                let name = self
                    .graph
                    .node_weight(cycle.node_id())
                    .map_or_else(|| "<unknown>".to_string(), |n| n.name.clone());
                Err(Error::CycleDetected {
                    message: format!("cycle passes through element '{name}'"),
                })
            }
        }
    }

    /// Names of the elements that directly depend on `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not in the graph.
    pub fn dependents_of(&self, name: &str) -> Result<Vec<String>> {
        let &idx = self
            .name_to_node
            .get(name)
            .ok_or_else(|| Error::UnknownElement {
                name: name.to_string(),
            })?;
        Ok(self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .filter_map(|n| self.graph.node_weight(n).map(|w| w.name.clone()))
            .collect())
    }

    /// Names of the elements that `name` directly depends on.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not in the graph.
    pub fn dependencies_of(&self, name: &str) -> Result<Vec<String>> {
        let &idx = self
            .name_to_node
            .get(name)
            .ok_or_else(|| Error::UnknownElement {
                name: name.to_string(),
            })?;
        Ok(self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .filter_map(|n| self.graph.node_weight(n).map(|w| w.name.clone()))
            .collect())
    }

    /// The transitive dependency closure of the goal elements, in
    /// topological order (dependencies first, goals last).
    ///
    /// # Errors
    ///
    /// Returns an error if a goal is unknown or the graph has cycles.
    pub fn closure(&self, goals: &[String]) -> Result<Vec<String>> {
        let mut wanted = HashSet::new();
        let mut stack = Vec::new();

        for goal in goals {
            let &idx = self
                .name_to_node
                .get(goal)
                .ok_or_else(|| Error::UnknownElement { name: goal.clone() })?;
            stack.push(idx);
        }

        while let Some(idx) = stack.pop() {
            if !wanted.insert(idx) {
                continue;
            }
            for dep in self.graph.neighbors_directed(idx, Direction::Incoming) {
                stack.push(dep);
            }
        }

        let sorted = self.topological_sort()?;
        Ok(sorted
            .into_iter()
            .filter(|node| {
                self.name_to_node
                    .get(&node.name)
                    .is_some_and(|idx| wanted.contains(idx))
            })
            .map(|node| node.name)
            .collect())
    }
}

impl<T: GraphNodeData> Default for ElementGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Node {
        deps: Vec<String>,
    }

    impl Node {
        fn new(deps: &[&str]) -> Self {
            Self {
                deps: deps.iter().map(|s| (*s).to_string()).collect(),
            }
        }
    }

    impl GraphNodeData for Node {
        fn dependency_names(&self) -> Vec<String> {
            self.deps.clone()
        }
    }

    fn diamond() -> ElementGraph<Node> {
        // base <- lib-a, base <- lib-b, {lib-a, lib-b} <- app
        let mut graph = ElementGraph::new();
        graph.add_node("base", Node::new(&[]));
        graph.add_node("lib-a", Node::new(&["base"]));
        graph.add_node("lib-b", Node::new(&["base"]));
        graph.add_node("app", Node::new(&["lib-a", "lib-b"]));
        graph.add_dependency_edges().unwrap();
        graph
    }

    #[test]
    fn add_node_is_idempotent() {
        let mut graph = ElementGraph::new();
        let a = graph.add_node("base", Node::new(&[]));
        let b = graph.add_node("base", Node::new(&["ignored"]));
        assert_eq!(a, b);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn missing_dependency_is_reported_with_both_names() {
        let mut graph = ElementGraph::new();
        graph.add_node("app", Node::new(&["nonexistent"]));
        let err = graph.add_dependency_edges().unwrap_err();
        match err {
            Error::MissingDependencies { missing } => {
                assert_eq!(
                    missing,
                    vec![("app".to_string(), "nonexistent".to_string())]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn toposort_orders_dependencies_first() {
        let graph = diamond();
        let order: Vec<String> = graph
            .topological_sort()
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("base") < pos("lib-a"));
        assert!(pos("base") < pos("lib-b"));
        assert!(pos("lib-a") < pos("app"));
        assert!(pos("lib-b") < pos("app"));
    }

    #[test]
    fn cycles_are_detected() {
        let mut graph = ElementGraph::new();
        graph.add_node("a", Node::new(&["b"]));
        graph.add_node("b", Node::new(&["a"]));
        graph.add_dependency_edges().unwrap();
        assert!(graph.has_cycles());
        assert!(matches!(
            graph.topological_sort(),
            Err(Error::CycleDetected { .. })
        ));
    }

    #[test]
    fn dependents_are_reverse_edges() {
        let graph = diamond();
        let mut deps = graph.dependents_of("base").unwrap();
        deps.sort();
        assert_eq!(deps, vec!["lib-a".to_string(), "lib-b".to_string()]);
        assert!(graph.dependents_of("app").unwrap().is_empty());
    }

    #[test]
    fn closure_is_transitive_and_ordered() {
        let graph = diamond();
        let closure = graph.closure(&["lib-a".to_string()]).unwrap();
        assert_eq!(closure, vec!["base".to_string(), "lib-a".to_string()]);

        let all = graph.closure(&["app".to_string()]).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all.first().map(String::as_str), Some("base"));
        assert_eq!(all.last().map(String::as_str), Some("app"));
    }

    #[test]
    fn closure_rejects_unknown_goal() {
        let graph = diamond();
        assert!(matches!(
            graph.closure(&["nope".to_string()]),
            Err(Error::UnknownElement { .. })
        ));
    }
}
