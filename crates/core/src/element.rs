//! Elements: the nodes of the build DAG.

use crate::{Consistency, Source};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use strata_graph::{ElementGraph, GraphNodeData};

/// How a dependency is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepType {
    /// Needed in the sandbox at build time.
    Build,
    /// Needed to run the resulting artifact.
    Runtime,
    /// Both build and runtime.
    All,
}

impl DepType {
    /// Whether this dependency participates in the build key.
    #[must_use]
    pub fn is_build(self) -> bool {
        matches!(self, DepType::Build | DepType::All)
    }

    /// Whether this dependency participates in the strong key.
    #[must_use]
    pub fn is_runtime(self) -> bool {
        matches!(self, DepType::Runtime | DepType::All)
    }
}

/// A declared dependency edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// The depended-on element's file name.
    pub name: String,
    /// How the dependency is consumed.
    pub dep_type: DepType,
}

/// A loaded element.
///
/// Elements are passive state: queues drive every transition, and the
/// derived observers (`consistency`, `cached`, `buildable`) recompute from
/// current state rather than caching values across queue events.
#[derive(Debug, Clone)]
pub struct Element {
    /// Project-qualified element name (its file name within `element-path`).
    pub name: String,
    /// The element kind, resolved through the plugin registry.
    pub kind: String,
    /// Ordered source list.
    pub sources: Vec<Source>,
    /// Declared dependencies, in declaration order.
    pub dependencies: Vec<Dependency>,
    /// Kind-specific configuration after variable substitution.
    pub config: serde_yaml::Value,
    /// Sandbox environment: project environment merged with the element's.
    pub environment: BTreeMap<String, String>,

    cached: bool,
    remote_cached: bool,
    cache_key: Option<String>,
    strong_key: Option<String>,
    failed: bool,
}

impl Element {
    /// Create a fresh element with no state bits set.
    #[must_use]
    pub fn new(
        name: String,
        kind: String,
        sources: Vec<Source>,
        dependencies: Vec<Dependency>,
        config: serde_yaml::Value,
        environment: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name,
            kind,
            sources,
            dependencies,
            config,
            environment,
            cached: false,
            remote_cached: false,
            cache_key: None,
            strong_key: None,
            failed: false,
        }
    }

    /// Names of build-time dependencies, in declaration order.
    pub fn build_dep_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|d| d.dep_type.is_build())
            .map(|d| d.name.as_str())
    }

    /// Names of runtime dependencies, in declaration order.
    pub fn runtime_dep_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|d| d.dep_type.is_runtime())
            .map(|d| d.name.as_str())
    }

    /// Aggregate source consistency: the minimum over all sources.
    ///
    /// An element without sources has nothing left to settle and reports
    /// `Cached`.
    #[must_use]
    pub fn consistency(&self) -> Consistency {
        self.sources
            .iter()
            .map(Source::consistency)
            .min()
            .unwrap_or(Consistency::Cached)
    }

    /// Whether the artifact is present in the local store.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Record the result of a store membership query.
    pub fn update_cached(&mut self, cached: bool) {
        self.cached = cached;
    }

    /// Whether the artifact is known to exist in a remote store.
    #[must_use]
    pub fn is_remote_cached(&self) -> bool {
        self.remote_cached
    }

    /// Record remote store membership.
    pub fn update_remote_cached(&mut self, remote_cached: bool) {
        self.remote_cached = remote_cached;
    }

    /// The build cache key, when computable.
    #[must_use]
    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    /// The strong key (runtime deps folded in), when computable.
    #[must_use]
    pub fn strong_key(&self) -> Option<&str> {
        self.strong_key.as_deref()
    }

    /// Store freshly computed keys.
    pub fn set_keys(&mut self, cache_key: String, strong_key: String) {
        self.cache_key = Some(cache_key);
        self.strong_key = Some(strong_key);
    }

    /// Whether this element failed in some queue.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Mark the element failed.
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }
}

/// Lightweight graph payload: an element's name and dependency names.
#[derive(Debug, Clone)]
pub struct DepNode {
    deps: Vec<String>,
}

impl GraphNodeData for DepNode {
    fn dependency_names(&self) -> Vec<String> {
        self.deps.clone()
    }
}

/// The loaded element universe: elements plus their dependency graph.
///
/// Elements are created at load and never destroyed; all state transitions
/// mutate elements in place through this set.
#[derive(Debug)]
pub struct ElementSet {
    elements: Vec<Element>,
    index: HashMap<String, usize>,
    graph: ElementGraph<DepNode>,
}

impl ElementSet {
    /// Assemble the set from loaded elements, wiring the dependency graph.
    ///
    /// # Errors
    ///
    /// Returns a graph error if a dependency is missing or the graph is
    /// cyclic.
    pub fn new(elements: Vec<Element>) -> strata_graph::Result<Self> {
        let mut graph = ElementGraph::new();
        for element in &elements {
            graph.add_node(
                &element.name,
                DepNode {
                    deps: element
                        .dependencies
                        .iter()
                        .map(|d| d.name.clone())
                        .collect(),
                },
            );
        }
        graph.add_dependency_edges()?;
        // Surface cycles at load time rather than first traversal
        let _ = graph.topological_sort()?;

        let index = elements
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();

        Ok(Self {
            elements,
            index,
            graph,
        })
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Look up an element index by name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Element by index.
    #[must_use]
    pub fn by_index(&self, index: usize) -> &Element {
        &self.elements[index]
    }

    /// Mutable element by index.
    pub fn by_index_mut(&mut self, index: usize) -> &mut Element {
        &mut self.elements[index]
    }

    /// Element by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Element> {
        self.index.get(name).map(|&i| &self.elements[i])
    }

    /// Mutable element by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.index.get(name).copied().map(|i| &mut self.elements[i])
    }

    /// Iterate all elements.
    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    /// The transitive dependency closure of the goals, topologically ordered.
    pub fn closure(&self, goals: &[String]) -> strata_graph::Result<Vec<String>> {
        self.graph.closure(goals)
    }

    /// Direct reverse dependencies of an element.
    pub fn dependents_of(&self, name: &str) -> strata_graph::Result<Vec<String>> {
        self.graph.dependents_of(name)
    }

    /// All element names in topological order.
    pub fn topological_names(&self) -> strata_graph::Result<Vec<String>> {
        Ok(self
            .graph
            .topological_sort()?
            .into_iter()
            .map(|n| n.name)
            .collect())
    }
}
