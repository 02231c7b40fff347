//! Plugin registry for source and element kinds.
//!
//! Kinds are resolved through a registry populated at startup; the built-in
//! kinds are registered by [`Registry::with_builtins`] and third-party
//! plugins implement the same traits. Variants are enumerated at
//! registration time, never discovered at runtime.

use crate::element::Element;
use crate::project::{Project, PluginOrigin, PluginOriginKind};
use crate::source::Source;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Everything a source plugin needs besides the source itself.
pub struct SourceContext<'a> {
    /// The owning project, for alias translation and paths.
    pub project: &'a Project,
    /// Name of the owning element, for error attribution.
    pub element: &'a str,
    /// Directory where fetched payloads are mirrored.
    pub mirror_dir: &'a Path,
}

/// Capability set of a source kind: configure, track, fetch, stage.
pub trait SourcePlugin: Send + Sync {
    /// The kind string this plugin handles.
    fn kind(&self) -> &'static str;

    /// Format version folded into cache keys.
    fn format_version(&self) -> u32 {
        0
    }

    /// Pin a new immutable ref for the source.
    fn track(&self, source: &Source, ctx: &SourceContext<'_>) -> Result<String>;

    /// Ensure the payload for the pinned ref is present in the mirror.
    fn fetch(&self, source: &Source, ctx: &SourceContext<'_>) -> Result<()>;

    /// Stage the payload into a directory tree.
    fn stage(&self, source: &Source, ctx: &SourceContext<'_>, target: &Path) -> Result<()>;

    /// Hook run at load time; kinds whose refs are derivable without
    /// network access (e.g. local trees) resolve themselves here.
    fn resolve_at_load(&self, _source: &mut Source, _ctx: &SourceContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// How a build's output tree is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectMode {
    /// Collect the configured install root.
    InstallRoot,
    /// Collect the whole staged root (composition kinds).
    StagedRoot,
}

/// What a kind wants done inside the sandbox.
#[derive(Debug, Clone)]
pub struct BuildRecipe {
    /// Shell commands run in order; an empty list skips sandbox execution.
    pub commands: Vec<String>,
    /// Whether element sources are staged into the build directory.
    pub stage_sources: bool,
    /// How the artifact tree is collected afterwards.
    pub collect: CollectMode,
}

/// Capability set of an element kind: configure and assemble.
pub trait ElementPlugin: Send + Sync {
    /// The kind string this plugin handles.
    fn kind(&self) -> &'static str;

    /// Format version folded into cache keys.
    fn format_version(&self) -> u32 {
        0
    }

    /// Validate the kind-specific configuration; unknown options are a
    /// load error.
    fn configure(&self, element: &Element) -> Result<()>;

    /// Produce the build recipe for an element.
    fn recipe(&self, element: &Element, project: &Project) -> Result<BuildRecipe>;
}

/// The kind registry.
pub struct Registry {
    sources: BTreeMap<&'static str, Arc<dyn SourcePlugin>>,
    elements: BTreeMap<&'static str, Arc<dyn ElementPlugin>>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: BTreeMap::new(),
            elements: BTreeMap::new(),
        }
    }

    /// A registry with the built-in kinds registered: `local` and `tar`
    /// sources, `stack` and `compose` elements.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_source(Arc::new(crate::sources::LocalSource));
        registry.register_source(Arc::new(crate::sources::TarSource));
        registry.register_element(Arc::new(crate::elements::StackElement));
        registry.register_element(Arc::new(crate::elements::ComposeElement));
        registry
    }

    /// Register a source kind; later registrations win.
    pub fn register_source(&mut self, plugin: Arc<dyn SourcePlugin>) {
        self.sources.insert(plugin.kind(), plugin);
    }

    /// Register an element kind; later registrations win.
    pub fn register_element(&mut self, plugin: Arc<dyn ElementPlugin>) {
        self.elements.insert(plugin.kind(), plugin);
    }

    /// Resolve a source kind.
    pub fn source(&self, kind: &str) -> Result<Arc<dyn SourcePlugin>> {
        self.sources
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::plugin(kind, "no such source kind"))
    }

    /// Resolve an element kind.
    pub fn element(&self, kind: &str) -> Result<Arc<dyn ElementPlugin>> {
        self.elements
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::plugin(kind, "no such element kind"))
    }

    /// Validate the project's plugin origin declarations against this
    /// registry. Only `core` origins are supported.
    pub fn check_origins(&self, project: &Project) -> Result<()> {
        for origin in &project.plugins {
            match origin.origin {
                PluginOriginKind::Core => self.check_core_origin(origin)?,
                PluginOriginKind::Local => {
                    return Err(Error::plugin(
                        origin.path.as_deref().unwrap_or("local"),
                        "local plugin origins are not supported",
                    ));
                }
                PluginOriginKind::Pip => {
                    return Err(Error::plugin(
                        origin.package_name.as_deref().unwrap_or("pip"),
                        "pip plugin origins are not supported",
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_core_origin(&self, origin: &PluginOrigin) -> Result<()> {
        for (kind, version) in &origin.sources {
            let plugin = self.source(kind)?;
            if plugin.format_version() < *version {
                return Err(Error::plugin(
                    kind.clone(),
                    format!(
                        "project requires source format version {version}, built-in provides {}",
                        plugin.format_version()
                    ),
                ));
            }
        }
        for (kind, version) in &origin.elements {
            let plugin = self.element(kind)?;
            if plugin.format_version() < *version {
                return Err(Error::plugin(
                    kind.clone(),
                    format!(
                        "project requires element format version {version}, built-in provides {}",
                        plugin.format_version()
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
