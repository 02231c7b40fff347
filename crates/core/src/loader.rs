//! Element file loading: YAML descriptors into a validated [`ElementSet`].

use crate::element::{DepType, Dependency, Element, ElementSet};
use crate::plugin::{Registry, SourceContext};
use crate::project::{Project, RefStorage};
use crate::refs::ProjectRefs;
use crate::source::{Source, SourceDescriptor};
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DepDescriptor {
    Name(String),
    Full {
        filename: String,
        #[serde(rename = "type", default)]
        dep_type: Option<DepType>,
        #[serde(default)]
        junction: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct ElementDescriptor {
    kind: String,
    #[serde(default)]
    sources: Vec<SourceDescriptor>,
    #[serde(default)]
    depends: Vec<DepDescriptor>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    /// Everything else is kind-specific configuration.
    #[serde(flatten)]
    config: BTreeMap<String, serde_yaml::Value>,
}

/// Load the goal elements and their transitive dependencies.
///
/// # Errors
///
/// Returns a load error for malformed element files, unknown kinds,
/// unresolved dependency references or dependency cycles.
pub fn load_elements(
    project: &Project,
    registry: &Registry,
    targets: &[String],
) -> Result<ElementSet> {
    registry.check_origins(project)?;

    let refs = match project.ref_storage {
        RefStorage::ProjectRefs => Some(ProjectRefs::load(&project.directory)?),
        RefStorage::Inline => None,
    };

    let mirror_dir = project.mirror_dir();
    let mut elements = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = targets.iter().cloned().collect();

    while let Some(name) = queue.pop_front() {
        if !seen.insert(name.clone()) {
            continue;
        }
        let element = load_one(project, registry, refs.as_ref(), &mirror_dir, &name)?;
        for dep in &element.dependencies {
            queue.push_back(dep.name.clone());
        }
        elements.push(element);
    }

    debug!(count = elements.len(), "Loaded element graph");
    ElementSet::new(elements).map_err(|e| Error::load(e.to_string()))
}

fn load_one(
    project: &Project,
    registry: &Registry,
    refs: Option<&ProjectRefs>,
    mirror_dir: &Path,
    name: &str,
) -> Result<Element> {
    let path = project.element_path.join(name);
    let text = fs::read_to_string(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::load(format!(
            "Element '{name}' not found in '{}'",
            project.element_path.display()
        )),
        _ => Error::io(e, &path, "read"),
    })?;
    let descriptor: ElementDescriptor =
        serde_yaml::from_str(&text).map_err(|e| Error::load_in(&path, e.to_string()))?;

    let mut dependencies = Vec::new();
    for dep in &descriptor.depends {
        let (filename, dep_type) = match dep {
            DepDescriptor::Name(filename) => (filename.clone(), DepType::All),
            DepDescriptor::Full {
                filename,
                dep_type,
                junction,
            } => {
                if junction.is_some() {
                    return Err(Error::load_in(
                        &path,
                        format!("Element '{name}': junction dependencies are not supported"),
                    ));
                }
                (filename.clone(), dep_type.unwrap_or(DepType::All))
            }
        };
        dependencies.push(Dependency {
            name: filename,
            dep_type,
        });
    }

    let mut sources = Vec::new();
    for (index, desc) in descriptor.sources.iter().enumerate() {
        let mut source = Source::from_descriptor(desc, index);
        if let Some(refs) = refs {
            // With project.refs storage, inline refs are not consulted
            match refs.lookup(name, index) {
                Some(reference) => {
                    let mut fresh = Source::from_descriptor(
                        &SourceDescriptor {
                            kind: desc.kind.clone(),
                            url: desc.url.clone(),
                            reference: None,
                        },
                        index,
                    );
                    fresh.set_reference(reference.to_string());
                    source = fresh;
                }
                None => {
                    source = Source::from_descriptor(
                        &SourceDescriptor {
                            kind: desc.kind.clone(),
                            url: desc.url.clone(),
                            reference: None,
                        },
                        index,
                    );
                }
            }
        }
        sources.push(source);
    }

    let config = substitute_variables(&config_value(descriptor.config), project, name)?;
    let environment = project.merged_environment(&descriptor.environment);

    let mut element = Element::new(
        name.to_string(),
        descriptor.kind.clone(),
        sources,
        dependencies,
        config,
        environment,
    );

    // Kind validation and load-time source resolution
    let plugin = registry.element(&element.kind)?;
    plugin.configure(&element)?;
    let ctx = SourceContext {
        project,
        element: name,
        mirror_dir,
    };
    for source in &mut element.sources {
        let source_plugin = registry.source(&source.kind)?;
        source_plugin.resolve_at_load(source, &ctx)?;
    }

    Ok(element)
}

fn config_value(config: BTreeMap<String, serde_yaml::Value>) -> serde_yaml::Value {
    if config.is_empty() {
        return serde_yaml::Value::Null;
    }
    let mut mapping = serde_yaml::Mapping::new();
    for (key, value) in config {
        mapping.insert(serde_yaml::Value::String(key), value);
    }
    serde_yaml::Value::Mapping(mapping)
}

/// Substitute `%{name}` occurrences in every string of a configuration
/// value against the project variables.
fn substitute_variables(
    value: &serde_yaml::Value,
    project: &Project,
    element: &str,
) -> Result<serde_yaml::Value> {
    match value {
        serde_yaml::Value::String(s) => Ok(serde_yaml::Value::String(substitute_string(
            s, project, element,
        )?)),
        serde_yaml::Value::Sequence(items) => Ok(serde_yaml::Value::Sequence(
            items
                .iter()
                .map(|v| substitute_variables(v, project, element))
                .collect::<Result<_>>()?,
        )),
        serde_yaml::Value::Mapping(mapping) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in mapping {
                out.insert(k.clone(), substitute_variables(v, project, element)?);
            }
            Ok(serde_yaml::Value::Mapping(out))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(value: &str, project: &Project, element: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("%{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let Some(end) = tail.find('}') else {
            return Err(Error::load(format!(
                "Element '{element}': unterminated variable reference in '{value}'"
            )));
        };
        let name = &tail[..end];
        match project.variables.get(name) {
            Some(substitution) => out.push_str(substitution),
            None => {
                return Err(Error::load(format!(
                    "Element '{element}': unresolved variable '%{{{name}}}'"
                )));
            }
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
