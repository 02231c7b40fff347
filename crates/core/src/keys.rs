//! The cache-key engine.
//!
//! An element's cache key is the SHA-256 of a canonical JSON document built
//! from everything that can alter its build: kind and plugin format
//! versions, resolved configuration, ordered source identities, ordered
//! build-dependency keys, the filtered sandbox environment, option values
//! and the project's own key. Mappings serialize in sorted key order, so
//! identical inputs produce byte-identical keys on any host.
//!
//! Runtime-only dependencies are excluded from the build key but folded
//! into a separate strong key; only the build key addresses artifacts.

use crate::element::{Element, ElementSet};
use crate::plugin::Registry;
use crate::project::Project;
use crate::{Error, Result};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// The two keys of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementKeys {
    /// Addresses artifacts; build dependencies only.
    pub cache_key: String,
    /// Also covers runtime dependencies.
    pub strong_key: String,
}

/// Hash a canonical document into a hex-encoded key.
pub fn generate_key(doc: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(doc)
        .map_err(|e| Error::load(format!("Failed to serialize key document: {e}")))?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

/// The project's contribution to element keys.
#[must_use]
pub fn project_key(format_version: u32, options: &BTreeMap<String, String>) -> String {
    let doc = json!({
        "format-version": format_version,
        "options": options,
    });
    // Serialization of a string-keyed document cannot fail
    generate_key(&doc).unwrap_or_default()
}

/// Compute an element's keys, given its dependencies' cache keys.
///
/// Returns `Ok(None)` when the element is not yet fingerprintable: a source
/// ref is unresolved or a dependency key is still absent.
pub fn element_keys(
    project: &Project,
    element: &Element,
    registry: &Registry,
    dep_keys: &HashMap<String, String>,
) -> Result<Option<ElementKeys>> {
    let element_plugin = registry.element(&element.kind)?;

    // Ordered source identities; any unresolved ref makes the key absent
    let mut sources = Vec::with_capacity(element.sources.len());
    for source in &element.sources {
        let plugin = registry.source(&source.kind)?;
        let Some(reference) = source.reference() else {
            trace!(
                element = %element.name,
                url = %source.url,
                "Key absent: source ref unresolved"
            );
            return Ok(None);
        };
        sources.push(json!({
            "kind": source.kind,
            "format-version": plugin.format_version(),
            "ref": reference,
        }));
    }

    let mut build_deps = Vec::new();
    for name in element.build_dep_names() {
        match dep_keys.get(name) {
            Some(key) => build_deps.push(json!({ "name": name, "key": key })),
            None => return Ok(None),
        }
    }
    let mut runtime_deps = Vec::new();
    for name in element.runtime_dep_names() {
        match dep_keys.get(name) {
            Some(key) => runtime_deps.push(json!({ "name": name, "key": key })),
            None => return Ok(None),
        }
    }

    // Sandbox environment with the nocache filter applied
    let environment: BTreeMap<&String, &String> = element
        .environment
        .iter()
        .filter(|(name, _)| !project.env_nocache.contains(name))
        .collect();

    let config = serde_json::to_value(&element.config)
        .map_err(|e| Error::load(format!("Element '{}' configuration is not keyable: {e}", element.name)))?;

    let document = json!({
        "kind": element.kind,
        "format-version": element_plugin.format_version(),
        "config": config,
        "sources": sources,
        "build-deps": build_deps,
        "environment": environment,
        "options": project.options,
        "project": project.cache_key(),
    });
    let cache_key = generate_key(&document)?;

    let strong_document = json!({
        "cache-key": cache_key,
        "runtime-deps": runtime_deps,
    });
    let strong_key = generate_key(&strong_document)?;

    Ok(Some(ElementKeys {
        cache_key,
        strong_key,
    }))
}

/// Walk the whole set in topological order and fill in every key that has
/// become computable. Keys already present are left untouched; they are
/// stable for the rest of the run.
pub fn compute_keys(set: &mut ElementSet, project: &Project, registry: &Registry) -> Result<()> {
    let order = set
        .topological_names()
        .map_err(|e| Error::load(e.to_string()))?;
    let mut known: HashMap<String, String> = set
        .iter()
        .filter_map(|e| e.cache_key().map(|k| (e.name.clone(), k.to_string())))
        .collect();

    for name in order {
        let Some(index) = set.index_of(&name) else {
            continue;
        };
        if set.by_index(index).cache_key().is_some() {
            continue;
        }
        let keys = element_keys(project, set.by_index(index), registry, &known)?;
        if let Some(keys) = keys {
            known.insert(name.clone(), keys.cache_key.clone());
            set.by_index_mut(index)
                .set_keys(keys.cache_key, keys.strong_key);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{DepType, Dependency};
    use crate::source::{Source, SourceDescriptor};
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> (TempDir, Project) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("elements")).unwrap();
        fs::write(
            dir.path().join("project.conf"),
            "name: keytest\nelement-path: elements\nenvironment:\n  PATH: /usr/bin\nenvironment-nocache: [NOISY]\n",
        )
        .unwrap();
        let project = Project::load(dir.path(), &BTreeMap::new()).unwrap();
        (dir, project)
    }

    fn source(url: &str, reference: Option<&str>) -> Source {
        Source::from_descriptor(
            &SourceDescriptor {
                kind: "tar".into(),
                url: url.into(),
                reference: reference.map(String::from),
            },
            0,
        )
    }

    fn element_with(config: serde_yaml::Value, sources: Vec<Source>) -> Element {
        let mut env = BTreeMap::new();
        env.insert("PATH".to_string(), "/usr/bin".to_string());
        Element::new(
            "app.stack".into(),
            "stack".into(),
            sources,
            Vec::new(),
            config,
            env,
        )
    }

    #[test]
    fn keys_are_deterministic() {
        let (_dir, project) = project();
        let registry = Registry::with_builtins();
        let element = element_with(
            serde_yaml::from_str("commands: [make]").unwrap(),
            vec![source("upstream:a.tar", Some("abc"))],
        );
        let k1 = element_keys(&project, &element, &registry, &HashMap::new())
            .unwrap()
            .unwrap();
        let k2 = element_keys(&project, &element, &registry, &HashMap::new())
            .unwrap()
            .unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.cache_key.len(), 64);
    }

    #[test]
    fn mapping_insertion_order_does_not_matter() {
        let (_dir, project) = project();
        let registry = Registry::with_builtins();
        let a = element_with(
            serde_yaml::from_str("commands: [make]\nvariables:\n  a: 1\n  b: 2\n").unwrap(),
            vec![],
        );
        let b = element_with(
            serde_yaml::from_str("variables:\n  b: 2\n  a: 1\ncommands: [make]\n").unwrap(),
            vec![],
        );
        let ka = element_keys(&project, &a, &registry, &HashMap::new())
            .unwrap()
            .unwrap();
        let kb = element_keys(&project, &b, &registry, &HashMap::new())
            .unwrap()
            .unwrap();
        assert_eq!(ka.cache_key, kb.cache_key);
    }

    #[test]
    fn unresolved_source_means_absent_key() {
        let (_dir, project) = project();
        let registry = Registry::with_builtins();
        let element = element_with(
            serde_yaml::Value::Null,
            vec![source("upstream:a.tar", None)],
        );
        assert!(
            element_keys(&project, &element, &registry, &HashMap::new())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn nocache_environment_is_filtered() {
        let (_dir, project) = project();
        let registry = Registry::with_builtins();
        let mut a = element_with(serde_yaml::Value::Null, vec![]);
        let mut b = element_with(serde_yaml::Value::Null, vec![]);
        a.environment
            .insert("NOISY".to_string(), "one".to_string());
        b.environment
            .insert("NOISY".to_string(), "two".to_string());
        let ka = element_keys(&project, &a, &registry, &HashMap::new())
            .unwrap()
            .unwrap();
        let kb = element_keys(&project, &b, &registry, &HashMap::new())
            .unwrap()
            .unwrap();
        assert_eq!(ka.cache_key, kb.cache_key);

        // A cached variable does move the key
        a.environment
            .insert("PATH".to_string(), "/other".to_string());
        let kc = element_keys(&project, &a, &registry, &HashMap::new())
            .unwrap()
            .unwrap();
        assert_ne!(ka.cache_key, kc.cache_key);
    }

    #[test]
    fn runtime_deps_affect_strong_key_only() {
        let (_dir, project) = project();
        let registry = Registry::with_builtins();
        let mut deps = HashMap::new();
        deps.insert("run.stack".to_string(), "k-run".to_string());
        deps.insert("build.stack".to_string(), "k-build".to_string());

        let mut with_runtime = element_with(serde_yaml::Value::Null, vec![]);
        with_runtime.dependencies.push(Dependency {
            name: "run.stack".into(),
            dep_type: DepType::Runtime,
        });
        let mut without = element_with(serde_yaml::Value::Null, vec![]);

        let ka = element_keys(&project, &with_runtime, &registry, &deps)
            .unwrap()
            .unwrap();
        let kb = element_keys(&project, &without, &registry, &deps)
            .unwrap()
            .unwrap();
        assert_eq!(ka.cache_key, kb.cache_key);
        assert_ne!(ka.strong_key, kb.strong_key);

        // Build deps shift the cache key
        without.dependencies.push(Dependency {
            name: "build.stack".into(),
            dep_type: DepType::Build,
        });
        let kc = element_keys(&project, &without, &registry, &deps)
            .unwrap()
            .unwrap();
        assert_ne!(ka.cache_key, kc.cache_key);
    }

    #[test]
    fn missing_dep_key_means_absent() {
        let (_dir, project) = project();
        let registry = Registry::with_builtins();
        let mut element = element_with(serde_yaml::Value::Null, vec![]);
        element.dependencies.push(Dependency {
            name: "base.stack".into(),
            dep_type: DepType::Build,
        });
        assert!(
            element_keys(&project, &element, &registry, &HashMap::new())
                .unwrap()
                .is_none()
        );
    }
}
