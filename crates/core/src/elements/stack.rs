//! The `stack` element kind: stage dependencies and sources, run commands,
//! collect the install root.

use crate::element::Element;
use crate::plugin::{BuildRecipe, CollectMode, ElementPlugin};
use crate::project::Project;
use crate::{Error, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct StackConfig {
    /// Shell commands run inside the sandbox, in order.
    #[serde(default)]
    commands: Vec<String>,
}

fn parse_config(element: &Element) -> Result<StackConfig> {
    if element.config.is_null() {
        return Ok(StackConfig::default());
    }
    serde_yaml::from_value(element.config.clone()).map_err(|e| {
        Error::load(format!(
            "Element '{}' has invalid stack configuration: {e}",
            element.name
        ))
    })
}

/// Runs configured commands against staged build dependencies.
pub struct StackElement;

impl ElementPlugin for StackElement {
    fn kind(&self) -> &'static str {
        "stack"
    }

    fn configure(&self, element: &Element) -> Result<()> {
        parse_config(element).map(|_| ())
    }

    fn recipe(&self, element: &Element, _project: &Project) -> Result<BuildRecipe> {
        let config = parse_config(element)?;
        Ok(BuildRecipe {
            commands: config.commands,
            stage_sources: true,
            collect: CollectMode::InstallRoot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn element(config: &str) -> Element {
        Element::new(
            "e.stack".into(),
            "stack".into(),
            Vec::new(),
            Vec::new(),
            serde_yaml::from_str(config).unwrap(),
            BTreeMap::new(),
        )
    }

    #[test]
    fn commands_flow_into_the_recipe() {
        let e = element("commands:\n  - make\n  - make install\n");
        let recipe = StackElement
            .recipe(&e, &crate::project::tests_project())
            .unwrap();
        assert_eq!(recipe.commands, vec!["make", "make install"]);
        assert!(recipe.stage_sources);
        assert_eq!(recipe.collect, CollectMode::InstallRoot);
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let e = element("comands: [typo]\n");
        assert!(StackElement.configure(&e).is_err());
    }

    #[test]
    fn null_config_is_accepted() {
        let mut e = element("commands: []");
        e.config = serde_yaml::Value::Null;
        assert!(StackElement.configure(&e).is_ok());
    }
}
