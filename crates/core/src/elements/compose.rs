//! The `compose` element kind: an artifact assembled purely from the
//! staged dependency tree.

use crate::element::Element;
use crate::plugin::{BuildRecipe, CollectMode, ElementPlugin};
use crate::project::Project;
use crate::{Error, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ComposeConfig {}

fn parse_config(element: &Element) -> Result<ComposeConfig> {
    if element.config.is_null() {
        return Ok(ComposeConfig::default());
    }
    serde_yaml::from_value(element.config.clone()).map_err(|e| {
        Error::load(format!(
            "Element '{}' has invalid compose configuration: {e}",
            element.name
        ))
    })
}

/// Collects the union of its dependencies' artifacts without running
/// anything. Compose elements take no sources.
pub struct ComposeElement;

impl ElementPlugin for ComposeElement {
    fn kind(&self) -> &'static str {
        "compose"
    }

    fn configure(&self, element: &Element) -> Result<()> {
        if !element.sources.is_empty() {
            return Err(Error::load(format!(
                "Element '{}': compose elements cannot have sources",
                element.name
            )));
        }
        parse_config(element).map(|_| ())
    }

    fn recipe(&self, element: &Element, _project: &Project) -> Result<BuildRecipe> {
        parse_config(element)?;
        Ok(BuildRecipe {
            commands: Vec::new(),
            stage_sources: false,
            collect: CollectMode::StagedRoot,
        })
    }
}
