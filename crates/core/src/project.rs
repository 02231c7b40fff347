//! Project configuration: `project.conf` loading and the settings elements
//! inherit from it.

use crate::{Error, Result, keys};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The current `project.conf` format version.
///
/// Bumped whenever the project or element format gains incompatible
/// enhancements.
pub const STRATA_FORMAT_VERSION: u32 = 1;

/// Separator between a URL alias and its body.
const ALIAS_SEPARATOR: char = ':';

/// Where source refs are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RefStorage {
    /// Refs live inline in element files.
    #[default]
    #[serde(rename = "inline")]
    Inline,
    /// Refs live in a separate `project.refs` document.
    #[serde(rename = "project.refs")]
    ProjectRefs,
}

/// A remote artifact cache endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RemoteSpec {
    /// Endpoint location; for directory-backed remotes, a filesystem path.
    pub url: String,
    /// Whether built artifacts may be pushed here.
    #[serde(default)]
    pub push: bool,
}

/// Declaration of a project option.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct OptionDecl {
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Permitted values; unrestricted when absent.
    #[serde(default)]
    pub values: Option<Vec<String>>,
    /// Value used when the invocation does not override the option.
    #[serde(default)]
    pub default: String,
    /// Export the resolved value under this variable name.
    #[serde(default)]
    pub variable: Option<String>,
}

/// Where a group of plugins comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginOriginKind {
    /// Built into strata.
    Core,
    /// Loaded from a project-relative path.
    Local,
    /// Installed as a Python-era package; accepted for compatibility,
    /// rejected at registration.
    Pip,
}

/// One entry of the project's `plugins` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PluginOrigin {
    /// The origin type.
    pub origin: PluginOriginKind,
    /// Source kinds provided by this origin, with their format versions.
    #[serde(default)]
    pub sources: BTreeMap<String, u32>,
    /// Element kinds provided by this origin, with their format versions.
    #[serde(default)]
    pub elements: BTreeMap<String, u32>,
    /// Project-relative path for `local` origins.
    #[serde(default)]
    pub path: Option<String>,
    /// Package name for `pip` origins.
    #[serde(default)]
    pub package_name: Option<String>,
}

/// A host file or directory mounted into interactive shells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMount {
    /// Path inside the sandbox.
    pub path: String,
    /// Path on the host; defaults to `path`.
    pub host_path: String,
    /// Optional mounts do not incur errors when the host path is missing.
    pub optional: bool,
}

impl HostMount {
    /// Build a host mount, expanding environment variables in both paths.
    #[must_use]
    pub fn new(path: &str, host_path: Option<&str>, optional: bool) -> Self {
        let path = expand_host_vars(path);
        let host_path = host_path.map_or_else(|| path.clone(), expand_host_vars);
        Self {
            path,
            host_path,
            optional,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum HostFileDesc {
    Path(String),
    Full {
        path: String,
        #[serde(default)]
        host_path: Option<String>,
        #[serde(default)]
        optional: bool,
    },
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct ShellSection {
    #[serde(default)]
    command: Vec<String>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    #[serde(default)]
    host_files: Vec<HostFileDesc>,
}

/// Resolved interactive-shell defaults.
#[derive(Debug, Clone, Default)]
pub struct Shell {
    /// The interactive shell command line.
    pub command: Vec<String>,
    /// Statically set environment, host-expanded at load.
    pub environment: BTreeMap<String, String>,
    /// Host mounts exposed to interactive shells.
    pub host_files: Vec<HostMount>,
}

/// Sandbox layout defaults, overridable per project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct SandboxDefaults {
    /// Where element sources are staged and commands run.
    #[serde(default = "default_build_dir")]
    pub build_dir: String,
    /// Where build output is collected from.
    #[serde(default = "default_install_dir")]
    pub install_dir: String,
}

fn default_build_dir() -> String {
    "/strata/build".to_string()
}

fn default_install_dir() -> String {
    "/strata/install".to_string()
}

impl Default for SandboxDefaults {
    fn default() -> Self {
        Self {
            build_dir: default_build_dir(),
            install_dir: default_install_dir(),
        }
    }
}

/// The raw `project.conf` document. Unknown keys are rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct ProjectConfig {
    name: String,
    element_path: String,
    #[serde(default)]
    format_version: u32,
    #[serde(default)]
    variables: BTreeMap<String, String>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    #[serde(default)]
    environment_nocache: Vec<String>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
    #[serde(default)]
    plugins: Vec<PluginOrigin>,
    #[serde(default)]
    options: BTreeMap<String, OptionDecl>,
    #[serde(default)]
    artifacts: Vec<RemoteSpec>,
    #[serde(default)]
    fail_on_overlap: bool,
    #[serde(default)]
    ref_storage: RefStorage,
    #[serde(default)]
    shell: ShellSection,
    #[serde(default)]
    sandbox: SandboxDefaults,
    #[serde(default)]
    split_rules: BTreeMap<String, Vec<String>>,
}

/// A loaded project.
#[derive(Debug, Clone)]
pub struct Project {
    /// The project name.
    pub name: String,
    /// Absolute project directory.
    pub directory: PathBuf,
    /// Absolute path elements are loaded from.
    pub element_path: PathBuf,
    /// Project variables, including automatic ones and option exports.
    pub variables: BTreeMap<String, String>,
    /// Base sandbox environment.
    pub environment: BTreeMap<String, String>,
    /// Environment variable names excluded from cache keys.
    pub env_nocache: Vec<String>,
    /// Resolved option values by option name.
    pub options: BTreeMap<String, String>,
    /// Remote artifact cache endpoints.
    pub remotes: Vec<RemoteSpec>,
    /// Whether overlapping staged files fail the build.
    pub fail_on_overlap: bool,
    /// Where source refs are stored.
    pub ref_storage: RefStorage,
    /// Interactive shell defaults.
    pub shell: Shell,
    /// Sandbox layout defaults.
    pub sandbox: SandboxDefaults,
    /// Split-rule domains.
    pub split_rules: BTreeMap<String, Vec<String>>,
    /// Plugin origin declarations.
    pub plugins: Vec<PluginOrigin>,

    aliases: BTreeMap<String, String>,
    cache_key: String,
}

impl Project {
    /// Load the project configuration from `directory/project.conf`.
    ///
    /// # Errors
    ///
    /// Returns a load error for malformed YAML, unknown keys, unsupported
    /// format versions, invalid option values or duplicate plugin listings.
    pub fn load(directory: &Path, cli_options: &BTreeMap<String, String>) -> Result<Self> {
        let directory = directory
            .canonicalize()
            .map_err(|e| Error::io(e, directory, "canonicalize"))?;
        let conf_path = directory.join("project.conf");
        let text =
            fs::read_to_string(&conf_path).map_err(|e| Error::io(e, &conf_path, "read"))?;
        let config: ProjectConfig = serde_yaml::from_str(&text)
            .map_err(|e| Error::load_in(&conf_path, e.to_string()))?;

        if config.format_version > STRATA_FORMAT_VERSION {
            return Err(Error::load_in(
                &conf_path,
                format!(
                    "Project requested format version {}, but strata only supports up until format version {}",
                    config.format_version, STRATA_FORMAT_VERSION
                ),
            ));
        }

        Self::validate_plugins(&config.plugins, &conf_path)?;

        // Resolve options against the invocation
        let mut options = BTreeMap::new();
        for (name, decl) in &config.options {
            let value = cli_options.get(name).unwrap_or(&decl.default).clone();
            if let Some(values) = &decl.values
                && !values.contains(&value)
            {
                return Err(Error::load_in(
                    &conf_path,
                    format!(
                        "Invalid value '{value}' for option '{name}', expected one of: {}",
                        values.join(", ")
                    ),
                ));
            }
            options.insert(name.clone(), value);
        }

        let mut variables = config.variables.clone();
        // Automatic variables
        variables.insert("project-name".to_string(), config.name.clone());
        variables.insert("max-jobs".to_string(), num_cpus::get().to_string());
        // Export options into variables where requested
        for (name, decl) in &config.options {
            if let Some(variable) = &decl.variable {
                variables.insert(variable.clone(), options[name].clone());
            }
        }

        let shell = Shell {
            command: config.shell.command.clone(),
            environment: config
                .shell
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), expand_host_vars(v)))
                .collect(),
            host_files: config
                .shell
                .host_files
                .iter()
                .map(|desc| match desc {
                    HostFileDesc::Path(path) => HostMount::new(path, None, false),
                    HostFileDesc::Full {
                        path,
                        host_path,
                        optional,
                    } => HostMount::new(path, host_path.as_deref(), *optional),
                })
                .collect(),
        };

        let cache_key = keys::project_key(config.format_version, &options);

        debug!(project = %config.name, directory = %directory.display(), "Loaded project");

        Ok(Self {
            name: config.name,
            element_path: directory.join(&config.element_path),
            directory,
            variables,
            environment: config.environment,
            env_nocache: config.environment_nocache,
            options,
            remotes: config.artifacts,
            fail_on_overlap: config.fail_on_overlap,
            ref_storage: config.ref_storage,
            shell,
            sandbox: config.sandbox,
            split_rules: config.split_rules,
            plugins: config.plugins,
            aliases: config.aliases,
            cache_key,
        })
    }

    fn validate_plugins(origins: &[PluginOrigin], conf_path: &Path) -> Result<()> {
        let mut seen_sources = BTreeMap::new();
        let mut seen_elements = BTreeMap::new();
        for origin in origins {
            for kind in origin.sources.keys() {
                if seen_sources.insert(kind.clone(), ()).is_some() {
                    return Err(Error::load_in(
                        conf_path,
                        format!("Duplicate listing of source '{kind}'"),
                    ));
                }
            }
            for kind in origin.elements.keys() {
                if seen_elements.insert(kind.clone(), ()).is_some() {
                    return Err(Error::load_in(
                        conf_path,
                        format!("Duplicate listing of element '{kind}'"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Translate a URL which may carry an `alias:` prefix into a fully
    /// qualified URL. Unknown aliases pass through unchanged, which makes
    /// the translation idempotent.
    #[must_use]
    pub fn translate_url(&self, url: &str) -> String {
        if let Some((alias, body)) = url.split_once(ALIAS_SEPARATOR)
            && let Some(prefix) = self.aliases.get(alias)
        {
            return format!("{prefix}{body}");
        }
        url.to_string()
    }

    /// The project's own contribution to element cache keys.
    #[must_use]
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// The sandbox environment an element starts from, merged with the
    /// element's own environment overrides.
    #[must_use]
    pub fn merged_environment(
        &self,
        overrides: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut merged = self.environment.clone();
        for (k, v) in overrides {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    /// A mirror directory for fetched source payloads.
    #[must_use]
    pub fn mirror_dir(&self) -> PathBuf {
        self.directory.join(".strata").join("sources")
    }
}

/// Expand `${VAR}` and `$VAR` against the host environment.
///
/// Unset variables are left unexpanded, matching POSIX-shell-style
/// expansion of paths in configuration files.
#[must_use]
pub fn expand_host_vars(value: &str) -> String {
    expand_vars_with(value, |name| std::env::var(name).ok())
}

fn expand_vars_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&(_, '{')) => {
                if let Some(end) = value[i..].find('}') {
                    let name = &value[i + 2..i + end];
                    if let Some(v) = lookup(name) {
                        out.push_str(&v);
                    } else {
                        out.push_str(&value[i..=i + end]);
                    }
                    // Skip past the closing brace
                    while let Some(&(j, _)) = chars.peek() {
                        if j > i + end {
                            break;
                        }
                        chars.next();
                    }
                } else {
                    out.push(c);
                }
            }
            Some(&(start, c2)) if c2.is_ascii_alphabetic() || c2 == '_' => {
                let mut end = start;
                while let Some(&(j, cj)) = chars.peek() {
                    if cj.is_ascii_alphanumeric() || cj == '_' {
                        end = j + cj.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let name = &value[start..end];
                if let Some(v) = lookup(name) {
                    out.push_str(&v);
                } else {
                    out.push('$');
                    out.push_str(name);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// A minimal in-memory project for unit tests elsewhere in the crate.
#[cfg(test)]
pub(crate) fn tests_project() -> Project {
    Project {
        name: "test".into(),
        directory: PathBuf::from("/nonexistent"),
        element_path: PathBuf::from("/nonexistent/elements"),
        variables: BTreeMap::new(),
        environment: BTreeMap::new(),
        env_nocache: Vec::new(),
        options: BTreeMap::new(),
        remotes: Vec::new(),
        fail_on_overlap: false,
        ref_storage: RefStorage::Inline,
        shell: Shell::default(),
        sandbox: SandboxDefaults::default(),
        split_rules: BTreeMap::new(),
        plugins: Vec::new(),
        aliases: BTreeMap::new(),
        cache_key: keys::project_key(0, &BTreeMap::new()),
    }
}
