//! Command-line definition.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Successful run.
pub const EXIT_OK: i32 = 0;
/// Generic failure: load error, build failure, interrupted run.
pub const EXIT_FAILURE: i32 = 1;

/// Declarative, content-addressed builds of software stacks.
#[derive(Debug, Parser)]
#[command(name = "strata", version, about)]
pub struct Cli {
    /// Project directory (holding project.conf).
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub directory: PathBuf,

    /// Project option overrides, as name=value.
    #[arg(short = 'o', long = "option", global = true, value_name = "NAME=VALUE")]
    pub options: Vec<String>,

    /// Override the artifact cache location.
    #[arg(long, global = true, env = "STRATA_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch, pull and build elements, committing artifacts to the cache.
    Build(BuildArgs),
    /// Fetch element sources into the local mirror.
    Fetch(FetchArgs),
    /// Pin fresh source refs.
    Track(TargetArgs),
    /// Pull artifacts from the configured remote caches.
    Pull(TargetArgs),
    /// Push local artifacts to the push-enabled remote caches.
    Push(TargetArgs),
    /// Show element state: consistency, cache status and keys.
    Show(TargetArgs),
    /// Open an interactive shell inside an element's staged root.
    Shell(ShellArgs),
}

#[derive(Debug, Args)]
pub struct ShellArgs {
    /// The element whose staged root to enter.
    pub element: String,
}

/// Arguments shared by single-phase commands.
#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Elements to operate on.
    #[arg(required = true)]
    pub targets: Vec<String>,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Elements to fetch.
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Track sources before fetching.
    #[arg(long)]
    pub track: bool,
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Elements to build.
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Continue building independent elements after a failure.
    #[arg(long)]
    pub keep_going: bool,

    /// Concurrent fetch jobs (default: min(cpu count, 10)).
    #[arg(long)]
    pub fetchers: Option<usize>,

    /// Concurrent build jobs (default: cpu count).
    #[arg(long)]
    pub builders: Option<usize>,
}

/// Split `name=value` option overrides.
pub fn parse_option_overrides(
    raw: &[String],
) -> Result<std::collections::BTreeMap<String, String>, String> {
    let mut options = std::collections::BTreeMap::new();
    for entry in raw {
        let Some((name, value)) = entry.split_once('=') else {
            return Err(format!("invalid option override '{entry}', expected NAME=VALUE"));
        };
        options.insert(name.to_string(), value.to_string());
    }
    Ok(options)
}
