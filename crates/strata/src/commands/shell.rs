//! `strata shell`: an interactive session inside an element's staged root.

use crate::cli::ShellArgs;
use crate::context::Invocation;
use miette::{Report, miette};
use std::path::Path;
use strata_core::keys;
use strata_sandbox::{Sandbox, SandboxFlags};

pub async fn run(invocation: &Invocation, args: &ShellArgs) -> miette::Result<bool> {
    let targets = vec![args.element.clone()];
    let mut set = strata_core::load_elements(&invocation.project, &invocation.registry, &targets)
        .map_err(Report::new)?;
    keys::compute_keys(&mut set, &invocation.project, &invocation.registry)
        .map_err(Report::new)?;

    // The element and its whole closure must already be built
    let closure = set
        .closure(&targets)
        .map_err(|e| Report::new(strata_core::Error::load(e.to_string())))?;
    let mut staged = Vec::with_capacity(closure.len());
    for name in &closure {
        let element = set
            .get(name)
            .ok_or_else(|| miette!("unknown element '{name}'"))?;
        let Some(key) = element.cache_key() else {
            return Err(miette!(
                "element '{name}' has unresolved sources; track and build it first"
            ));
        };
        if !invocation.store.contains(key) {
            return Err(miette!("element '{name}' is not built; run 'strata build' first"));
        }
        staged.push((name.clone(), key.to_string()));
    }

    let root = invocation
        .runtime_dir
        .join(format!("shell-{}", std::process::id()));
    std::fs::create_dir_all(&root)
        .map_err(|e| miette!("cannot create shell root '{}': {e}", root.display()))?;
    strata_scheduler::staging::stage_artifacts(&invocation.store, &staged, &root, false)
        .map_err(Report::new)?;

    let shell = &invocation.project.shell;
    let command = if shell.command.is_empty() {
        vec!["sh".to_string()]
    } else {
        shell.command.clone()
    };
    let mut environment = invocation.project.environment.clone();
    for (k, v) in &shell.environment {
        environment.insert(k.clone(), v.clone());
    }

    let mut sandbox =
        Sandbox::new(invocation.runtime_dir.join("sandbox"), &root).with_environment(environment);
    for mount in &shell.host_files {
        if !Path::new(&mount.host_path).exists() {
            if mount.optional {
                continue;
            }
            return Err(miette!(
                "host file '{}' for shell mount '{}' does not exist",
                mount.host_path,
                mount.path
            ));
        }
        sandbox = sandbox.with_marked_directory(mount.path.clone(), mount.host_path.clone());
    }

    let flags = SandboxFlags {
        interactive: true,
        network_enabled: true,
        ..Default::default()
    };
    let code = sandbox
        .run(&command, flags, Some("/"), None)
        .await
        .map_err(Report::new)?;
    let _ = std::fs::remove_dir_all(&root);
    Ok(code == 0)
}
