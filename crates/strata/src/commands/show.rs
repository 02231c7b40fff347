//! `strata show`: inspect element state.

use crate::cli::TargetArgs;
use crate::context::Invocation;
use miette::Report;
use strata_core::keys;

pub fn run(invocation: &Invocation, args: &TargetArgs) -> miette::Result<bool> {
    let mut set =
        strata_core::load_elements(&invocation.project, &invocation.registry, &args.targets)
            .map_err(Report::new)?;
    keys::compute_keys(&mut set, &invocation.project, &invocation.registry)
        .map_err(Report::new)?;

    let order = set
        .closure(&args.targets)
        .map_err(|e| Report::new(strata_core::Error::load(e.to_string())))?;
    for name in order {
        let Some(index) = set.index_of(&name) else {
            continue;
        };
        let cached = set
            .by_index(index)
            .cache_key()
            .is_some_and(|key| invocation.store.contains(key));
        set.by_index_mut(index).update_cached(cached);

        let element = set.by_index(index);
        let state = if element.is_cached() {
            "cached"
        } else if element.cache_key().is_some() {
            "buildable"
        } else {
            "waiting"
        };
        println!(
            "{:<12} {:<10} {:<10} {} {}",
            state,
            element.kind,
            element.consistency(),
            element.cache_key().unwrap_or("<key unresolved>"),
            element.name,
        );
    }
    Ok(true)
}
