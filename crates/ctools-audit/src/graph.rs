//! Ownership and dependency relations inside one environment.
//!
//! Dependencies are matched by package name only. Version and build
//! constraints in `depends` are dropped, so this reports edges between what
//! is installed; it does not resolve anything.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use ctools_config::log_audit_debug;
use ctools_env::{Dist, Environment, PackageMeta};

use crate::Result;

/// Install actions whose specs name packages the user asked for.
const EXPLICIT_ACTIONS: [&str; 2] = ["install", "create"];

/// Installed packages whose file list contains `path`.
///
/// More than one owner means the environment holds conflicting packages.
pub fn owns<'e>(env: &'e Environment, path: &str) -> Result<Vec<&'e PackageMeta>> {
    let path = path.trim_start_matches("./");
    Ok(env
        .packages()?
        .iter()
        .filter(|meta| meta.files().contains(path))
        .collect())
}

/// Package name to the names it depends on, in `depends` order.
pub fn dependency_graph(env: &Environment) -> Result<BTreeMap<String, Vec<String>>> {
    Ok(env
        .packages()?
        .iter()
        .map(|meta| {
            let deps = meta.depends_names().map(str::to_string).collect();
            (meta.name().to_string(), deps)
        })
        .collect())
}

/// Installed packages that no other installed package depends on.
pub fn orphaned(env: &Environment) -> Result<Vec<&PackageMeta>> {
    let packages = env.packages()?;
    let depended_on: HashSet<&str> = packages.iter().flat_map(PackageMeta::depends_names).collect();
    Ok(packages
        .iter()
        .filter(|meta| !depended_on.contains(meta.name()))
        .collect())
}

/// Packages the user asked for by name, per revision date, limited to what
/// is still installed.
///
/// Only `install` and `create` requests count. A requested name selects the
/// distributions of that name in the state the request produced.
pub fn explicitly_installed(env: &Environment) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let history = env.history()?;
    let states = history.construct_states()?;
    let current: HashSet<&str> = env.package_specs()?.iter().map(String::as_str).collect();

    let mut explicit: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for request in history.get_user_requests() {
        match request.action.as_deref() {
            Some(action) if EXPLICIT_ACTIONS.contains(&action) => {}
            _ => continue,
        }
        let Some(state) = states.iter().rev().find(|state| state.date == request.date) else {
            log_audit_debug!(date = %request.date, "request without a matching revision");
            continue;
        };

        let names: HashSet<&str> = request.specs.iter().map(|spec| spec_name(spec)).collect();
        let installed = state
            .packages
            .iter()
            .filter(|dist| names.contains(Dist::parse(dist).name.as_str()))
            .filter(|dist| current.contains(dist.as_str()))
            .cloned();
        explicit.entry(request.date.clone()).or_default().extend(installed);
    }
    Ok(explicit)
}

/// Package name of a match spec such as `numpy >=1.10` or `python=3.5`.
fn spec_name(spec: &str) -> &str {
    let spec = spec.split_whitespace().next().unwrap_or_default();
    let end = spec.find(['=', '<', '>', '!']).unwrap_or(spec.len());
    &spec[..end]
}
