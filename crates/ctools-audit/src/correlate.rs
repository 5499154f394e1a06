//! Which environments use which cache packages.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use ctools_cache::{PackagePool, PackageRecord};
use ctools_config::log_audit_debug;
use ctools_env::Environment;

use crate::Result;

/// Map every record to the environments it is linked into.
///
/// Records are matched by canonical path, so a record opened outside `pool`
/// still matches the pooled copy an environment resolved.
pub fn linked_environments<'e>(
    records: &[Arc<PackageRecord>],
    environments: &'e [Environment],
    pool: &mut PackagePool,
) -> Result<BTreeMap<Arc<PackageRecord>, Vec<&'e Environment>>> {
    let mut owners: HashMap<&Path, Vec<&'e Environment>> = HashMap::new();
    let mut linked: Vec<(Arc<PackageRecord>, &'e Environment)> = Vec::new();
    for env in environments {
        for record in env.link_groups(pool)?.values().flatten() {
            linked.push((record.clone(), env));
        }
    }
    for (record, env) in &linked {
        let envs = owners.entry(record.path()).or_default();
        if !envs.contains(env) {
            envs.push(*env);
        }
    }

    Ok(records
        .iter()
        .map(|record| {
            let envs = owners.get(record.path()).cloned().unwrap_or_default();
            (record.clone(), envs)
        })
        .collect())
}

/// Records that no environment links. These are safe to remove.
pub fn unlinked_packages(
    records: &[Arc<PackageRecord>],
    environments: &[Environment],
    pool: &mut PackagePool,
) -> Result<Vec<Arc<PackageRecord>>> {
    let unlinked: Vec<_> = linked_environments(records, environments, pool)?
        .into_iter()
        .filter(|(_, envs)| envs.is_empty())
        .map(|(record, _)| record)
        .collect();
    log_audit_debug!(
        records = records.len(),
        unlinked = unlinked.len(),
        "correlated cache with environments"
    );
    Ok(unlinked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctools_cache::testing::{PackageFixture, TestWorkspace};
    use ctools_cache::PackageCache;
    use std::collections::BTreeSet;

    #[test]
    fn test_unlinked_is_disjoint_from_linked() {
        let ws = TestWorkspace::new().unwrap();
        let used = PackageFixture::new("used", "1.0", "0").file("lib/used.py", b"1");
        let shared = PackageFixture::new("shared", "2.0", "0").file("lib/shared.py", b"2");
        let idle = PackageFixture::new("idle", "3.0", "0").file("lib/idle.py", b"3");

        let env_a = ws.env_root("a").unwrap();
        let env_b = ws.env_root("b").unwrap();
        let src = used.write_extracted(&ws.pkgs_dir).unwrap();
        used.link_into(&src, &env_a, "hard-link").unwrap();
        let src = shared.write_extracted(&ws.pkgs_dir).unwrap();
        shared.link_into(&src, &env_a, "hard-link").unwrap();
        shared.link_into(&src, &env_b, "copy").unwrap();
        idle.write_extracted(&ws.pkgs_dir).unwrap();

        let mut pool = PackagePool::new();
        let records = PackageCache::open(&ws.pkgs_dir).unwrap().packages(&mut pool);
        let envs = ctools_env::environments(&ws.envs_dir).unwrap();

        let owners = linked_environments(&records, &envs, &mut pool).unwrap();
        let shared_owners: Vec<&str> = owners
            .iter()
            .find(|(r, _)| r.name() == "shared")
            .map(|(_, envs)| envs.iter().map(|e| e.name()).collect())
            .unwrap();
        assert_eq!(shared_owners, vec!["a", "b"]);

        let unlinked = unlinked_packages(&records, &envs, &mut pool).unwrap();
        assert_eq!(unlinked.iter().map(|r| r.name()).collect::<Vec<_>>(), vec!["idle"]);

        let linked: BTreeSet<_> = envs
            .iter()
            .flat_map(|env| env.linked_packages(&mut pool).unwrap().into_values())
            .collect();
        assert!(unlinked.iter().all(|r| !linked.contains(r)));
    }

    #[test]
    fn test_records_outside_pool_still_match() {
        let ws = TestWorkspace::new().unwrap();
        let pkg = PackageFixture::new("a", "1", "0").file("lib/a.py", b"a");
        let env = ws.env_root("env").unwrap();
        let src = pkg.write_extracted(&ws.pkgs_dir).unwrap();
        pkg.link_into(&src, &env, "hard-link").unwrap();

        let standalone = vec![Arc::new(PackageRecord::open(&src).unwrap())];
        let envs = vec![Environment::open(&env).unwrap()];
        let mut pool = PackagePool::new();
        assert!(unlinked_packages(&standalone, &envs, &mut pool).unwrap().is_empty());
    }
}
