//! Integration tests for ctools-env
//!
//! Environments are built on disk from cache fixtures, then read back through
//! the public API.

use ctools_cache::testing::{write_history, PackageFixture, TestWorkspace};
use ctools_cache::PackagePool;
use ctools_env::{named_environments, Environment, EnvError, LinkType};
use serde_json::json;

/// Records resolve back to the cache packages they were linked from
#[test]
fn test_link_groups_resolve_to_cache() {
    let ws = TestWorkspace::new().unwrap();
    let root = ws.env_root("py35").unwrap();

    let python = PackageFixture::new("python", "3.5.1", "0").file("bin/python", b"#!");
    let six = PackageFixture::new("six", "1.10.0", "py35_0").file("lib/six.py", b"# six");
    let dir = python.write_extracted(&ws.pkgs_dir).unwrap();
    python.link_into(&dir, &root, "hard-link").unwrap();
    let dir = six.write_extracted(&ws.pkgs_dir).unwrap();
    six.link_into(&dir, &root, "copy").unwrap();

    // Legacy integer link type and a record without any link field.
    PackageFixture::new("legacy", "1", "0")
        .write_meta(&root, json!({ "source": ws.pkgs_dir.join("missing-1-0"), "type": 2 }))
        .unwrap();
    PackageFixture::new("bare", "1", "0")
        .write_meta(&root, serde_json::Value::Null)
        .unwrap();

    let env = Environment::open(&root).unwrap();
    assert_eq!(env.name(), "py35");
    assert_eq!(env.packages().unwrap().len(), 4);
    assert_eq!(env.soft_linked().unwrap()[0].name(), "legacy");
    assert_eq!(env.copy_linked().unwrap()[0].link_type(), LinkType::Copy);

    let mut pool = PackagePool::new();
    let groups = env.link_groups(&mut pool).unwrap();
    assert_eq!(groups.len(), LinkType::ALL.len());
    assert_eq!(groups[&LinkType::HardLink][0].name(), "python");
    assert_eq!(groups[&LinkType::Copy][0].name(), "six");
    // The legacy source does not exist and is skipped.
    assert!(groups[&LinkType::SoftLink].is_empty());

    let linked = env.linked_packages(&mut pool).unwrap();
    assert_eq!(linked.keys().collect::<Vec<_>>(), vec!["python", "six"]);
    assert!(std::sync::Arc::ptr_eq(
        &linked["python"],
        &pool.open(ws.pkgs_dir.join("python-3.5.1-0")).unwrap()
    ));
}

/// Named lookup across an envs directory, history included
#[test]
fn test_named_environments_with_history() {
    let ws = TestWorkspace::new().unwrap();
    for name in ["a", "b"] {
        let root = ws.env_root(name).unwrap();
        PackageFixture::new("zlib", "1.2.8", "0")
            .write_meta(&root, serde_json::Value::Null)
            .unwrap();
    }
    std::fs::create_dir_all(ws.envs_dir.join("not-an-env")).unwrap();
    write_history(
        &ws.envs_dir.join("a"),
        "==> 2016-01-01 00:00:00 <==\nzlib-1.2.8-0\n==> 2016-01-02 00:00:00 <==\n-zlib-1.2.8-0\n+zlib-1.2.9-0\n",
    )
    .unwrap();

    let envs = named_environments(&ws.envs_dir).unwrap();
    assert_eq!(envs.keys().collect::<Vec<_>>(), vec!["a", "b"]);

    let history = envs["a"].history().unwrap();
    assert_eq!(
        history.latest_state().unwrap().into_iter().collect::<Vec<_>>(),
        vec!["zlib-1.2.9-0"]
    );
    assert_eq!(history.object_log().unwrap()[1].upgrade.len(), 1);
    assert!(envs["b"].history().unwrap().is_empty());
}

/// Opening something that is not an environment is an error
#[test]
fn test_invalid_environment() {
    let ws = TestWorkspace::new().unwrap();
    assert!(matches!(
        Environment::open(&ws.pkgs_dir),
        Err(EnvError::InvalidEnvironment(_))
    ));
}

/// A second pool receives the records grouped through the first
#[test]
fn test_link_groups_shared_with_later_pool() {
    let ws = TestWorkspace::new().unwrap();
    let root = ws.env_root("shared").unwrap();
    let zlib = PackageFixture::new("zlib", "1.2.8", "3").file("lib/libz.so", b"z");
    let dir = zlib.write_extracted(&ws.pkgs_dir).unwrap();
    zlib.link_into(&dir, &root, "copy").unwrap();

    let env = Environment::open(&root).unwrap();
    let mut first = PackagePool::new();
    let record = env.linked(LinkType::Copy, &mut first).unwrap()[0].clone();

    let mut second = PackagePool::new();
    let again = env.linked(LinkType::Copy, &mut second).unwrap()[0].clone();
    assert!(std::sync::Arc::ptr_eq(&record, &again));
    assert_eq!(second.len(), 1);
    assert!(std::sync::Arc::ptr_eq(&second.get(record.path()).unwrap(), &record));
}

/// Two records under one name collapse to a single entry
#[test]
fn test_duplicate_package_names() {
    let ws = TestWorkspace::new().unwrap();
    let root = ws.env_root("dupes").unwrap();
    for version in ["1.2.8", "1.2.9"] {
        let zlib = PackageFixture::new("zlib", version, "0").file("lib/libz.so", version.as_bytes());
        let dir = zlib.write_extracted(&ws.pkgs_dir).unwrap();
        zlib.write_meta(&root, json!({ "source": dir, "type": "copy" })).unwrap();
    }

    let env = Environment::open(&root).unwrap();
    assert_eq!(env.packages().unwrap().len(), 2);

    let mut pool = PackagePool::new();
    let linked = env.linked_packages(&mut pool).unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked["zlib"].name(), "zlib");
    assert_eq!(env.linked(LinkType::Copy, &mut pool).unwrap().len(), 2);
}
