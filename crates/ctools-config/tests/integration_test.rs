//! Integration tests for ctools-config
//!
//! These tests verify the full config loading pipeline with real file system operations.

use std::path::PathBuf;
use tempfile::tempdir;

use ctools_config::Config;

/// Test config loading from a real global config file
#[test]
fn test_load_global_config_from_file() {
    let temp = tempdir().unwrap();
    let global = temp.path().join(".ctools/config.toml");
    std::fs::create_dir_all(global.parent().unwrap()).unwrap();
    std::fs::write(
        &global,
        r#"
[cache]
pkgs_dirs = ["/opt/conda/pkgs"]

[verify]
hash_algorithm = "sha256"
"#,
    )
    .unwrap();

    let config = Config::load_files(Some(global.as_path()), None).unwrap();
    assert_eq!(config.cache.pkgs_dirs, vec![PathBuf::from("/opt/conda/pkgs")]);
    assert_eq!(config.verify.hash_algorithm, "sha256");
    // Untouched sections keep their defaults.
    assert_eq!(config.cache.archive_suffixes, vec![".tar.bz2", ".tar.gz"]);
    assert!(config.verify.materialize);
}

/// Test config hierarchy: project config overrides global key by key
#[test]
fn test_config_hierarchy_project_overrides_global() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("global.toml");
    let project = temp.path().join("project.toml");
    std::fs::write(
        &global,
        r#"
[cache]
pkgs_dirs = ["/global/pkgs"]

[verify]
hash_algorithm = "blake3"
materialize = false
"#,
    )
    .unwrap();
    std::fs::write(
        &project,
        r#"
[verify]
hash_algorithm = "md5"
"#,
    )
    .unwrap();

    let config = Config::load_files(Some(global.as_path()), Some(project.as_path())).unwrap();
    assert_eq!(config.cache.pkgs_dirs, vec![PathBuf::from("/global/pkgs")]);
    assert_eq!(config.verify.hash_algorithm, "md5");
    assert!(!config.verify.materialize);
}

/// Missing files fall back to defaults
#[test]
fn test_missing_files_yield_defaults() {
    let temp = tempdir().unwrap();
    let config = Config::load_files(Some(temp.path().join("nope.toml").as_path()), None).unwrap();
    assert_eq!(config, Config::default());
}

/// Invalid TOML surfaces as a parse error
#[test]
fn test_invalid_toml_is_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[cache\npkgs_dirs = ").unwrap();
    assert!(matches!(
        Config::load_files(Some(path.as_path()), None),
        Err(ctools_config::ConfigError::Toml(_))
    ));
}

/// Saved config loads back unchanged
#[test]
fn test_save_then_load() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("nested/dir/config.toml");

    let mut config = Config::default();
    config.environments.envs_dirs = vec![PathBuf::from("/srv/envs")];
    config.verify.hash_algorithm = "blake3".to_string();
    config.save(&path).unwrap();

    let loaded = Config::load_files(None, Some(path.as_path())).unwrap();
    assert_eq!(loaded, config);
}
