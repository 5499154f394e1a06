//! # ctools-config
//!
//! Configuration management for ctools.
//!
//! Loads configuration from:
//! 1. `~/.ctools/config.toml` (global)
//! 2. `.ctools/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! Library crates never read the global instance; the CLI resolves the
//! configuration once and passes plain values down.

pub mod logging;
pub mod path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use tracing::debug;

/// Path list overriding `cache.pkgs_dirs`
pub const ENV_PKGS_DIRS: &str = "CTOOLS_PKGS_DIRS";
/// Path list overriding `environments.envs_dirs`
pub const ENV_ENVS_DIRS: &str = "CTOOLS_ENVS_DIRS";
/// Overrides `verify.hash_algorithm`
pub const ENV_HASH: &str = "CTOOLS_HASH";

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(PoisonError::into_inner)
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(PoisonError::into_inner) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub environments: EnvironmentsConfig,
    pub verify: VerifyConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_files(
            Self::global_config_path().as_deref(),
            Some(Path::new(".ctools/config.toml")),
        )?;
        config.apply_env_overrides(|key| std::env::var_os(key));
        Ok(config)
    }

    /// Load and merge the given files, later ones overriding earlier ones.
    /// Missing files are skipped.
    pub fn load_files(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();
        for path in [global, project].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)?;
            let table: toml::Table = toml::from_str(&contents)?;
            merge_tables(&mut merged, table);
        }
        Ok(toml::Value::Table(merged).try_into()?)
    }

    /// Global config path: ~/.ctools/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".ctools/config.toml"))
    }

    /// Apply environment variable overrides, reading variables through `var`.
    pub fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<std::ffi::OsString>,
    {
        if let Some(dirs) = var(ENV_PKGS_DIRS) {
            self.cache.pkgs_dirs = std::env::split_paths(&dirs).collect();
        }
        if let Some(dirs) = var(ENV_ENVS_DIRS) {
            self.environments.envs_dirs = std::env::split_paths(&dirs).collect();
        }
        if let Some(hash) = var(ENV_HASH) {
            self.verify.hash_algorithm = hash.to_string_lossy().into_owned();
        }
    }

    /// Write this config as TOML, creating the parent directory.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Cache directories with `~` expanded.
    pub fn pkgs_dirs(&self) -> Vec<PathBuf> {
        self.cache.pkgs_dirs.iter().map(path::expand_tilde).collect()
    }

    /// Environment directories with `~` expanded.
    pub fn envs_dirs(&self) -> Vec<PathBuf> {
        self.environments.envs_dirs.iter().map(path::expand_tilde).collect()
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Recursively merge `overlay` into `base`; overlay values win.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(incoming) => match base.get_mut(&key) {
                Some(toml::Value::Table(existing)) => merge_tables(existing, incoming),
                _ => {
                    base.insert(key, toml::Value::Table(incoming));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}

/// Package cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Package cache directories, searched in order
    pub pkgs_dirs: Vec<PathBuf>,
    /// File suffixes treated as package archives
    pub archive_suffixes: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            pkgs_dirs: vec![PathBuf::from("~/miniconda3/pkgs")],
            archive_suffixes: vec![".tar.bz2".to_string(), ".tar.gz".to_string()],
        }
    }
}

/// Environment discovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentsConfig {
    /// Directories that hold environments (or are one)
    pub envs_dirs: Vec<PathBuf>,
}

impl Default for EnvironmentsConfig {
    fn default() -> Self {
        Self {
            envs_dirs: vec![PathBuf::from("~/miniconda3"), PathBuf::from("~/miniconda3/envs")],
        }
    }
}

/// Hash verification configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// md5, sha256 or blake3
    pub hash_algorithm: String,
    /// Decompress archives to a temp file before verifying
    pub materialize: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: "md5".to_string(),
            materialize: true,
        }
    }
}
