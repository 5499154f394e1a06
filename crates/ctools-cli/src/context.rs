//! Search paths and settings resolved once per invocation.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use ctools_cache::{HashAlgorithm, PackageCache};
use ctools_config::path::expand_tilde;
use ctools_config::log_cli_debug;
use ctools_env::Environment;

pub struct Context {
    pub pkgs_dirs: Vec<PathBuf>,
    pub envs_dirs: Vec<PathBuf>,
    pub archive_suffixes: Vec<String>,
    pub hash: HashAlgorithm,
    pub materialize: bool,
    pub json: bool,
}

impl Context {
    /// Command-line paths replace the configured lists; everything else comes
    /// from the loaded configuration.
    pub fn from_args(pkgs_dir: Option<PathBuf>, envs_dir: Option<PathBuf>, json: bool) -> Result<Self> {
        let config = ctools_config::config();
        let hash = config
            .verify
            .hash_algorithm
            .parse::<HashAlgorithm>()
            .context("Invalid verify.hash_algorithm")?;
        Ok(Self {
            pkgs_dirs: match pkgs_dir {
                Some(dir) => vec![expand_tilde(dir)],
                None => config.pkgs_dirs(),
            },
            envs_dirs: match envs_dir {
                Some(dir) => vec![expand_tilde(dir)],
                None => config.envs_dirs(),
            },
            archive_suffixes: config.cache.archive_suffixes.clone(),
            hash,
            materialize: config.verify.materialize,
            json,
        })
    }

    /// Every configured cache that exists.
    pub fn caches(&self) -> Vec<PackageCache> {
        self.pkgs_dirs
            .iter()
            .filter_map(|dir| match PackageCache::open(dir) {
                Ok(cache) => Some(cache.with_archive_suffixes(self.archive_suffixes.iter().cloned())),
                Err(e) => {
                    log_cli_debug!(dir = %dir.display(), error = %e, "skipping package cache");
                    None
                }
            })
            .collect()
    }

    /// Every environment found under the configured directories, without
    /// duplicates.
    pub fn environments(&self) -> Vec<Environment> {
        let mut envs: Vec<Environment> = self
            .envs_dirs
            .iter()
            .filter_map(|dir| match ctools_env::environments(dir) {
                Ok(envs) => Some(envs),
                Err(e) => {
                    log_cli_debug!(dir = %dir.display(), error = %e, "skipping environments directory");
                    None
                }
            })
            .flatten()
            .collect();
        envs.sort();
        envs.dedup();
        envs
    }

    /// Resolve `--env`: a path to an environment, or the name of one found
    /// under the environments directories. Without a selector, the active
    /// environment.
    pub fn environment(&self, selector: Option<&str>) -> Result<Environment> {
        let Some(selector) = selector else {
            return ctools_env::active_environment()
                .context("No --env given and no environment is active");
        };

        let path = expand_tilde(selector);
        if ctools_env::is_environment(&path) {
            return Environment::open(&path).with_context(|| format!("Failed to open {}", path.display()));
        }
        match self.environments().into_iter().find(|env| env.name() == selector) {
            Some(env) => Ok(env),
            None => bail!("No environment named '{}' in {}", selector, display_paths(&self.envs_dirs)),
        }
    }

    /// `--env` if given, otherwise every environment.
    pub fn selected_environments(&self, selector: Option<&str>) -> Result<Vec<Environment>> {
        match selector {
            Some(_) => Ok(vec![self.environment(selector)?]),
            None => Ok(self.environments()),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `path` relative to the environment root, for lookups in file lists.
pub fn env_relative(env: &Environment, path: &Path) -> Result<String> {
    let relative = ctools_config::path::relative_to(path, env.root())?;
    Ok(relative.to_string_lossy().replace('\\', "/"))
}
