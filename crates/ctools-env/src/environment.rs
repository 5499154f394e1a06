//! Installed environments.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ctools_cache::{PackagePool, PackageRecord};
use ctools_config::{log_env_debug, log_env_warn};
use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::instrument;
use walkdir::WalkDir;

use crate::history::History;
use crate::link::LinkType;
use crate::meta::PackageMeta;
use crate::{EnvError, Result};

/// Metadata directory that marks a directory as an environment
pub const META_DIR: &str = "conda-meta";

/// Variable naming the active environment
const PREFIX_VAR: &str = "CONDA_PREFIX";

/// Cache records linked into an environment, by link type
pub type LinkGroups = BTreeMap<LinkType, Vec<Arc<PackageRecord>>>;

/// An installation root with a `conda-meta/` directory
pub struct Environment {
    root: PathBuf,
    name: String,
    meta_dir: PathBuf,
    packages: OnceCell<Vec<PackageMeta>>,
    link_groups: OnceCell<LinkGroups>,
    package_specs: OnceCell<Vec<String>>,
    package_channels: OnceCell<BTreeMap<String, String>>,
    history: OnceCell<History>,
}

impl Environment {
    /// Open the environment at `root`.
    ///
    /// Fails with [`EnvError::InvalidEnvironment`] unless `root/conda-meta`
    /// is a directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !is_environment(root) {
            return Err(EnvError::InvalidEnvironment(root.to_path_buf()));
        }
        let root = root.canonicalize()?;
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let meta_dir = root.join(META_DIR);
        Ok(Self {
            root,
            name,
            meta_dir,
            packages: OnceCell::new(),
            link_groups: OnceCell::new(),
            package_specs: OnceCell::new(),
            package_channels: OnceCell::new(),
            history: OnceCell::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta_dir(&self) -> &Path {
        &self.meta_dir
    }

    /// Every `conda-meta/*.json` record, sorted by file name.
    ///
    /// Records that fail to parse are logged and left out.
    pub fn packages(&self) -> Result<&[PackageMeta]> {
        self.packages
            .get_or_try_init(|| {
                let mut paths: Vec<PathBuf> = fs::read_dir(&self.meta_dir)?
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|path| path.extension() == Some(OsStr::new("json")))
                    .collect();
                paths.sort();

                let mut packages = Vec::with_capacity(paths.len());
                for path in paths {
                    match PackageMeta::open(&path) {
                        Ok(meta) => packages.push(meta),
                        Err(e) => log_env_warn!(path = %path.display(), error = %e, "skipping unreadable package record"),
                    }
                }
                Ok::<_, EnvError>(packages)
            })
            .map(Vec::as_slice)
    }

    /// Records whose link type is `link_type`.
    pub fn by_link_type(&self, link_type: LinkType) -> Result<Vec<&PackageMeta>> {
        Ok(self
            .packages()?
            .iter()
            .filter(|meta| meta.link_type() == link_type)
            .collect())
    }

    pub fn hard_linked(&self) -> Result<Vec<&PackageMeta>> {
        self.by_link_type(LinkType::HardLink)
    }

    pub fn soft_linked(&self) -> Result<Vec<&PackageMeta>> {
        self.by_link_type(LinkType::SoftLink)
    }

    pub fn copy_linked(&self) -> Result<Vec<&PackageMeta>> {
        self.by_link_type(LinkType::Copy)
    }

    /// Cache records behind every installed package, grouped by link type.
    ///
    /// Packages without link metadata are hard links from the environment
    /// root itself. Sources that cannot be opened as cache packages are
    /// logged and left out. Every link type has an entry, possibly empty.
    ///
    /// The grouping is computed once, through the first `pool` passed in.
    /// Later calls return the same records and hand them to `pool`, which
    /// keeps its own handle for any path it already held.
    #[instrument(skip(self, pool), fields(env = %self.name), level = "debug")]
    pub fn link_groups(&self, pool: &mut PackagePool) -> Result<&LinkGroups> {
        let groups = self.link_groups.get_or_try_init(|| {
            let mut groups: LinkGroups = LinkType::ALL.iter().map(|t| (*t, Vec::new())).collect();
            for meta in self.packages()? {
                let source = meta.link_source(&self.root);
                match pool.open(&source) {
                    Ok(record) => groups.entry(meta.link_type()).or_default().push(record),
                    Err(e) => log_env_warn!(
                        package = %meta.full_spec(),
                        source = %source.display(),
                        error = %e,
                        "link source is not a cache package"
                    ),
                }
            }
            Ok::<_, EnvError>(groups)
        })?;
        for record in groups.values().flatten() {
            pool.adopt(record);
        }
        Ok(groups)
    }

    /// Cache records linked with `link_type`.
    pub fn linked(&self, link_type: LinkType, pool: &mut PackagePool) -> Result<&[Arc<PackageRecord>]> {
        Ok(self
            .link_groups(pool)?
            .get(&link_type)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }

    /// Package name to cache record, over every link type.
    ///
    /// An environment holds one record per name; when several share a name
    /// the last one wins and the clash is logged.
    pub fn linked_packages(&self, pool: &mut PackagePool) -> Result<BTreeMap<String, Arc<PackageRecord>>> {
        let mut linked = BTreeMap::new();
        for record in self.link_groups(pool)?.values().flatten() {
            if let Some(previous) = linked.insert(record.name().to_string(), record.clone()) {
                log_env_warn!(
                    env = %self.name,
                    package = %record.name(),
                    kept = %record.dir_name(),
                    dropped = %previous.dir_name(),
                    "several records share a package name"
                );
            }
        }
        Ok(linked)
    }

    /// `name-version-build` of every installed package.
    pub fn package_specs(&self) -> Result<&[String]> {
        self.package_specs
            .get_or_try_init(|| Ok::<_, EnvError>(self.packages()?.iter().map(PackageMeta::full_spec).collect()))
            .map(Vec::as_slice)
    }

    /// Package name to channel; empty when none was recorded.
    pub fn package_channels(&self) -> Result<&BTreeMap<String, String>> {
        self.package_channels.get_or_try_init(|| {
            Ok::<_, EnvError>(self
                .packages()?
                .iter()
                .map(|meta| (meta.name().to_string(), meta.channel().unwrap_or_default().to_string()))
                .collect::<BTreeMap<_, _>>())
        })
    }

    /// Package name to the value of `field`, if the record has it.
    pub fn get_field(&self, field: &str) -> Result<BTreeMap<String, Option<Value>>> {
        Ok(self
            .packages()?
            .iter()
            .map(|meta| (meta.name().to_string(), meta.get_optional_field(field).cloned()))
            .collect())
    }

    /// Records grouped by the value of `field`.
    ///
    /// String values are used as they are, other values in their JSON form,
    /// and a missing field groups under the empty string.
    pub fn group_by(&self, field: &str) -> Result<BTreeMap<String, Vec<&PackageMeta>>> {
        let mut groups: BTreeMap<String, Vec<&PackageMeta>> = BTreeMap::new();
        for meta in self.packages()? {
            let key = match meta.get_optional_field(field) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };
            groups.entry(key).or_default().push(meta);
        }
        Ok(groups)
    }

    /// The environment's revision log.
    pub fn history(&self) -> Result<&History> {
        self.history
            .get_or_try_init(|| History::open(&self.root).map_err(EnvError::from))
    }

    /// Whether this is the active environment of the current process.
    pub fn activated(&self) -> bool {
        self.activated_in(env::var_os(PREFIX_VAR).as_deref(), env::var_os("PATH").as_deref())
    }

    /// [`Environment::activated`] against explicit variable values.
    ///
    /// A set prefix variable decides on its own. Otherwise the environment
    /// counts as active when its root, or its `bin` or `Scripts` directory, is
    /// on the search path.
    pub fn activated_in(&self, conda_prefix: Option<&OsStr>, path_var: Option<&OsStr>) -> bool {
        if let Some(prefix) = conda_prefix {
            return same_path(Path::new(prefix), &self.root);
        }
        let Some(path_var) = path_var else {
            return false;
        };
        let candidates = [self.root.clone(), self.root.join("bin"), self.root.join("Scripts")];
        env::split_paths(path_var).any(|entry| candidates.iter().any(|c| same_path(&entry, c)))
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    a == b || a.canonicalize().map(|a| a == b).unwrap_or(false)
}

/// Whether `path` looks like an environment root.
pub fn is_environment(path: &Path) -> bool {
    path.is_dir() && path.join(META_DIR).is_dir()
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Eq for Environment {}

impl Hash for Environment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.root.hash(state);
    }
}

impl PartialOrd for Environment {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Environment {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.root.cmp(&other.root)
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment").field("root", &self.root).finish()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment: {}", self.name)
    }
}

/// `path` itself if it is an environment, otherwise every environment
/// directly below it.
pub fn environments(path: impl AsRef<Path>) -> Result<Vec<Environment>> {
    let path = path.as_ref();
    if is_environment(path) {
        return Ok(vec![Environment::open(path)?]);
    }
    if !path.is_dir() {
        return Err(EnvError::InvalidEnvironment(path.to_path_buf()));
    }

    let mut envs = Vec::new();
    for entry in WalkDir::new(path).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log_env_warn!(error = %e, "cannot read environments directory entry");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        match Environment::open(entry.path()) {
            Ok(env) => envs.push(env),
            Err(_) => log_env_debug!(path = %entry.path().display(), "ignoring non-environment directory"),
        }
    }
    Ok(envs)
}

/// [`environments`] keyed by environment name.
pub fn named_environments(path: impl AsRef<Path>) -> Result<BTreeMap<String, Environment>> {
    Ok(environments(path)?
        .into_iter()
        .map(|env| (env.name().to_string(), env))
        .collect())
}

/// The environment named by `CONDA_PREFIX`.
pub fn active_environment() -> Result<Environment> {
    match env::var_os(PREFIX_VAR) {
        Some(prefix) => Environment::open(prefix),
        None => Err(EnvError::NoActiveEnvironment),
    }
}
