//! Package cache directory scanning.
//!
//! A cache routinely holds half-removed or in-progress entries, so scans skip
//! anything that fails to open and keep going.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::archive::PackageArchive;
use crate::package::{PackagePool, PackageRecord};
use crate::{CacheError, Result};

/// File suffixes recognised as package archives
pub const ARCHIVE_SUFFIXES: &[&str] = &[".tar.bz2", ".tar.gz"];

/// A package cache directory (`pkgs/`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageCache {
    root: PathBuf,
    suffixes: Vec<String>,
}

impl PackageCache {
    /// Open the cache at `root`, which must be an existing directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(CacheError::NotADirectory(root.to_path_buf()));
        }
        Ok(Self {
            root: root.canonicalize()?,
            suffixes: ARCHIVE_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Replace the recognised archive suffixes.
    pub fn with_archive_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every extracted package directly under the cache root.
    #[instrument(skip(self, pool), fields(cache = %self.root.display()), level = "debug")]
    pub fn packages(&self, pool: &mut PackagePool) -> Vec<Arc<PackageRecord>> {
        let mut records = Vec::new();
        for path in self.children(|path| path.is_dir()) {
            match pool.open(&path) {
                Ok(record) => records.push(record),
                Err(e) => debug!(path = %path.display(), error = %e, "skipping cache entry"),
            }
        }
        records
    }

    /// Packages keyed by directory name.
    pub fn named_packages(&self, pool: &mut PackagePool) -> BTreeMap<String, Arc<PackageRecord>> {
        self.packages(pool)
            .into_iter()
            .map(|record| (record.dir_name(), record))
            .collect()
    }

    /// Every archive directly under the cache root.
    #[instrument(skip(self), fields(cache = %self.root.display()), level = "debug")]
    pub fn archives(&self) -> Vec<PackageArchive> {
        let mut archives = Vec::new();
        for path in self.children(|path| path.is_file() && self.is_archive_name(path)) {
            match PackageArchive::open(&path, false) {
                Ok(archive) => archives.push(archive),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable archive"),
            }
        }
        archives
    }

    /// Archives keyed by file name with the archive suffix removed.
    pub fn named_archives(&self) -> BTreeMap<String, PackageArchive> {
        self.archives()
            .into_iter()
            .map(|archive| (archive.stem(), archive))
            .collect()
    }

    /// Extracted packages paired with the archive they came from.
    ///
    /// Packages without a matching archive are left out.
    pub fn correlated(
        &self,
        pool: &mut PackagePool,
    ) -> BTreeMap<String, (Arc<PackageRecord>, PackageArchive)> {
        let mut archives = self.named_archives();
        self.named_packages(pool)
            .into_iter()
            .filter_map(|(name, record)| {
                let archive = archives.remove(&name)?;
                Some((name, (record, archive)))
            })
            .collect()
    }

    fn is_archive_name(&self, path: &Path) -> bool {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        self.suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
    }

    /// Immediate children of the root, sorted by name.
    fn children(&self, keep: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
        WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.into_path()),
                Err(e) => {
                    warn!(error = %e, "cannot read cache entry");
                    None
                }
            })
            .filter(|path| keep(path))
            .collect()
    }
}
