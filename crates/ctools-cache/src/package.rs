//! Extracted package directories.
//!
//! A [`PackageRecord`] is a read-only view over `<pkg>/info/`. Only
//! `info/index.json` is read when the record is opened; every other metadata
//! file is parsed on first access and kept for the lifetime of the record.
//! Optional files that are missing read as empty.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{CacheError, Result};

/// Typed view of `info/index.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageIndex {
    pub name: String,
    pub version: String,
    pub build: String,
    #[serde(default)]
    pub build_number: Option<u64>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub subdir: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
}

impl PackageIndex {
    /// Dependency names with version and build constraints dropped.
    pub fn depends_names(&self) -> impl Iterator<Item = &str> {
        self.depends
            .iter()
            .filter_map(|spec| spec.split_whitespace().next())
    }
}

/// How an embedded install prefix is stored inside a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefixMode {
    Binary,
    Text,
}

/// Parsed `info/has_prefix`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixTable {
    /// Relative file path -> how the prefix is embedded
    pub files: BTreeMap<String, PrefixMode>,
    /// Placeholder prefix used by binary files, if any
    pub binary_prefix: Option<String>,
    /// Placeholder prefix used by text files, if any
    pub text_prefix: Option<String>,
}

impl PrefixTable {
    /// Parse the whitespace separated `prefix mode path` lines.
    ///
    /// A line holding only a path is a text file using the default
    /// placeholder.
    pub fn parse(contents: &str) -> Self {
        let mut table = PrefixTable::default();
        for line in contents.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [] => {}
                [file] => {
                    table.files.insert((*file).to_string(), PrefixMode::Text);
                }
                [prefix, mode, file] => {
                    let mode = match *mode {
                        "binary" => PrefixMode::Binary,
                        "text" => PrefixMode::Text,
                        other => {
                            warn!(mode = other, file = *file, "unknown has_prefix mode, skipping");
                            continue;
                        }
                    };
                    match mode {
                        PrefixMode::Binary => table.binary_prefix = Some((*prefix).to_string()),
                        PrefixMode::Text => table.text_prefix = Some((*prefix).to_string()),
                    }
                    table.files.insert((*file).to_string(), mode);
                }
                _ => warn!(line = line, "malformed has_prefix line, skipping"),
            }
        }
        table
    }
}

/// One entry of `info/paths.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    #[serde(rename = "_path")]
    pub path: String,
    #[serde(default)]
    pub path_type: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub size_in_bytes: Option<u64>,
    #[serde(default)]
    pub no_link: bool,
    #[serde(default)]
    pub file_mode: Option<String>,
    #[serde(default)]
    pub prefix_placeholder: Option<String>,
}

/// Parsed `info/paths.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsManifest {
    #[serde(default)]
    pub paths: Vec<PathEntry>,
    #[serde(default)]
    pub paths_version: Option<u32>,
}

/// An extracted package directory in the cache.
///
/// Identity is the canonical directory path: equality, hashing and ordering
/// ignore content, so two records opened independently for the same
/// directory are interchangeable.
pub struct PackageRecord {
    path: PathBuf,
    info: PathBuf,
    raw_index: Map<String, Value>,
    index: PackageIndex,
    files: OnceCell<BTreeSet<String>>,
    has_prefix: OnceCell<PrefixTable>,
    no_link: OnceCell<BTreeSet<String>>,
    paths: OnceCell<Option<PathsManifest>>,
}

impl PackageRecord {
    /// Open the extracted package at `path`.
    ///
    /// Fails with [`CacheError::InvalidPackage`] unless `info/index.json`
    /// exists and holds a JSON object with `name`, `version` and `build`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let index_path = path.join("info").join("index.json");
        if !index_path.is_file() {
            return Err(CacheError::InvalidPackage {
                path: path.to_path_buf(),
                reason: format!("{} does not exist", index_path.display()),
            });
        }

        let invalid = |reason: String| CacheError::InvalidPackage {
            path: path.to_path_buf(),
            reason,
        };
        let contents = fs::read_to_string(&index_path).map_err(|e| invalid(e.to_string()))?;
        let raw: Value = serde_json::from_str(&contents).map_err(|e| invalid(e.to_string()))?;
        let Value::Object(raw_index) = raw else {
            return Err(invalid("info/index.json is not a mapping".to_string()));
        };
        let index: PackageIndex = serde_json::from_value(Value::Object(raw_index.clone()))
            .map_err(|e| invalid(e.to_string()))?;

        let path = path.canonicalize()?;
        let info = path.join("info");
        Ok(Self {
            path,
            info,
            raw_index,
            index,
            files: OnceCell::new(),
            has_prefix: OnceCell::new(),
            no_link: OnceCell::new(),
            paths: OnceCell::new(),
        })
    }

    /// Canonical package directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory name inside the cache, usually `name-version-build`.
    pub fn dir_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn index(&self) -> &PackageIndex {
        &self.index
    }

    pub fn name(&self) -> &str {
        &self.index.name
    }

    pub fn version(&self) -> &str {
        &self.index.version
    }

    pub fn build(&self) -> &str {
        &self.index.build
    }

    pub fn depends(&self) -> &[String] {
        &self.index.depends
    }

    /// `name-version-build`
    pub fn full_spec(&self) -> String {
        format!("{}-{}-{}", self.index.name, self.index.version, self.index.build)
    }

    /// Any field of `info/index.json`, typed or not.
    pub fn get_optional_field(&self, name: &str) -> Option<&Value> {
        self.raw_index.get(name)
    }

    /// Relative paths listed in `info/files`.
    pub fn files(&self) -> &BTreeSet<String> {
        self.files
            .get_or_init(|| match self.read_info("files") {
                Some(contents) => parse_lines(&contents),
                None => BTreeSet::new(),
            })
    }

    pub fn iter_files(&self) -> impl Iterator<Item = &str> {
        self.files().iter().map(String::as_str)
    }

    /// Files whose content embeds the install prefix, keyed by path.
    pub fn has_prefix(&self) -> &BTreeMap<String, PrefixMode> {
        &self.prefix_table().files
    }

    /// Full `info/has_prefix` table, including the placeholder prefixes.
    pub fn prefix_table(&self) -> &PrefixTable {
        self.has_prefix.get_or_init(|| match self.read_info("has_prefix") {
            Some(contents) => PrefixTable::parse(&contents),
            None => PrefixTable::default(),
        })
    }

    /// Files that are always copied, never linked.
    pub fn no_link(&self) -> &BTreeSet<String> {
        self.no_link
            .get_or_init(|| match self.read_info("no_link") {
                Some(contents) => parse_lines(&contents),
                None => BTreeSet::new(),
            })
    }

    /// `info/paths.json`, when the package ships one.
    pub fn paths(&self) -> Option<&PathsManifest> {
        self.paths
            .get_or_init(|| {
                let contents = self.read_info("paths.json")?;
                match serde_json::from_str(&contents) {
                    Ok(manifest) => Some(manifest),
                    Err(e) => {
                        warn!(package = %self.path.display(), error = %e, "unreadable paths.json");
                        None
                    }
                }
            })
            .as_ref()
    }

    /// Read an optional file under `info/`. Missing files are `None`.
    fn read_info(&self, name: &str) -> Option<String> {
        let path = self.info.join(name);
        match fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "optional metadata file absent");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read metadata file");
                None
            }
        }
    }
}

fn parse_lines(contents: &str) -> BTreeSet<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

impl PartialEq for PackageRecord {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for PackageRecord {}

impl Hash for PackageRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl PartialOrd for PackageRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path.cmp(&other.path)
    }
}

impl fmt::Debug for PackageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageRecord")
            .field("path", &self.path)
            .field("spec", &self.full_spec())
            .finish()
    }
}

impl fmt::Display for PackageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_spec())
    }
}

/// Caller-owned registry that hands out one shared record per directory.
///
/// A scan over a cache and several environments sees the same package
/// directory many times; registering through the pool keeps a single
/// in-memory copy. The pool lives as long as the scan that owns it.
#[derive(Debug, Default)]
pub struct PackagePool {
    records: HashMap<PathBuf, Arc<PackageRecord>>,
}

impl PackagePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the pooled record for `record`'s path, inserting it if new.
    pub fn register(&mut self, record: PackageRecord) -> Arc<PackageRecord> {
        self.records
            .entry(record.path.clone())
            .or_insert_with(|| Arc::new(record))
            .clone()
    }

    /// Take in a record handed out by another pool. A record already held
    /// for the same path wins.
    pub fn adopt(&mut self, record: &Arc<PackageRecord>) -> Arc<PackageRecord> {
        self.records
            .entry(record.path.clone())
            .or_insert_with(|| record.clone())
            .clone()
    }

    /// Pooled record for `path`, opening it on first request.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<Arc<PackageRecord>> {
        let path = path.as_ref();
        if let Some(record) = self.records.get(path) {
            return Ok(record.clone());
        }
        if let Ok(canonical) = path.canonicalize() {
            if let Some(record) = self.records.get(&canonical) {
                return Ok(record.clone());
            }
        }
        let record = PackageRecord::open(path)?;
        Ok(self.register(record))
    }

    pub fn get(&self, path: &Path) -> Option<Arc<PackageRecord>> {
        self.records.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PackageFixture;
    use tempfile::TempDir;

    #[test]
    fn test_open_requires_index() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("broken/info")).unwrap();
        let err = PackageRecord::open(temp.path().join("broken")).unwrap_err();
        assert!(matches!(err, CacheError::InvalidPackage { .. }));
    }

    #[test]
    fn test_open_rejects_non_mapping_index() {
        let temp = TempDir::new().unwrap();
        let info = temp.path().join("odd/info");
        fs::create_dir_all(&info).unwrap();
        fs::write(info.join("index.json"), "[1, 2, 3]").unwrap();
        let err = PackageRecord::open(temp.path().join("odd")).unwrap_err();
        assert!(matches!(err, CacheError::InvalidPackage { .. }));
    }

    #[test]
    fn test_full_spec_and_fields() {
        let temp = TempDir::new().unwrap();
        let dir = PackageFixture::new("numpy", "1.11.0", "py35_0")
            .depends(&["python 3.5*", "mkl 11.3.3"])
            .file("lib/numpy/__init__.py", b"import os\n")
            .write_extracted(temp.path())
            .unwrap();

        let record = PackageRecord::open(&dir).unwrap();
        assert_eq!(record.full_spec(), "numpy-1.11.0-py35_0");
        assert_eq!(record.to_string(), "numpy-1.11.0-py35_0");
        assert_eq!(record.dir_name(), "numpy-1.11.0-py35_0");
        assert_eq!(
            record.index().depends_names().collect::<Vec<_>>(),
            vec!["python", "mkl"]
        );
        assert_eq!(
            record.get_optional_field("name"),
            Some(&Value::String("numpy".to_string()))
        );
        assert!(record.get_optional_field("no_such_field").is_none());
        assert!(record.files().contains("lib/numpy/__init__.py"));
    }

    #[test]
    fn test_optional_files_default_to_empty() {
        let temp = TempDir::new().unwrap();
        let dir = PackageFixture::new("zlib", "1.2.8", "3")
            .file("lib/libz.so", b"\x7fELF")
            .write_extracted(temp.path())
            .unwrap();
        fs::remove_file(dir.join("info/files")).unwrap();

        let record = PackageRecord::open(&dir).unwrap();
        assert!(record.files().is_empty());
        assert!(record.no_link().is_empty());
        assert!(record.has_prefix().is_empty());
        assert!(record.paths().is_none());
    }

    #[test]
    fn test_has_prefix_and_no_link() {
        let temp = TempDir::new().unwrap();
        let dir = PackageFixture::new("python", "3.5.1", "0")
            .file("bin/python3.5", b"binary /opt/anaconda1anaconda2anaconda3")
            .file("bin/2to3", b"#!/opt/anaconda1anaconda2anaconda3/bin/python")
            .file("lib/site.py", b"pass")
            .prefix("/opt/anaconda1anaconda2anaconda3", PrefixMode::Binary, "bin/python3.5")
            .prefix("/opt/anaconda1anaconda2anaconda3", PrefixMode::Text, "bin/2to3")
            .no_link("lib/site.py")
            .write_extracted(temp.path())
            .unwrap();

        let record = PackageRecord::open(&dir).unwrap();
        assert_eq!(record.has_prefix().get("bin/python3.5"), Some(&PrefixMode::Binary));
        assert_eq!(record.has_prefix().get("bin/2to3"), Some(&PrefixMode::Text));
        assert_eq!(
            record.prefix_table().binary_prefix.as_deref(),
            Some("/opt/anaconda1anaconda2anaconda3")
        );
        assert!(record.no_link().contains("lib/site.py"));
    }

    #[test]
    fn test_prefix_table_single_column_and_garbage() {
        let table = PrefixTable::parse("bin/activate\n/p weird bin/x\n\n/p text bin/y\n");
        assert_eq!(table.files.get("bin/activate"), Some(&PrefixMode::Text));
        assert_eq!(table.files.get("bin/y"), Some(&PrefixMode::Text));
        assert!(!table.files.contains_key("bin/x"));
        assert_eq!(table.text_prefix.as_deref(), Some("/p"));
    }

    #[test]
    fn test_paths_json() {
        let temp = TempDir::new().unwrap();
        let dir = PackageFixture::new("six", "1.10.0", "py35_0")
            .file("lib/six.py", b"# six")
            .write_extracted(temp.path())
            .unwrap();
        fs::write(
            dir.join("info/paths.json"),
            r#"{"paths_version": 1, "paths": [{"_path": "lib/six.py", "path_type": "hardlink", "size_in_bytes": 5}]}"#,
        )
        .unwrap();

        let record = PackageRecord::open(&dir).unwrap();
        let paths = record.paths().unwrap();
        assert_eq!(paths.paths_version, Some(1));
        assert_eq!(paths.paths[0].path, "lib/six.py");
        assert_eq!(paths.paths[0].size_in_bytes, Some(5));
    }

    #[test]
    fn test_identity_is_path() {
        let temp = TempDir::new().unwrap();
        let dir = PackageFixture::new("a", "1", "0")
            .write_extracted(temp.path())
            .unwrap();

        let first = PackageRecord::open(&dir).unwrap();
        let second = PackageRecord::open(dir.join("..").join("a-1-0")).unwrap();
        assert_eq!(first, second);

        let mut set = std::collections::HashSet::new();
        set.insert(first);
        assert!(set.contains(&second));
    }

    #[test]
    fn test_pool_shares_records() {
        let temp = TempDir::new().unwrap();
        let dir = PackageFixture::new("a", "1", "0")
            .write_extracted(temp.path())
            .unwrap();

        let mut pool = PackagePool::new();
        let first = pool.open(&dir).unwrap();
        let second = pool.register(PackageRecord::open(&dir).unwrap());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 1);

        pool.clear();
        assert!(pool.is_empty());
    }
}
