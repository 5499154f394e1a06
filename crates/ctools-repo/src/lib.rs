//! # ctools-repo
//!
//! A decoded channel index (`repodata.json` or `repodata.json.bz2`).
//!
//! Fetching the index is the caller's business; this crate only decodes the
//! bytes and answers questions about them:
//!
//! - which download URLs (and sha256 digests) belong to a set of archives
//! - whether a cached archive still matches the md5 the channel published
//!
//! ## Index Layout
//!
//! ```text
//! {
//!   "info": { "subdir": "linux-64", ... },
//!   "packages": {
//!     "<name>-<version>-<build>.tar.bz2": { "name": ..., "md5": ..., ... },
//!     ...
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::{self, Read};
use std::path::Path;

use bzip2::read::BzDecoder;
use ctools_cache::{CacheError, HashAlgorithm, PackageArchive};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while decoding or querying an index
#[derive(Error, Debug)]
pub enum RepoError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("repository index has no '{0}' field")]
    MissingField(&'static str),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub type Result<T> = std::result::Result<T, RepoError>;

/// One archive listed in the index.
///
/// Two entries are equal when their sha256 digests are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoPackage {
    /// Archive file name, the key in `packages`
    #[serde(skip)]
    pub filename: String,
    pub name: String,
    pub version: String,
    pub build: String,
    #[serde(default)]
    pub build_number: Option<u64>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub license_family: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl PartialEq for RepoPackage {
    fn eq(&self, other: &Self) -> bool {
        self.sha256 == other.sha256
    }
}

impl Eq for RepoPackage {}

impl Hash for RepoPackage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sha256.hash(state);
    }
}

impl fmt::Display for RepoPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.version, self.build)
    }
}

#[derive(Deserialize)]
struct RawIndex {
    info: Option<Map<String, Value>>,
    packages: Option<BTreeMap<String, Value>>,
}

/// A channel index for one platform
#[derive(Debug, Clone)]
pub struct Repository {
    url: String,
    info: Map<String, Value>,
    packages: BTreeMap<String, RepoPackage>,
}

impl Repository {
    /// Decode a plain `repodata.json` published under `url`.
    pub fn from_json(url: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let raw: RawIndex = serde_json::from_slice(bytes)?;
        let info = raw.info.ok_or(RepoError::MissingField("info"))?;
        let entries = raw.packages.ok_or(RepoError::MissingField("packages"))?;

        let mut packages = BTreeMap::new();
        for (filename, value) in entries {
            let mut package: RepoPackage = serde_json::from_value(value)?;
            package.filename = filename.clone();
            packages.insert(filename, package);
        }

        let url = url.into();
        debug!(url = %url, packages = packages.len(), "decoded repository index");
        Ok(Self { url, info, packages })
    }

    /// Decode a `repodata.json.bz2`.
    pub fn from_bz2(url: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let mut json = Vec::new();
        BzDecoder::new(bytes).read_to_end(&mut json)?;
        Self::from_json(url, &json)
    }

    /// Load an index saved on disk, compressed or not. The URL is the
    /// directory holding the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let url = path
            .parent()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
        if bytes.starts_with(b"BZh") {
            Self::from_bz2(url, &bytes)
        } else {
            Self::from_json(url, &bytes)
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn info(&self) -> &Map<String, Value> {
        &self.info
    }

    /// Platform subdirectory named in `info`, e.g. `linux-64`.
    pub fn subdir(&self) -> Option<&str> {
        self.info.get("subdir").and_then(Value::as_str)
    }

    pub fn packages(&self) -> &BTreeMap<String, RepoPackage> {
        &self.packages
    }

    pub fn get(&self, filename: &str) -> Option<&RepoPackage> {
        self.packages.get(filename)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Download URL and sha256 of every listed archive among `filenames`.
    /// Names the index does not know are skipped.
    pub fn fetch_urls<'a, I>(&self, filenames: I) -> Vec<(String, Option<String>)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let base = self.url.trim_end_matches('/');
        filenames
            .into_iter()
            .filter_map(|filename| self.packages.get(filename))
            .map(|package| (format!("{}/{}", base, package.filename), package.sha256.clone()))
            .collect()
    }

    /// Compare the md5 of `archive` with the digest the index lists for the
    /// same file name.
    ///
    /// `None` when the index has no entry, or no md5, for the archive.
    pub fn verify_archive(&self, archive: &mut PackageArchive) -> Result<Option<bool>> {
        let filename = archive.file_name();
        let Some(expected) = self.get(&filename).and_then(|p| p.md5.as_deref()) else {
            debug!(archive = %filename, "archive not listed with an md5");
            return Ok(None);
        };
        let actual = archive.content_hash(HashAlgorithm::Md5)?;
        Ok(Some(actual.eq_ignore_ascii_case(expected)))
    }
}

impl PartialEq for Repository {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url && self.packages == other.packages
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Repository({})", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    const URL: &str = "https://repo.example.org/pkgs/free/linux-64";

    fn index() -> Value {
        json!({
            "info": { "subdir": "linux-64", "arch": "x86_64" },
            "packages": {
                "six-1.10.0-py35_0.tar.bz2": {
                    "name": "six", "version": "1.10.0", "build": "py35_0",
                    "build_number": 0, "depends": ["python 3.5*"],
                    "md5": "ab1d2c3e", "sha256": "aa11", "size": 16914,
                    "license": "MIT"
                },
                "zlib-1.2.8-3.tar.bz2": {
                    "name": "zlib", "version": "1.2.8", "build": "3",
                    "md5": "cd4e5f60", "sha256": "bb22"
                }
            }
        })
    }

    #[test]
    fn test_from_json() {
        let bytes = serde_json::to_vec(&index()).unwrap();
        let repo = Repository::from_json(URL, &bytes).unwrap();
        assert_eq!(repo.len(), 2);
        assert_eq!(repo.subdir(), Some("linux-64"));

        let six = repo.get("six-1.10.0-py35_0.tar.bz2").unwrap();
        assert_eq!(six.filename, "six-1.10.0-py35_0.tar.bz2");
        assert_eq!(six.depends, vec!["python 3.5*"]);
        assert_eq!(six.size, Some(16914));
        assert_eq!(six.to_string(), "six 1.10.0 py35_0");

        let zlib = repo.get("zlib-1.2.8-3.tar.bz2").unwrap();
        assert_eq!(zlib.build_number, None);
        assert!(zlib.depends.is_empty());
    }

    #[test]
    fn test_missing_sections() {
        let err = Repository::from_json(URL, br#"{"packages": {}}"#).unwrap_err();
        assert!(matches!(err, RepoError::MissingField("info")));
        let err = Repository::from_json(URL, br#"{"info": {}}"#).unwrap_err();
        assert!(matches!(err, RepoError::MissingField("packages")));
        assert!(matches!(Repository::from_json(URL, b"not json"), Err(RepoError::Json(_))));
    }

    #[test]
    fn test_fetch_urls_skips_unknown() {
        let bytes = serde_json::to_vec(&index()).unwrap();
        let repo = Repository::from_json(format!("{}/", URL), &bytes).unwrap();
        let urls = repo.fetch_urls(["zlib-1.2.8-3.tar.bz2", "numpy-1.10.4-py35_0.tar.bz2"]);
        assert_eq!(
            urls,
            vec![(format!("{}/zlib-1.2.8-3.tar.bz2", URL), Some("bb22".to_string()))]
        );
    }

    #[test]
    fn test_package_identity_is_sha256() {
        let bytes = serde_json::to_vec(&index()).unwrap();
        let repo = Repository::from_json(URL, &bytes).unwrap();
        let mut renamed = repo.get("six-1.10.0-py35_0.tar.bz2").unwrap().clone();
        renamed.filename = "six-copy.tar.bz2".to_string();
        renamed.version = "9".to_string();

        let set: HashSet<RepoPackage> = repo.packages().values().cloned().chain([renamed]).collect();
        assert_eq!(set.len(), 2);
    }
}
