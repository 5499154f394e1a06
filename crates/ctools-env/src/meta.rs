//! Per-package records under `conda-meta/`.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ctools_cache::{PackagePool, PackageRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::link::LinkType;
use crate::{EnvError, Result};

/// `link` block of a conda-meta record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfo {
    /// Cache directory the files were linked from
    pub source: PathBuf,
    #[serde(rename = "type")]
    pub link_type: LinkType,
}

#[derive(Debug, Clone, Deserialize)]
struct MetaFields {
    name: String,
    version: String,
    build: String,
    #[serde(default)]
    build_number: Option<u64>,
    #[serde(default)]
    depends: Vec<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    files: BTreeSet<String>,
    #[serde(default)]
    link: Option<LinkInfo>,
}

/// One installed package, as recorded in `conda-meta/<dist>.json`.
///
/// Identity is the path of the JSON file.
#[derive(Debug, Clone)]
pub struct PackageMeta {
    path: PathBuf,
    fields: MetaFields,
    raw: Map<String, Value>,
}

impl PackageMeta {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let contents = fs::read_to_string(&path)?;
        let json = |source| EnvError::Json {
            path: path.clone(),
            source,
        };
        let raw: Map<String, Value> = serde_json::from_str(&contents).map_err(json)?;
        let fields: MetaFields = serde_json::from_value(Value::Object(raw.clone())).map_err(json)?;
        Ok(Self { path, fields, raw })
    }

    /// Path of the JSON record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.fields.name
    }

    pub fn version(&self) -> &str {
        &self.fields.version
    }

    pub fn build(&self) -> &str {
        &self.fields.build
    }

    pub fn build_number(&self) -> Option<u64> {
        self.fields.build_number
    }

    pub fn depends(&self) -> &[String] {
        &self.fields.depends
    }

    /// Dependency names with constraints dropped.
    pub fn depends_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .depends
            .iter()
            .filter_map(|spec| spec.split_whitespace().next())
    }

    pub fn channel(&self) -> Option<&str> {
        self.fields.channel.as_deref()
    }

    /// Files installed into the environment, relative to its root.
    pub fn files(&self) -> &BTreeSet<String> {
        &self.fields.files
    }

    pub fn link(&self) -> Option<&LinkInfo> {
        self.fields.link.as_ref()
    }

    /// Recorded link type; records without link metadata count as hard links.
    pub fn link_type(&self) -> LinkType {
        self.fields
            .link
            .as_ref()
            .map(|link| link.link_type)
            .unwrap_or(LinkType::HardLink)
    }

    /// Recorded link source, or `env_root` when none was recorded.
    pub fn link_source(&self, env_root: &Path) -> PathBuf {
        self.fields
            .link
            .as_ref()
            .map(|link| link.source.clone())
            .unwrap_or_else(|| env_root.to_path_buf())
    }

    /// `name-version-build`
    pub fn full_spec(&self) -> String {
        format!("{}-{}-{}", self.fields.name, self.fields.version, self.fields.build)
    }

    pub fn get_optional_field(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }

    /// The cache record this package was linked from.
    pub fn to_package(&self, env_root: &Path, pool: &mut PackagePool) -> Result<Arc<PackageRecord>> {
        Ok(pool.open(self.link_source(env_root))?)
    }
}

impl PartialEq for PackageMeta {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for PackageMeta {}

impl Hash for PackageMeta {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for PackageMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_spec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_with_integer_link_type() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a-1-0.json");
        fs::write(
            &path,
            r#"{"name": "a", "version": "1", "build": "0", "depends": ["b >=2"],
                "files": ["lib/a.py"], "link": {"source": "/pkgs/a-1-0", "type": 3},
                "url": "https://repo.example/a-1-0.tar.bz2"}"#,
        )
        .unwrap();

        let meta = PackageMeta::open(&path).unwrap();
        assert_eq!(meta.full_spec(), "a-1-0");
        assert_eq!(meta.link_type(), LinkType::Copy);
        assert_eq!(meta.link_source(Path::new("/env")), PathBuf::from("/pkgs/a-1-0"));
        assert_eq!(meta.depends_names().collect::<Vec<_>>(), vec!["b"]);
        assert!(meta.files().contains("lib/a.py"));
        assert_eq!(
            meta.get_optional_field("url").and_then(Value::as_str),
            Some("https://repo.example/a-1-0.tar.bz2")
        );
        assert!(meta.get_optional_field("nope").is_none());
    }

    #[test]
    fn test_missing_link_defaults_to_root_hardlink() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a-1-0.json");
        fs::write(&path, r#"{"name": "a", "version": "1", "build": "0"}"#).unwrap();

        let meta = PackageMeta::open(&path).unwrap();
        assert_eq!(meta.link_type(), LinkType::HardLink);
        assert_eq!(meta.link_source(Path::new("/env")), PathBuf::from("/env"));
        assert!(meta.channel().is_none());
    }

    #[test]
    fn test_invalid_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(PackageMeta::open(&path), Err(EnvError::Json { .. })));
    }
}
