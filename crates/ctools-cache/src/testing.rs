//! Fixtures for tests that need a real cache or environment on disk.
//!
//! Only built for this crate's tests and behind the `testing` feature, which
//! dependent crates enable from their `[dev-dependencies]`.
//!
//! Provides:
//! - [`TestWorkspace`]: an isolated `pkgs/` + `envs/` tree under a temp dir
//! - [`PackageFixture`]: builds extracted packages, `.tar.bz2` archives and
//!   linked environment records from one description
//! - [`write_raw_tar`]: hand-assembled archives, including hostile ones
//!
//! # Usage
//!
//! ```ignore
//! use ctools_cache::testing::{PackageFixture, TestWorkspace};
//!
//! let ws = TestWorkspace::new()?;
//! let pkg = PackageFixture::new("a", "1", "0").file("lib/a.py", b"pass\n");
//! let extracted = pkg.write_extracted(&ws.pkgs_dir)?;
//! let env = ws.env_root("base")?;
//! pkg.link_into(&extracted, &env, "hard-link")?;
//! ```

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use bzip2::write::BzEncoder;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

use crate::package::PrefixMode;

/// Atomic counter for unique workspace IDs
static WORKSPACE_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated cache and environments tree
pub struct TestWorkspace {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Root of the temp tree
    pub root: PathBuf,
    /// Package cache directory
    pub pkgs_dir: PathBuf,
    /// Directory holding named environments
    pub envs_dir: PathBuf,
    pub workspace_id: u32,
}

impl TestWorkspace {
    pub fn new() -> io::Result<Self> {
        let workspace_id = WORKSPACE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().canonicalize()?;

        let pkgs_dir = root.join("pkgs");
        let envs_dir = root.join("envs");
        fs::create_dir_all(&pkgs_dir)?;
        fs::create_dir_all(&envs_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            root,
            pkgs_dir,
            envs_dir,
            workspace_id,
        })
    }

    /// Create (or reuse) `envs/<name>` with an empty `conda-meta/`.
    pub fn env_root(&self, name: &str) -> io::Result<PathBuf> {
        let root = self.envs_dir.join(name);
        fs::create_dir_all(root.join("conda-meta"))?;
        Ok(root)
    }
}

/// Description of one package, written out in whatever form a test needs
#[derive(Debug, Clone)]
pub struct PackageFixture {
    name: String,
    version: String,
    build: String,
    depends: Vec<String>,
    channel: Option<String>,
    files: Vec<(String, Vec<u8>)>,
    prefixes: Vec<(String, PrefixMode, String)>,
    no_link: Vec<String>,
}

impl PackageFixture {
    pub fn new(name: &str, version: &str, build: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            build: build.to_string(),
            depends: Vec::new(),
            channel: None,
            files: Vec::new(),
            prefixes: Vec::new(),
            no_link: Vec::new(),
        }
    }

    pub fn depends(mut self, specs: &[&str]) -> Self {
        self.depends = specs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn channel(mut self, channel: &str) -> Self {
        self.channel = Some(channel.to_string());
        self
    }

    /// Add a payload file.
    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        self.files.push((path.to_string(), content.to_vec()));
        self
    }

    /// Mark a payload file as embedding `prefix`.
    pub fn prefix(mut self, prefix: &str, mode: PrefixMode, path: &str) -> Self {
        self.prefixes.push((prefix.to_string(), mode, path.to_string()));
        self
    }

    pub fn no_link(mut self, path: &str) -> Self {
        self.no_link.push(path.to_string());
        self
    }

    /// `name-version-build`
    pub fn dist_name(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.build)
    }

    /// Archive file name.
    pub fn archive_name(&self) -> String {
        format!("{}.tar.bz2", self.dist_name())
    }

    pub fn index_json(&self) -> Value {
        let mut index = Map::new();
        index.insert("name".into(), json!(self.name));
        index.insert("version".into(), json!(self.version));
        index.insert("build".into(), json!(self.build));
        index.insert("build_number".into(), json!(0));
        index.insert("depends".into(), json!(self.depends));
        if let Some(channel) = &self.channel {
            index.insert("channel".into(), json!(channel));
        }
        Value::Object(index)
    }

    /// Every file of the package, `info/` first, as (relative path, content).
    pub fn entries(&self) -> Vec<(String, Vec<u8>)> {
        let mut entries = Vec::new();
        let index = serde_json::to_vec_pretty(&self.index_json()).unwrap_or_default();
        entries.push(("info/index.json".to_string(), index));

        let listing: String = self.files.iter().map(|(path, _)| format!("{path}\n")).collect();
        entries.push(("info/files".to_string(), listing.into_bytes()));

        if !self.prefixes.is_empty() {
            let table: String = self
                .prefixes
                .iter()
                .map(|(prefix, mode, path)| {
                    let mode = match mode {
                        PrefixMode::Binary => "binary",
                        PrefixMode::Text => "text",
                    };
                    format!("{prefix} {mode} {path}\n")
                })
                .collect();
            entries.push(("info/has_prefix".to_string(), table.into_bytes()));
        }
        if !self.no_link.is_empty() {
            let listing: String = self.no_link.iter().map(|path| format!("{path}\n")).collect();
            entries.push(("info/no_link".to_string(), listing.into_bytes()));
        }

        let recipe = format!("package:\n  name: {}\n  version: {}\n", self.name, self.version);
        entries.push(("info/recipe/meta.yaml".to_string(), recipe.into_bytes()));

        entries.extend(self.files.iter().cloned());
        entries
    }

    /// Write the extracted form under `pkgs_dir`. Returns the package directory.
    pub fn write_extracted(&self, pkgs_dir: &Path) -> io::Result<PathBuf> {
        let root = pkgs_dir.join(self.dist_name());
        for (path, content) in self.entries() {
            let target = root.join(&path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, content)?;
        }
        Ok(root)
    }

    /// Write `<dist>.tar.bz2` under `pkgs_dir`. Returns the archive path.
    pub fn write_archive(&self, pkgs_dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(pkgs_dir)?;
        let path = pkgs_dir.join(self.archive_name());
        let encoder = BzEncoder::new(File::create(&path)?, bzip2::Compression::best());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in self.entries() {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            builder.append_data(&mut header, &name, content.as_slice())?;
        }
        builder.into_inner()?.finish()?.flush()?;
        Ok(path)
    }

    /// Link the extracted package at `source` into `env_root` and record it
    /// in `conda-meta/<dist>.json`.
    ///
    /// `link_type` is the conda-meta string (`hard-link`, `soft-link`,
    /// `copy`). Prefix and no-link files are always copied.
    pub fn link_into(&self, source: &Path, env_root: &Path, link_type: &str) -> io::Result<PathBuf> {
        let copied: Vec<&str> = self
            .prefixes
            .iter()
            .map(|(_, _, path)| path.as_str())
            .chain(self.no_link.iter().map(String::as_str))
            .collect();

        for (path, _) in &self.files {
            let from = source.join(path);
            let to = env_root.join(path);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }
            if copied.contains(&path.as_str()) {
                fs::copy(&from, &to)?;
                continue;
            }
            match link_type {
                "hard-link" => fs::hard_link(&from, &to)?,
                #[cfg(unix)]
                "soft-link" => std::os::unix::fs::symlink(&from, &to)?,
                _ => {
                    fs::copy(&from, &to)?;
                }
            }
        }

        self.write_meta(env_root, json!({ "source": source, "type": link_type }))
    }

    /// Write only the `conda-meta` record, with an arbitrary `link` value
    /// (or none when `link` is null).
    pub fn write_meta(&self, env_root: &Path, link: Value) -> io::Result<PathBuf> {
        let mut meta = match self.index_json() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let files: Vec<&str> = self.files.iter().map(|(path, _)| path.as_str()).collect();
        meta.insert("files".into(), json!(files));
        if !link.is_null() {
            meta.insert("link".into(), link);
        }

        let meta_dir = env_root.join("conda-meta");
        fs::create_dir_all(&meta_dir)?;
        let path = meta_dir.join(format!("{}.json", self.dist_name()));
        fs::write(&path, serde_json::to_vec_pretty(&Value::Object(meta)).unwrap_or_default())?;
        Ok(path)
    }
}

/// Write `conda-meta/history` for the environment at `env_root`.
pub fn write_history(env_root: &Path, contents: &str) -> io::Result<PathBuf> {
    let meta_dir = env_root.join("conda-meta");
    fs::create_dir_all(&meta_dir)?;
    let path = meta_dir.join("history");
    fs::write(&path, contents)?;
    Ok(path)
}

/// One hand-built tar member
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub path: String,
    pub entry_type: tar::EntryType,
    pub content: Vec<u8>,
    pub link_target: Option<String>,
}

impl RawEntry {
    pub fn file(path: &str, content: &[u8]) -> Self {
        Self {
            path: path.to_string(),
            entry_type: tar::EntryType::Regular,
            content: content.to_vec(),
            link_target: None,
        }
    }

    pub fn symlink(path: &str, target: &str) -> Self {
        Self {
            path: path.to_string(),
            entry_type: tar::EntryType::Symlink,
            content: Vec::new(),
            link_target: Some(target.to_string()),
        }
    }

    pub fn hardlink(path: &str, target: &str) -> Self {
        Self {
            entry_type: tar::EntryType::Link,
            ..Self::symlink(path, target)
        }
    }
}

/// Write a bzip2 tar whose header names are copied byte for byte.
///
/// `tar::Builder` refuses `..` and absolute names; this does not, so tests can
/// produce the archives the extraction checks are meant to stop.
pub fn write_raw_tar(path: &Path, entries: &[RawEntry]) -> io::Result<()> {
    let encoder = BzEncoder::new(File::create(path)?, bzip2::Compression::best());
    let mut builder = tar::Builder::new(encoder);
    for entry in entries {
        let mut header = tar::Header::new_old();
        copy_name(&mut header.as_old_mut().name, &entry.path)?;
        if let Some(target) = &entry.link_target {
            copy_name(&mut header.as_old_mut().linkname, target)?;
        }
        header.set_entry_type(entry.entry_type);
        header.set_size(entry.content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, entry.content.as_slice())?;
    }
    builder.into_inner()?.finish()?.flush()?;
    Ok(())
}

fn copy_name(slot: &mut [u8], name: &str) -> io::Result<()> {
    let bytes = name.as_bytes();
    if bytes.len() >= slot.len() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "name too long for header"));
    }
    slot[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}
