//! Compressed package archives.
//!
//! A [`PackageArchive`] wraps one `.tar.bz2` (or `.tar.gz` / plain `.tar`)
//! artifact. The member listing is read once and reused until
//! [`PackageArchive::reopen`] is called. Member content is always streamed
//! from a fresh reader, so extracting or hashing never holds more than one
//! block in memory.
//!
//! Random access into a bzip2 stream means decompressing from the start every
//! time. Workloads that read an archive repeatedly can call
//! [`PackageArchive::materialize`] once: the container is decompressed into a
//! private temporary file and all later reads go to that file. The temporary
//! file is removed by [`PackageArchive::close`], or when the archive is
//! dropped if `close` was never called.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use globset::Glob;
use tempfile::TempPath;
use tracing::{debug, instrument, warn};

use crate::cache::ARCHIVE_SUFFIXES;
use crate::hashing::{hash_reader_hex, HashAlgorithm};
use crate::path_safety::check_members;
use crate::{CacheError, Result};

/// Offset of the `ustar` magic inside a tar header block.
const USTAR_MAGIC_OFFSET: usize = 257;

/// Container compression, detected from the leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Uncompressed tar
    None,
    Bzip2,
    Gzip,
}

impl Compression {
    /// Identify the compression from the first block of the file.
    pub fn detect(header: &[u8]) -> Option<Self> {
        if header.starts_with(b"BZh") {
            Some(Compression::Bzip2)
        } else if header.starts_with(&[0x1f, 0x8b]) {
            Some(Compression::Gzip)
        } else if header.len() >= USTAR_MAGIC_OFFSET + 5
            && &header[USTAR_MAGIC_OFFSET..USTAR_MAGIC_OFFSET + 5] == b"ustar"
        {
            Some(Compression::None)
        } else {
            None
        }
    }

    pub fn is_compressed(&self) -> bool {
        !matches!(self, Compression::None)
    }
}

/// Kind of an archive member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberKind {
    File,
    Directory,
    Symlink,
    Hardlink,
    Other,
}

impl From<tar::EntryType> for MemberKind {
    fn from(entry_type: tar::EntryType) -> Self {
        match entry_type {
            tar::EntryType::Regular | tar::EntryType::Continuous => MemberKind::File,
            tar::EntryType::Directory => MemberKind::Directory,
            tar::EntryType::Symlink => MemberKind::Symlink,
            tar::EntryType::Link => MemberKind::Hardlink,
            _ => MemberKind::Other,
        }
    }
}

/// Metadata for one archive member
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchiveMember {
    /// Path relative to the archive root, without a leading `./`
    pub path: PathBuf,
    pub kind: MemberKind,
    pub size: u64,
    pub mode: u32,
    /// Target of a symbolic or hard link member
    pub link_target: Option<PathBuf>,
}

impl ArchiveMember {
    pub fn new(path: impl Into<PathBuf>, kind: MemberKind, size: u64) -> Self {
        Self {
            path: path.into(),
            kind,
            size,
            mode: 0o644,
            link_target: None,
        }
    }

    pub fn with_link_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.link_target = Some(target.into());
        self
    }

    pub fn is_file(&self) -> bool {
        self.kind == MemberKind::File
    }

    pub fn is_link(&self) -> bool {
        matches!(self.kind, MemberKind::Symlink | MemberKind::Hardlink)
    }

    /// Member path with `/` separators.
    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().replace('\\', "/")
    }

    fn from_entry<R: Read>(entry: &tar::Entry<'_, R>) -> io::Result<Self> {
        let header = entry.header();
        let raw = entry.path()?;
        let raw: &Path = &raw;
        let path = raw.strip_prefix(".").unwrap_or(raw).to_path_buf();
        Ok(Self {
            path,
            kind: MemberKind::from(header.entry_type()),
            size: header.size()?,
            mode: header.mode().unwrap_or(0o644),
            link_target: entry.link_name()?.map(|target| target.into_owned()),
        })
    }
}

/// A compressed package artifact in the cache.
///
/// Not safe for concurrent use: every read goes through `&mut self`.
#[derive(Debug)]
pub struct PackageArchive {
    path: PathBuf,
    compression: Compression,
    materialized: Option<TempPath>,
    members: Option<Vec<ArchiveMember>>,
    hashes: HashMap<HashAlgorithm, String>,
}

impl PackageArchive {
    /// Open the archive at `path`, optionally materializing it straight away.
    ///
    /// Fails with [`CacheError::InvalidArchive`] if the file is missing or
    /// is not a recognised tar container.
    pub fn open(path: impl AsRef<Path>, materialize: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(CacheError::InvalidArchive {
                reason: "file does not exist".to_string(),
                path,
            });
        }

        let mut header = Vec::with_capacity(512);
        File::open(&path)?.take(512).read_to_end(&mut header)?;
        let Some(compression) = Compression::detect(&header) else {
            return Err(CacheError::InvalidArchive {
                reason: "unrecognized container format".to_string(),
                path,
            });
        };

        let mut archive = Self {
            path,
            compression,
            materialized: None,
            members: None,
            hashes: HashMap::new(),
        };
        if materialize {
            archive.materialize()?;
        }
        Ok(archive)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File name without the archive suffix, i.e. the extracted directory name.
    pub fn stem(&self) -> String {
        let name = self.file_name();
        ARCHIVE_SUFFIXES
            .iter()
            .find_map(|suffix| name.strip_suffix(suffix))
            .map(str::to_string)
            .unwrap_or(name)
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn is_materialized(&self) -> bool {
        self.materialized.is_some()
    }

    /// Location of the decompressed copy while materialized.
    pub fn materialized_path(&self) -> Option<&Path> {
        self.materialized.as_deref()
    }

    /// Decompress into a temporary file and serve later reads from it.
    ///
    /// No-op for uncompressed or already materialized archives.
    #[instrument(skip(self), fields(archive = %self.path.display()), level = "debug")]
    pub fn materialize(&mut self) -> Result<()> {
        if self.materialized.is_some() || !self.compression.is_compressed() {
            return Ok(());
        }

        let mut temp = tempfile::Builder::new()
            .prefix(".ctools-")
            .suffix(".tar")
            .tempfile()?;
        let mut reader = self.open_reader()?;
        io::copy(&mut reader, temp.as_file_mut()).map_err(|e| self.corrupt(e))?;
        drop(reader);

        let temp = temp.into_temp_path();
        debug!(temp = %temp.display(), "materialized archive");
        self.materialized = Some(temp);
        Ok(())
    }

    /// Release the materialized copy and forget the member listing.
    pub fn close(&mut self) -> Result<()> {
        self.members = None;
        if let Some(temp) = self.materialized.take() {
            debug!(temp = %temp.display(), "removing materialized archive");
            temp.close()?;
        }
        Ok(())
    }

    /// Force the container to be re-read on the next listing.
    pub fn reopen(&mut self) {
        self.members = None;
    }

    /// All members in archive order.
    pub fn members(&mut self) -> Result<&[ArchiveMember]> {
        if self.members.is_none() {
            let members = self.read_listing()?;
            self.members = Some(members);
        }
        Ok(self.members.as_deref().unwrap_or_default())
    }

    /// Members under `info/`.
    pub fn info_members(&mut self) -> Result<Vec<ArchiveMember>> {
        self.members_with_prefix("info/")
    }

    /// Members under `info/recipe/`.
    pub fn recipe_members(&mut self) -> Result<Vec<ArchiveMember>> {
        self.members_with_prefix("info/recipe/")
    }

    /// Members whose path matches the glob `pattern`.
    pub fn find(&mut self, pattern: &str) -> Result<Vec<ArchiveMember>> {
        let matcher = Glob::new(pattern)?.compile_matcher();
        Ok(self
            .members()?
            .iter()
            .filter(|member| matcher.is_match(&member.path))
            .cloned()
            .collect())
    }

    /// Stream the content of `members` without touching disk.
    ///
    /// `visit` is called once per requested member, in archive order, with a
    /// reader over its content. Returning `ControlFlow::Break` stops the pass.
    pub fn read_members<F>(&mut self, members: &[ArchiveMember], mut visit: F) -> Result<()>
    where
        F: FnMut(&ArchiveMember, &mut dyn Read) -> Result<ControlFlow<()>>,
    {
        let mut wanted: HashSet<&Path> = members.iter().map(|m| m.path.as_path()).collect();
        if wanted.is_empty() {
            return Ok(());
        }

        let reader = self.open_reader()?;
        let mut tar = tar::Archive::new(reader);
        let entries = tar.entries().map_err(|e| self.corrupt(e))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| self.corrupt(e))?;
            let member = ArchiveMember::from_entry(&entry).map_err(|e| self.corrupt(e))?;
            if !wanted.remove(member.path.as_path()) {
                continue;
            }
            if visit(&member, &mut entry)?.is_break() || wanted.is_empty() {
                break;
            }
        }
        Ok(())
    }

    /// Extract `members` under `destination`.
    ///
    /// Every member is checked before anything is written; one unsafe member
    /// fails the whole call. Returns the paths written.
    #[instrument(skip(self, members), fields(archive = %self.path.display()), level = "debug")]
    pub fn extract_to(&mut self, members: &[ArchiveMember], destination: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(destination)?;
        let targets = check_members(members, destination)?;
        let mut wanted: HashSet<&Path> = members.iter().map(|m| m.path.as_path()).collect();

        let reader = self.open_reader()?;
        let mut tar = tar::Archive::new(reader);
        tar.set_preserve_permissions(true);
        let entries = tar.entries().map_err(|e| self.corrupt(e))?;
        for entry in entries {
            if wanted.is_empty() {
                break;
            }
            let mut entry = entry.map_err(|e| self.corrupt(e))?;
            let member = ArchiveMember::from_entry(&entry).map_err(|e| self.corrupt(e))?;
            if !wanted.remove(member.path.as_path()) {
                continue;
            }
            if !entry.unpack_in(destination)? {
                return Err(CacheError::PathEscape(destination.join(&member.path)));
            }
        }

        if !wanted.is_empty() {
            warn!(missing = wanted.len(), "requested members not found in archive");
        }
        Ok(targets)
    }

    /// Extract every member under `destination`.
    pub fn extract_all(&mut self, destination: &Path) -> Result<Vec<PathBuf>> {
        let members = self.members()?.to_vec();
        self.extract_to(&members, destination)
    }

    /// Digest of the archive file itself (compressed bytes), memoized per
    /// algorithm.
    pub fn content_hash(&mut self, algorithm: HashAlgorithm) -> Result<String> {
        if let Some(digest) = self.hashes.get(&algorithm) {
            return Ok(digest.clone());
        }
        let mut file = BufReader::new(File::open(&self.path)?);
        let digest = hash_reader_hex(&mut file, algorithm)?;
        self.hashes.insert(algorithm, digest.clone());
        Ok(digest)
    }

    fn members_with_prefix(&mut self, prefix: &str) -> Result<Vec<ArchiveMember>> {
        Ok(self
            .members()?
            .iter()
            .filter(|member| member.path_str().starts_with(prefix))
            .cloned()
            .collect())
    }

    fn read_listing(&self) -> Result<Vec<ArchiveMember>> {
        let reader = self.open_reader()?;
        let mut tar = tar::Archive::new(reader);
        let entries = tar.entries().map_err(|e| self.corrupt(e))?;
        let mut members = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| self.corrupt(e))?;
            members.push(ArchiveMember::from_entry(&entry).map_err(|e| self.corrupt(e))?);
        }
        debug!(archive = %self.path.display(), members = members.len(), "read archive listing");
        Ok(members)
    }

    /// Fresh reader over the tar stream, decompressing when needed.
    fn open_reader(&self) -> Result<Box<dyn Read + '_>> {
        if let Some(temp) = &self.materialized {
            return Ok(Box::new(BufReader::new(File::open(temp)?)));
        }
        let file = BufReader::new(File::open(&self.path)?);
        Ok(match self.compression {
            Compression::None => Box::new(file),
            Compression::Bzip2 => Box::new(BzDecoder::new(file)),
            Compression::Gzip => Box::new(GzDecoder::new(file)),
        })
    }

    fn corrupt(&self, e: io::Error) -> CacheError {
        CacheError::InvalidArchive {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

impl Drop for PackageArchive {
    fn drop(&mut self) {
        if let Some(temp) = &self.materialized {
            debug!(temp = %temp.display(), "archive dropped while materialized");
        }
    }
}
