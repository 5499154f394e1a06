//! # ctools-cache
//!
//! Read-only model of a package cache: the extracted package directories and
//! the compressed archives they were unpacked from.
//!
//! ## Directory Layout
//!
//! ```text
//! pkgs/
//! ├── numpy-1.11.0-py35_0/          # extracted package (PackageRecord)
//! │   ├── info/
//! │   │   ├── index.json
//! │   │   ├── files
//! │   │   ├── has_prefix            # optional
//! │   │   ├── no_link               # optional
//! │   │   └── paths.json            # optional
//! │   └── lib/...
//! └── numpy-1.11.0-py35_0.tar.bz2   # original archive (PackageArchive)
//! ```
//!
//! Nothing in this crate writes into the cache. The only filesystem writes are
//! explicit extractions into a caller-chosen destination and the temporary file
//! created by [`PackageArchive::materialize`].

pub mod archive;
pub mod cache;
pub mod hashing;
pub mod package;
pub mod path_safety;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use archive::{ArchiveMember, Compression, MemberKind, PackageArchive};
pub use cache::{PackageCache, ARCHIVE_SUFFIXES};
pub use hashing::{hash_reader, hash_reader_hex, HashAlgorithm, HASH_BLOCK_SIZE};
pub use package::{
    PackageIndex, PackagePool, PackageRecord, PathEntry, PathsManifest, PrefixMode, PrefixTable,
};
pub use path_safety::{check_member, check_members, resolve_and_check};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the cache model
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid package {path:?}: {reason}")]
    InvalidPackage { path: PathBuf, reason: String },

    #[error("Invalid archive {path:?}: {reason}")]
    InvalidArchive { path: PathBuf, reason: String },

    #[error("Bad path to outside destination directory: {0:?}")]
    PathEscape(PathBuf),

    #[error("Bad link {link:?}: {reason}")]
    LinkEscape { link: PathBuf, reason: String },

    #[error("JSON error in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedHash(String),

    #[error("Cache should be a directory path: {0:?}")]
    NotADirectory(PathBuf),
}

pub type Result<T> = std::result::Result<T, CacheError>;
