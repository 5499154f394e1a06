//! Content verification of extracted packages against their archives.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

use ctools_cache::{hash_reader_hex, ArchiveMember, HashAlgorithm, MemberKind, PackageArchive, PackageRecord};
use ctools_config::{log_audit_debug, log_audit_info, log_audit_warn};
use tracing::instrument;

use crate::Result;

/// First difference found between an archive and its extracted copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    /// The archive has a member the extracted directory lacks
    Missing { path: PathBuf },
    /// Both exist but hash differently
    Content {
        path: PathBuf,
        archive: String,
        extracted: String,
    },
}

impl Mismatch {
    pub fn path(&self) -> &PathBuf {
        match self {
            Mismatch::Missing { path } | Mismatch::Content { path, .. } => path,
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Missing { path } => write!(f, "{}: missing from extracted package", path.display()),
            Mismatch::Content {
                path,
                archive,
                extracted,
            } => write!(f, "{}: archive {} != extracted {}", path.display(), archive, extracted),
        }
    }
}

/// Compare every archive member of `archive` with the same path under
/// `record`, stopping at the first difference.
///
/// Regular files are hashed block by block on both sides. Link members only
/// need to exist in the extracted copy, and directories are skipped.
#[instrument(skip(record, archive), fields(package = %record.dir_name()), level = "debug")]
pub fn verify_package(
    record: &PackageRecord,
    archive: &mut PackageArchive,
    algorithm: HashAlgorithm,
) -> Result<Option<Mismatch>> {
    let members: Vec<ArchiveMember> = archive
        .members()?
        .iter()
        .filter(|member| member.kind != MemberKind::Directory)
        .cloned()
        .collect();

    let mut mismatch = None;
    archive.read_members(&members, |member, content| {
        let extracted = record.path().join(&member.path);
        if !member.is_file() {
            if extracted.symlink_metadata().is_err() {
                mismatch = Some(Mismatch::Missing {
                    path: member.path.clone(),
                });
                return Ok(ControlFlow::Break(()));
            }
            return Ok(ControlFlow::Continue(()));
        }

        let file = match File::open(&extracted) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                mismatch = Some(Mismatch::Missing {
                    path: member.path.clone(),
                });
                return Ok(ControlFlow::Break(()));
            }
            Err(e) => return Err(e.into()),
        };
        let expected = hash_reader_hex(content, algorithm)?;
        let found = hash_reader_hex(&mut BufReader::new(file), algorithm)?;
        if expected != found {
            mismatch = Some(Mismatch::Content {
                path: member.path.clone(),
                archive: expected,
                extracted: found,
            });
            return Ok(ControlFlow::Break(()));
        }
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(mismatch)
}

/// Verify each record against the archive it was extracted from.
///
/// Records and archives are paired by name (directory name against archive
/// stem); a record with no archive is not checked. Returns `false` at the
/// first mismatch without looking at the remaining packages.
pub fn verify_hashes(
    records: &[Arc<PackageRecord>],
    archives: &mut [PackageArchive],
    algorithm: HashAlgorithm,
) -> Result<bool> {
    let by_stem: HashMap<String, usize> = archives
        .iter()
        .enumerate()
        .map(|(i, archive)| (archive.stem(), i))
        .collect();

    let mut checked = 0usize;
    for record in records {
        let Some(&index) = by_stem.get(&record.dir_name()) else {
            log_audit_debug!(package = %record.dir_name(), "no archive to verify against");
            continue;
        };
        if let Some(mismatch) = verify_package(record, &mut archives[index], algorithm)? {
            log_audit_warn!(package = %record.dir_name(), %mismatch, "hash mismatch");
            return Ok(false);
        }
        checked += 1;
    }
    log_audit_info!(packages = checked, algorithm = algorithm.name(), "verified package hashes");
    Ok(true)
}
