//! Extraction path checks.
//!
//! Every archive member passes through [`check_member`] before anything is
//! written. A member is accepted only when its resolved location is a strict
//! descendant of the destination directory. Link members are additionally
//! rejected when their target is absolute, names a reserved device, or
//! resolves outside the destination.
//!
//! Member paths and link targets are resolved against the links the archive
//! itself creates: [`check_members`] records every symbolic link member and
//! expands it wherever a later path or target walks through it. Link targets
//! are checked again once the whole batch is known, since a symlink is
//! followed when used, not when created. Links already present in the
//! destination are followed for the longest prefix that exists on disk.
//! Nothing here touches the filesystem beyond reading metadata.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::archive::{ArchiveMember, MemberKind};
use crate::{CacheError, Result};

/// Device names that cannot be used as path components on Windows.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Same limit as Linux `MAXSYMLINKS`.
const MAX_LINK_HOPS: usize = 40;

/// Compute the location `member` would be extracted to inside `destination`.
///
/// Fails with [`CacheError::PathEscape`] unless the result is a strict
/// descendant of `destination`.
pub fn resolve_and_check(member: impl AsRef<Path>, destination: impl AsRef<Path>) -> Result<PathBuf> {
    let destination = canonical_destination(destination.as_ref())?;
    let resolved = resolve(&destination, member.as_ref());
    if !is_strict_descendant(&resolved, &destination) {
        return Err(CacheError::PathEscape(resolved));
    }
    Ok(resolved)
}

/// Check a single archive member, including its link target for link members.
///
/// Symbolic link targets are resolved relative to the directory holding the
/// member. Hard link targets name another archive member and are resolved
/// relative to the archive root, matching how tar records them.
pub fn check_member(member: &ArchiveMember, destination: impl AsRef<Path>) -> Result<PathBuf> {
    let destination = canonical_destination(destination.as_ref())?;
    let links = LinkTable::default();
    let location = links.locate(member)?;
    let resolved = links.check_location(&location, &destination)?;
    links.check_target(member, &location, &destination)?;
    Ok(resolved)
}

/// Check every member up front. The first offending member fails the batch.
pub fn check_members<'a, I>(members: I, destination: impl AsRef<Path>) -> Result<Vec<PathBuf>>
where
    I: IntoIterator<Item = &'a ArchiveMember>,
{
    let destination = canonical_destination(destination.as_ref())?;
    let mut links = LinkTable::default();
    let mut resolved = Vec::new();
    let mut link_members = Vec::new();

    for member in members {
        let location = links.locate(member)?;
        resolved.push(links.check_location(&location, &destination)?);
        if member.is_link() {
            links.check_target(member, &location, &destination)?;
            if let (MemberKind::Symlink, Some(target)) = (member.kind, &member.link_target) {
                links.insert(location.clone(), target.clone());
            }
            link_members.push((member, location));
        }
    }

    // A symlink unpacked later can redirect a target checked above.
    for (member, location) in &link_members {
        links.check_target(member, location, &destination)?;
    }
    Ok(resolved)
}

/// Symbolic links created by the members seen so far, keyed by their
/// location relative to the destination.
#[derive(Debug, Default)]
struct LinkTable {
    links: HashMap<PathBuf, PathBuf>,
}

impl LinkTable {
    fn insert(&mut self, location: PathBuf, target: PathBuf) {
        self.links.insert(location, target);
    }

    /// Fold `path` component by component, replacing every known link with
    /// its target. `None` when the links form a cycle.
    fn expand(&self, path: &Path) -> Option<PathBuf> {
        let mut pending: Vec<Component<'_>> = path.components().rev().collect();
        let mut out = PathBuf::new();
        let mut hops = 0;
        while let Some(component) = pending.pop() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                        out.pop();
                    } else {
                        out.push("..");
                    }
                }
                Component::Normal(name) => {
                    out.push(name);
                    if let Some(target) = self.links.get(&out) {
                        hops += 1;
                        if hops > MAX_LINK_HOPS {
                            return None;
                        }
                        out.pop();
                        pending.extend(target.components().rev());
                    }
                }
                other => out.push(other.as_os_str()),
            }
        }
        Some(out)
    }

    /// Where `member` lands relative to the destination. Link members are
    /// created in place, so their final component is not followed.
    fn locate(&self, member: &ArchiveMember) -> Result<PathBuf> {
        let location = match (member.is_link(), member.path.file_name()) {
            (true, Some(name)) => self
                .expand(member.path.parent().unwrap_or(Path::new("")))
                .map(|parent| parent.join(name)),
            _ => self.expand(&member.path),
        };
        location.ok_or_else(|| CacheError::PathEscape(member.path.clone()))
    }

    fn check_location(&self, location: &Path, destination: &Path) -> Result<PathBuf> {
        let resolved = resolve(destination, location);
        if !is_strict_descendant(&resolved, destination) {
            return Err(CacheError::PathEscape(resolved));
        }
        Ok(resolved)
    }

    fn check_target(&self, member: &ArchiveMember, location: &Path, destination: &Path) -> Result<()> {
        if !member.is_link() {
            return Ok(());
        }
        let link = member
            .link_target
            .as_deref()
            .ok_or_else(|| CacheError::LinkEscape {
                link: member.path.clone(),
                reason: "link member without a target".to_string(),
            })?;

        if link.has_root() || link.is_absolute() || is_reserved(link) {
            return Err(CacheError::LinkEscape {
                link: link.to_path_buf(),
                reason: "absolute or reserved link target".to_string(),
            });
        }

        let base = match member.kind {
            MemberKind::Symlink => location.parent().unwrap_or(Path::new("")),
            _ => Path::new(""),
        };
        let expanded = self
            .expand(&base.join(link))
            .ok_or_else(|| CacheError::LinkEscape {
                link: member.path.clone(),
                reason: "too many levels of symbolic links".to_string(),
            })?;
        let target = resolve(destination, &expanded);
        if !is_strict_descendant(&target, destination) {
            return Err(CacheError::LinkEscape {
                link: target,
                reason: "link resolves outside destination directory".to_string(),
            });
        }
        Ok(())
    }
}

/// Fold `.` and `..` components without consulting the filesystem.
///
/// `..` never climbs above the root of an absolute path.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let dangling = matches!(out.components().next_back(), Some(Component::ParentDir));
                if dangling || (!out.pop() && !out.has_root()) {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Whether any component of `path` is a reserved device name.
pub fn is_reserved(path: &Path) -> bool {
    path.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            let stem = name.split('.').next().unwrap_or("");
            let stem = stem.split(':').next().unwrap_or("").trim_end();
            RESERVED_NAMES
                .iter()
                .any(|reserved| reserved.eq_ignore_ascii_case(stem))
        }
        _ => false,
    })
}

fn canonical_destination(destination: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(destination)?;
    Ok(resolve_existing(&normalize(&absolute)))
}

fn resolve(destination: &Path, relative: &Path) -> PathBuf {
    resolve_existing(&normalize(&destination.join(relative)))
}

/// Canonicalize the deepest ancestor that exists and re-attach the rest.
fn resolve_existing(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut resolved = canonical;
            for part in rest.iter().rev() {
                resolved.push(part);
            }
            return normalize(&resolved);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

fn is_strict_descendant(path: &Path, ancestor: &Path) -> bool {
    path != ancestor && path.starts_with(ancestor)
}
