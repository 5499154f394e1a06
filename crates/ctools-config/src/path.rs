//! Path helpers for user-supplied locations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Expand a leading `~` to the home directory. Other paths are returned as is.
pub fn expand_tilde(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Normalize path, falling back to the original if canonicalization fails.
///
/// This is useful when the path might not exist and that's acceptable.
pub fn normalize_or_original(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Express `path` relative to `root`.
///
/// Relative inputs are returned unchanged. Absolute inputs must resolve
/// inside `root`.
pub fn relative_to(path: impl AsRef<Path>, root: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.is_relative() {
        return Ok(path.to_path_buf());
    }
    let root = normalize_or_original(root);
    let absolute = normalize_or_original(path);
    absolute
        .strip_prefix(&root)
        .map(Path::to_path_buf)
        .with_context(|| format!("{} is not inside {}", path.display(), root.display()))
}
