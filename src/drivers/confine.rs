//! Path confinement for custom install scripts and restore sources.
use std::path::{Component, Path, PathBuf};

use crate::error::SecurityError;

/// Resolve `.` and `..` lexically, without touching the filesystem.
///
/// Returns `None` when `..` would climb above the path's root.
pub(crate) fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// Canonicalize when possible so symlinks cannot smuggle a path outside.
fn resolve(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Validate that `path` resolves strictly beneath `root`.
///
/// Relative paths are joined onto `root`. The check runs lexically first,
/// then again on canonical paths when the file exists. The root itself is
/// never accepted.
///
/// # Errors
///
/// Returns [`SecurityError::EmptyPath`] for a blank path and
/// [`SecurityError::EscapesRoot`] for anything outside `root`.
pub fn confine(root: &Path, path: &str) -> Result<PathBuf, SecurityError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(SecurityError::EmptyPath);
    }
    let escapes = || SecurityError::EscapesRoot {
        path: path.to_string(),
        root: root.to_path_buf(),
    };

    let root_abs = resolve(root);
    let raw = Path::new(trimmed);
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        root_abs.join(raw)
    };
    let candidate = normalize(&joined).ok_or_else(escapes)?;
    let root_norm = normalize(&root_abs).ok_or_else(escapes)?;

    if candidate == root_norm || !candidate.starts_with(&root_norm) {
        return Err(escapes());
    }

    if candidate.exists() {
        let real = resolve(&candidate);
        if real == root_abs || !real.starts_with(&root_abs) {
            return Err(escapes());
        }
        return Ok(real);
    }
    Ok(candidate)
}
