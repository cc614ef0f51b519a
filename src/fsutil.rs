//! File-system helpers shared by restore, capture, and the state store.
use std::io::Write as _;
use std::path::Path;

use anyhow::{Context as _, Result};
use walkdir::WalkDir;

/// Ensure the parent directory of `path` exists, creating it (and any
/// ancestors) if necessary.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create parent: {}", parent.display()))?;
    }
    Ok(())
}

/// Remove whatever lives at `path`: file, symlink, or directory tree.
///
/// Does nothing if `path` does not exist.
///
/// # Errors
///
/// Returns an error if the path exists but cannot be removed.
pub fn remove_existing(path: &Path) -> Result<()> {
    let Ok(meta) = path.symlink_metadata() else {
        return Ok(());
    };
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
    .with_context(|| format!("remove existing: {}", path.display()))
}

/// Recursively copy `src` into `dst`, skipping any relative path for which
/// `exclude` returns `true`.
///
/// Symlinks inside the tree are followed, so their content is copied rather
/// than the link. Returns the number of files copied.
///
/// # Errors
///
/// Returns an error if a directory cannot be created, an entry cannot be
/// read, or a file cannot be copied.
pub fn copy_tree(src: &Path, dst: &Path, exclude: impl Fn(&Path) -> bool) -> Result<usize> {
    std::fs::create_dir_all(dst).with_context(|| format!("creating directory {}", dst.display()))?;
    let mut copied = 0;
    let mut walker = WalkDir::new(src).follow_links(true).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.with_context(|| format!("reading entry in {}", src.display()))?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        if exclude(rel) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("creating directory {}", target.display()))?;
        } else {
            ensure_parent_dir(&target)?;
            std::fs::copy(entry.path(), &target).with_context(|| {
                format!("copying {} to {}", entry.path().display(), target.display())
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Copy a file or directory from `src` to `dst`.
///
/// # Errors
///
/// Returns an error if anything cannot be read or written.
pub fn copy_any(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        copy_tree(src, dst, |_| false).map(|_| ())
    } else {
        ensure_parent_dir(dst)?;
        std::fs::copy(src, dst)
            .with_context(|| format!("copying {} to {}", src.display(), dst.display()))
            .map(|_| ())
    }
}

/// Whether `a` and `b` hold the same content.
///
/// Files compare byte-for-byte; directories compare as trees (same set of
/// relative file paths, each identical). A file never equals a directory.
#[must_use]
pub fn same_content(a: &Path, b: &Path) -> bool {
    match (a.is_dir(), b.is_dir()) {
        (false, false) => match (std::fs::read(a), std::fs::read(b)) {
            (Ok(x), Ok(y)) => x == y,
            _ => false,
        },
        (true, true) => {
            let files = |root: &Path| -> Option<Vec<std::path::PathBuf>> {
                let mut out = Vec::new();
                for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
                    let entry = entry.ok()?;
                    if entry.file_type().is_file() {
                        out.push(entry.path().strip_prefix(root).ok()?.to_path_buf());
                    }
                }
                Some(out)
            };
            match (files(a), files(b)) {
                (Some(left), Some(right)) => {
                    left == right && left.iter().all(|rel| same_content(&a.join(rel), &b.join(rel)))
                }
                _ => false,
            }
        }
        _ => false,
    }
}

/// Write `contents` to `path` atomically: write a `.tmp` sibling, fsync it,
/// then rename over the destination.
///
/// # Errors
///
/// Returns an error if the temp file cannot be written or renamed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let result = write_synced(&tmp, contents).and_then(|()| std::fs::rename(&tmp, path));
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn copies_files_and_subdirectories() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();

        std::fs::write(src.path().join("a.txt"), b"aaa").unwrap();
        std::fs::create_dir(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/b.txt"), b"bbb").unwrap();

        let target = dst.path().join("out");
        assert_eq!(copy_tree(src.path(), &target, |_| false).unwrap(), 2);

        assert_eq!(std::fs::read(target.join("a.txt")).unwrap(), b"aaa");
        assert_eq!(std::fs::read(target.join("sub/b.txt")).unwrap(), b"bbb");
        assert!(same_content(src.path(), &target));
    }

    #[test]
    fn excluded_paths_are_not_copied() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();

        std::fs::write(src.path().join("settings.json"), b"{}").unwrap();
        std::fs::create_dir(src.path().join("cache")).unwrap();
        std::fs::write(src.path().join("cache/blob"), b"x").unwrap();

        let target = dst.path().join("out");
        copy_tree(src.path(), &target, |rel| rel.starts_with("cache")).unwrap();

        assert!(target.join("settings.json").exists());
        assert!(!target.join("cache").exists());
    }

    #[test]
    fn same_content_detects_differences() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, "one").unwrap();
        std::fs::write(&b, "one").unwrap();
        assert!(same_content(&a, &b));
        std::fs::write(&b, "two").unwrap();
        assert!(!same_content(&a, &b));
        assert!(!same_content(&a, dir.path()));
    }

    #[test]
    fn remove_existing_handles_dirs_and_absent_paths() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("tree");
        std::fs::create_dir_all(nested.join("x")).unwrap();
        remove_existing(&nested).unwrap();
        assert!(!nested.exists());
        remove_existing(&dir.path().join("nonexistent")).unwrap();
    }

    #[test]
    fn ensure_parent_dir_creates_missing_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("file.txt");
        ensure_parent_dir(&nested).unwrap();
        assert!(dir.path().join("a").join("b").exists());
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!dir.path().join("state.json.tmp").exists());
    }
}
