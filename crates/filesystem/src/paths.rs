//! Path normalization and containment helpers.

use std::path::{Component, Path, PathBuf};

use crate::error::FileSystemError;

/// Make a path absolute and lexically normalized without resolving symlinks.
///
/// Relative paths are joined onto the current working directory; `.` and
/// `..` components are collapsed lexically. Symlinks are deliberately not
/// resolved so that the path a user declared is the path recorded in
/// manifests and mapping rules.
pub fn to_absolute(path: &Path) -> Result<PathBuf, FileSystemError> {
    let joined: PathBuf = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd: PathBuf = std::env::current_dir()
            .map_err(|source| FileSystemError::io_error(path.display().to_string(), source))?;
        cwd.join(path)
    };

    let mut normalized: PathBuf = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Whether `path` is lexically inside (or equal to) `root`.
pub fn is_relative_to(path: &Path, root: &Path) -> bool {
    path.strip_prefix(root).is_ok()
}

/// Validate that every relative path stays inside `root` once joined.
///
/// Used before writing downloaded files so a manifest cannot traverse out of
/// its destination root with `..` segments.
///
/// # Errors
/// `FileSystemError::PathOutsideRoot` for the first escaping path.
pub fn ensure_paths_within_directory(
    root: &Path,
    relative_paths: &[&str],
) -> Result<(), FileSystemError> {
    for relative in relative_paths {
        let resolved: PathBuf = to_absolute(&root.join(relative))?;
        if !is_relative_to(&resolved, root) {
            return Err(FileSystemError::PathOutsideRoot {
                path: (*relative).to_string(),
                root: root.display().to_string(),
            });
        }
    }
    Ok(())
}
