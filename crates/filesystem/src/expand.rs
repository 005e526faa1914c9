//! Input path expansion.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::FileSystemError;
use crate::glob::GlobFilter;
use crate::paths::to_absolute;

/// Result of expanding declared input paths to individual files.
#[derive(Debug, Clone, Default)]
pub struct ExpandedInputPaths {
    /// All discovered file paths, absolute.
    pub files: Vec<PathBuf>,
    /// Directories that were walked.
    pub expanded_directories: Vec<PathBuf>,
    /// Declared paths that do not exist (only when `allow_missing` is set).
    pub missing: Vec<PathBuf>,
    /// Total size of all discovered files in bytes.
    pub total_size: u64,
}

/// Expand declared input paths (files or directories) to individual files.
///
/// Directories are walked recursively; symlinks are not followed. Files are
/// kept as-is after normalization.
///
/// # Arguments
/// * `input_paths` - Mix of file and directory paths
/// * `filter` - Optional glob filter applied to paths relative to each
///   walked directory
/// * `allow_missing` - Collect nonexistent paths instead of failing
///
/// # Errors
/// `FileSystemError::PathNotFound` when a declared path is missing and
/// `allow_missing` is false.
pub fn expand_input_paths(
    input_paths: &[PathBuf],
    filter: Option<&GlobFilter>,
    allow_missing: bool,
) -> Result<ExpandedInputPaths, FileSystemError> {
    let mut result: ExpandedInputPaths = ExpandedInputPaths::default();

    for path in input_paths {
        let abs_path: PathBuf = to_absolute(path)?;

        if !abs_path.exists() {
            if allow_missing {
                result.missing.push(abs_path);
                continue;
            }
            return Err(FileSystemError::PathNotFound {
                path: abs_path.display().to_string(),
            });
        }

        if abs_path.is_dir() {
            let (files, size): (Vec<PathBuf>, u64) = walk_directory(&abs_path, filter)?;
            result.total_size += size;
            result.files.extend(files);
            result.expanded_directories.push(abs_path);
        } else {
            result.total_size += abs_path.metadata().map(|m| m.len()).unwrap_or(0);
            result.files.push(abs_path);
        }
    }

    Ok(result)
}

/// Walk a directory collecting all files that pass the filter.
fn walk_directory(
    dir: &Path,
    filter: Option<&GlobFilter>,
) -> Result<(Vec<PathBuf>, u64), FileSystemError> {
    let mut files: Vec<PathBuf> = Vec::new();
    let mut total_size: u64 = 0;

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry: walkdir::DirEntry = entry.map_err(|e| FileSystemError::IoError {
            path: e
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            source: e.into(),
        })?;

        if entry.path().is_dir() {
            continue;
        }

        if let Some(f) = filter {
            let relative: String = entry
                .path()
                .strip_prefix(dir)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            if !f.matches(&relative) {
                continue;
            }
        }

        total_size += entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(entry.path().to_path_buf());
    }

    Ok((files, total_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_tree(dir: &Path) {
        let mut f1 = std::fs::File::create(dir.join("scene.blend")).unwrap();
        f1.write_all(b"scene").unwrap();

        let mut f2 = std::fs::File::create(dir.join("notes.txt")).unwrap();
        f2.write_all(b"notes file").unwrap();

        std::fs::create_dir(dir.join("textures")).unwrap();
        let mut f3 = std::fs::File::create(dir.join("textures/wood.png")).unwrap();
        f3.write_all(b"png bytes here").unwrap();

        let mut f4 = std::fs::File::create(dir.join("textures/scratch.tmp")).unwrap();
        f4.write_all(b"tmp").unwrap();
    }

    #[test]
    fn test_expand_single_file() {
        let dir: TempDir = TempDir::new().unwrap();
        let file_path: PathBuf = dir.path().join("scene.blend");
        std::fs::write(&file_path, b"scene").unwrap();

        let result: ExpandedInputPaths =
            expand_input_paths(&[file_path.clone()], None, false).unwrap();

        assert_eq!(result.files.len(), 1);
        assert_eq!(result.total_size, 5);
        assert!(result.expanded_directories.is_empty());
        assert!(result.missing.is_empty());
    }

    #[test]
    fn test_expand_directory_recursively() {
        let dir: TempDir = TempDir::new().unwrap();
        create_test_tree(dir.path());

        let result: ExpandedInputPaths =
            expand_input_paths(&[dir.path().to_path_buf()], None, false).unwrap();

        assert_eq!(result.files.len(), 4);
        assert_eq!(result.expanded_directories.len(), 1);
    }

    #[test]
    fn test_expand_with_exclude_filter() {
        let dir: TempDir = TempDir::new().unwrap();
        create_test_tree(dir.path());

        let filter: GlobFilter = GlobFilter::exclude(vec!["**/*.tmp".to_string()]).unwrap();
        let result: ExpandedInputPaths =
            expand_input_paths(&[dir.path().to_path_buf()], Some(&filter), false).unwrap();

        assert_eq!(result.files.len(), 3);
    }

    #[test]
    fn test_expand_missing_path_fails() {
        let result = expand_input_paths(&[PathBuf::from("/nonexistent/input")], None, false);
        assert!(matches!(result, Err(FileSystemError::PathNotFound { .. })));
    }

    #[test]
    fn test_expand_missing_path_collected_when_allowed() {
        let result: ExpandedInputPaths =
            expand_input_paths(&[PathBuf::from("/nonexistent/input")], None, true).unwrap();
        assert!(result.files.is_empty());
        assert_eq!(result.missing.len(), 1);
    }
}
