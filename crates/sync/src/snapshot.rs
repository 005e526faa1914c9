//! Directory snapshot and diff engine.
//!
//! `snapshot` produces a full manifest the first time a root is captured
//! and a diff manifest (changed entries only) on later captures.
//! `fast_diff` classifies live files against a reference manifest from
//! stats alone, trading a small false-positive rate (an mtime touch without
//! a content change reads as modified) for never reading file contents;
//! `rehash_diff` pays the reads and is exact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use farmsync_filesystem::{expand_input_paths, FileSystemError, GlobFilter};
use farmsync_model::{
    compare_manifests, AssetManifest, FileStatus, Manifest, ManifestPath,
};
use farmsync_storage::{HashCache, ProgressCallback, ProgressStatus, ProgressTracker};

use crate::error::SyncError;
use crate::hashing::build_manifest_entries;

/// Capture a root directory as a manifest.
///
/// With no prior manifest, returns the full manifest of every file passing
/// the filter (or `None` for an empty capture). With a prior manifest,
/// returns a manifest containing only the NEW and MODIFIED entries, or
/// `None` when nothing changed.
pub async fn snapshot(
    root: &Path,
    filter: &GlobFilter,
    prior_manifest: Option<&Manifest>,
    hash_cache: &HashCache,
    callback: Option<&dyn ProgressCallback>,
) -> Result<Option<Manifest>, SyncError> {
    if !root.is_dir() {
        return Err(FileSystemError::PathNotFound {
            path: root.display().to_string(),
        }
        .into());
    }

    let expanded = expand_input_paths(&[root.to_path_buf()], Some(filter), false)?;
    if expanded.files.is_empty() && prior_manifest.is_none() {
        return Ok(None);
    }

    let tracker: ProgressTracker =
        ProgressTracker::new(ProgressStatus::PreparingInProgress, callback);
    tracker.set_totals(expanded.files.len() as u64, expanded.total_size);

    let entries: Vec<ManifestPath> =
        build_manifest_entries(&expanded.files, root, hash_cache, &tracker).await?;
    let current: Manifest = Manifest::V2023_03_03(AssetManifest::new(entries));

    match prior_manifest {
        None => Ok(Some(current)),
        Some(reference) => {
            let changed: Vec<ManifestPath> = compare_manifests(reference, &current)
                .into_iter()
                .filter(|(status, _)| {
                    matches!(status, FileStatus::New | FileStatus::Modified)
                })
                .map(|(_, entry)| entry)
                .collect();
            if changed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(Manifest::V2023_03_03(AssetManifest::new(changed))))
            }
        }
    }
}

/// Classify live files against a reference manifest from stats alone.
///
/// A file absent from the reference is NEW. A file present with a different
/// size, or the same size but a different mtime (microsecond granularity),
/// is MODIFIED. Reference entries with no live file are DELETED. No file
/// content is read.
pub fn fast_diff(
    root: &Path,
    live_files: &[PathBuf],
    reference: &Manifest,
) -> Result<Vec<(FileStatus, String)>, SyncError> {
    let reference_by_path: HashMap<&str, &ManifestPath> =
        reference.paths().map(|p| (p.path.as_str(), p)).collect();

    let mut results: Vec<(FileStatus, String)> = Vec::new();
    let mut live_relative: std::collections::HashSet<String> = std::collections::HashSet::new();

    for file in live_files {
        let relative: String = file
            .strip_prefix(root)
            .map_err(|_| FileSystemError::PathOutsideRoot {
                path: file.display().to_string(),
                root: root.display().to_string(),
            })?
            .to_string_lossy()
            .replace('\\', "/");

        let metadata: std::fs::Metadata = file
            .metadata()
            .map_err(|e| FileSystemError::io_error(file.display().to_string(), e))?;
        let size: u64 = metadata.len();
        let mtime_us: i64 = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);

        let status: FileStatus = match reference_by_path.get(relative.as_str()) {
            None => FileStatus::New,
            Some(entry) if entry.size != size => FileStatus::Modified,
            Some(entry) if entry.mtime != mtime_us => FileStatus::Modified,
            Some(_) => FileStatus::Unchanged,
        };
        live_relative.insert(relative.clone());
        results.push((status, relative));
    }

    for path in reference_by_path.keys() {
        if !live_relative.contains(*path) {
            results.push((FileStatus::Deleted, (*path).to_string()));
        }
    }

    Ok(results)
}

/// Exact diff of a root against a reference manifest: every file is
/// (re)hashed through the hash cache and compared structurally.
pub async fn rehash_diff(
    root: &Path,
    filter: &GlobFilter,
    reference: &Manifest,
    hash_cache: &HashCache,
    callback: Option<&dyn ProgressCallback>,
) -> Result<Vec<(FileStatus, ManifestPath)>, SyncError> {
    let expanded = expand_input_paths(&[root.to_path_buf()], Some(filter), false)?;

    let tracker: ProgressTracker =
        ProgressTracker::new(ProgressStatus::PreparingInProgress, callback);
    tracker.set_totals(expanded.files.len() as u64, expanded.total_size);

    let entries: Vec<ManifestPath> =
        build_manifest_entries(&expanded.files, root, hash_cache, &tracker).await?;
    let current: Manifest = Manifest::V2023_03_03(AssetManifest::new(entries));

    Ok(compare_manifests(reference, &current))
}
