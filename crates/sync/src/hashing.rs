//! Parallel file hashing against the local hash cache.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use futures::{future, StreamExt};

use farmsync_model::{hash_file, HashAlgorithm, ManifestPath};
use farmsync_storage::{HashCache, HashCacheEntry, ProgressTracker};

use crate::error::SyncError;

/// Worker pool size for hashing. Hashing is CPU-bound, so the pool tracks
/// the host's parallelism rather than the connection-pool ceiling.
fn hashing_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Hash `input_files` (relative to `root_path`) into manifest entries,
/// consulting the hash cache first.
///
/// A cache entry is trusted only while the file's current mtime (in
/// microseconds) equals the recorded one; hits skip the file read entirely.
/// Hashing runs on a bounded blocking pool; the tracker's callback fires
/// after each file and can cancel the operation.
///
/// # Errors
/// `SyncError::Cancelled` carrying partial statistics on cancellation.
pub(crate) async fn build_manifest_entries(
    input_files: &[PathBuf],
    root_path: &Path,
    hash_cache: &HashCache,
    tracker: &ProgressTracker<'_>,
) -> Result<Vec<ManifestPath>, SyncError> {
    let mut work = futures::stream::iter(input_files.iter())
        .take_while(|_| future::ready(tracker.continue_reporting()))
        .map(|path| process_input_file(path, root_path, hash_cache))
        .buffer_unordered(hashing_worker_count());

    let mut entries: Vec<ManifestPath> = Vec::with_capacity(input_files.len());
    while let Some(result) = work.next().await {
        let (was_hashed, entry): (bool, ManifestPath) = result?;
        if was_hashed {
            tracker.increase_processed(1, entry.size);
        } else {
            tracker.increase_skipped(1, entry.size);
        }
        entries.push(entry);
        tracker.report_progress();
    }
    drop(work);

    if !tracker.continue_reporting() {
        return Err(SyncError::Cancelled {
            statistics: tracker.summary_statistics(),
        });
    }
    Ok(entries)
}

/// Hash one file, or reuse its cached digest when the mtime still matches.
async fn process_input_file(
    path: &PathBuf,
    root_path: &Path,
    hash_cache: &HashCache,
) -> Result<(bool, ManifestPath), SyncError> {
    let algorithm: HashAlgorithm = HashAlgorithm::Xxh128;
    let metadata: std::fs::Metadata = path
        .metadata()
        .map_err(|e| farmsync_filesystem::FileSystemError::io_error(path.display().to_string(), e))?;
    let size: u64 = metadata.len();
    let mtime_us: i64 = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0);

    let cache_key: String = path.display().to_string();
    let cached: Option<HashCacheEntry> = hash_cache.entry(&cache_key, algorithm);

    let (file_hash, was_hashed): (String, bool) = match cached {
        Some(entry) if entry.last_modified_time_us == mtime_us => (entry.file_hash, false),
        _ => {
            let to_hash: PathBuf = path.clone();
            let digest: String = tokio::task::spawn_blocking(move || hash_file(&to_hash, algorithm))
                .await
                .map_err(|e| SyncError::TaskFailed(e.to_string()))??;
            hash_cache.put_entry(&HashCacheEntry {
                file_path: cache_key,
                hash_algorithm: algorithm,
                file_hash: digest.clone(),
                last_modified_time_us: mtime_us,
            });
            (digest, true)
        }
    };

    let relative: String = path
        .strip_prefix(root_path)
        .map_err(|_| farmsync_filesystem::FileSystemError::PathOutsideRoot {
            path: path.display().to_string(),
            root: root_path.display().to_string(),
        })?
        .to_string_lossy()
        .replace('\\', "/");

    Ok((was_hashed, ManifestPath::new(relative, file_hash, size, mtime_us)))
}
