//! Parallel download of manifest contents into destination roots.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use futures::{future, StreamExt};
use tracing::debug;

use farmsync_model::{HashAlgorithm, Manifest, ManifestPath};

use crate::error::StorageError;
use crate::location::S3Location;
use crate::progress::{
    DownloadSummaryStatistics, ProgressCallback, ProgressStatus, ProgressTracker,
};
use crate::retry::with_retries;
use crate::settings::StorageSettings;
use crate::traits::StorageClient;

/// What to do when a destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictResolution {
    /// Leave the existing file, skip the entry.
    Skip,
    /// Replace the existing file.
    Overwrite,
    /// Keep the existing file and write the download beside it with a
    /// ` (1)` name suffix.
    #[default]
    CreateCopy,
}

/// Per-hash-group accounting from one unit of download work.
#[derive(Debug, Default)]
struct GroupOutcome {
    downloaded_files: u64,
    downloaded_bytes: u64,
    copied_files: u64,
    copied_bytes: u64,
    skipped_files: u64,
    skipped_bytes: u64,
    materialized: u64,
}

/// Download every file the given manifests name, recreating relative paths
/// under each destination root.
///
/// Entries are grouped by content hash per root: each distinct hash is
/// fetched from the store exactly once and further paths sharing it are
/// local copies, so a hash shared by many manifest entries costs one GET.
/// Downloads run on a bounded worker pool with the usual cancellation
/// contract, and each file's mtime is restored from its manifest entry.
///
/// # Errors
/// `StorageError::Cancelled` (with partial statistics) when the callback
/// returns false; the first failing unit's error otherwise.
pub async fn download_files_from_manifests<C: StorageClient>(
    client: &C,
    location: &S3Location,
    manifests_by_root: &HashMap<String, Manifest>,
    settings: &StorageSettings,
    conflict_resolution: ConflictResolution,
    callback: Option<&dyn ProgressCallback>,
) -> Result<DownloadSummaryStatistics, StorageError> {
    let tracker: ProgressTracker = ProgressTracker::new(ProgressStatus::DownloadInProgress, callback);
    let total_files: u64 = manifests_by_root
        .values()
        .map(|m| m.file_count() as u64)
        .sum();
    let total_bytes: u64 = manifests_by_root.values().map(|m| m.total_size()).sum();
    tracker.set_totals(total_files, total_bytes);

    let mut file_counts: HashMap<String, u64> = HashMap::new();

    for (root, manifest) in manifests_by_root {
        let root_path: &Path = Path::new(root);
        let hash_alg: HashAlgorithm = manifest.hash_alg();
        let groups: Vec<Vec<&ManifestPath>> = group_entries_by_hash(manifest);

        let mut downloads = futures::stream::iter(groups.iter())
            .take_while(|_| future::ready(tracker.continue_reporting()))
            .map(|entries| {
                download_hash_group(
                    client,
                    location,
                    settings,
                    root_path,
                    hash_alg,
                    entries,
                    conflict_resolution,
                )
            })
            .buffer_unordered(settings.worker_count());

        while let Some(result) = downloads.next().await {
            let outcome: GroupOutcome = result?;
            tracker.increase_processed(
                outcome.downloaded_files + outcome.copied_files,
                outcome.downloaded_bytes,
            );
            tracker.increase_skipped(
                outcome.skipped_files,
                outcome.skipped_bytes + outcome.copied_bytes,
            );
            *file_counts.entry(root.clone()).or_insert(0) += outcome.materialized;
            tracker.report_progress();
        }
        drop(downloads);

        if !tracker.continue_reporting() {
            return Err(StorageError::Cancelled {
                statistics: tracker.summary_statistics(),
            });
        }
    }

    Ok(DownloadSummaryStatistics {
        summary: tracker.summary_statistics(),
        file_counts_by_root_directory: file_counts,
    })
}

/// Group a manifest's entries by content hash, preserving first-seen order.
fn group_entries_by_hash(manifest: &Manifest) -> Vec<Vec<&ManifestPath>> {
    let mut index_by_hash: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Vec<&ManifestPath>> = Vec::new();
    for entry in manifest.paths() {
        match index_by_hash.get(entry.hash.as_str()) {
            Some(&index) => groups[index].push(entry),
            None => {
                index_by_hash.insert(&entry.hash, groups.len());
                groups.push(vec![entry]);
            }
        }
    }
    groups
}

/// Materialize every path of one distinct content hash: the first path is
/// downloaded, the rest are copies of it.
async fn download_hash_group<C: StorageClient>(
    client: &C,
    location: &S3Location,
    settings: &StorageSettings,
    root: &Path,
    hash_alg: HashAlgorithm,
    entries: &[&ManifestPath],
    conflict_resolution: ConflictResolution,
) -> Result<GroupOutcome, StorageError> {
    let mut outcome: GroupOutcome = GroupOutcome::default();
    let mut source_path: Option<PathBuf> = None;
    let key: String = location.cas_object_key(&entries[0].hash, hash_alg);

    for entry in entries {
        let destination: PathBuf = root.join(&entry.path);
        let Some(destination) = resolve_conflict(destination, conflict_resolution) else {
            outcome.skipped_files += 1;
            outcome.skipped_bytes += entry.size;
            continue;
        };

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::io_error(parent.display().to_string(), e))?;
        }

        match &source_path {
            Some(source) => {
                std::fs::copy(source, &destination)
                    .map_err(|e| StorageError::io_error(destination.display().to_string(), e))?;
                outcome.copied_files += 1;
                outcome.copied_bytes += entry.size;
            }
            None => {
                with_retries(&settings.retry, "downloading file", || async {
                    client
                        .get_object_to_file(&location.bucket, &key, &destination)
                        .await
                })
                .await?;
                debug!(key = %key, path = %destination.display(), "downloaded object");
                outcome.downloaded_files += 1;
                outcome.downloaded_bytes += entry.size;
                source_path = Some(destination.clone());
            }
        }

        set_manifest_mtime(&destination, entry.mtime)?;
        outcome.materialized += 1;
    }

    Ok(outcome)
}

/// Apply conflict resolution for an existing destination file. `None` means
/// skip the entry.
fn resolve_conflict(destination: PathBuf, resolution: ConflictResolution) -> Option<PathBuf> {
    if !destination.is_file() {
        return Some(destination);
    }
    match resolution {
        ConflictResolution::Skip => None,
        ConflictResolution::Overwrite => Some(destination),
        ConflictResolution::CreateCopy => {
            let mut candidate: PathBuf = destination;
            while candidate.is_file() {
                let stem: String = candidate
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let renamed: String = match candidate.extension() {
                    Some(ext) => format!("{} (1).{}", stem, ext.to_string_lossy()),
                    None => format!("{stem} (1)"),
                };
                candidate = candidate.with_file_name(renamed);
            }
            Some(candidate)
        }
    }
}

/// Restore a file's mtime from its manifest entry (microseconds).
fn set_manifest_mtime(path: &Path, mtime_us: i64) -> Result<(), StorageError> {
    let seconds: i64 = mtime_us.div_euclid(1_000_000);
    let nanos: u32 = (mtime_us.rem_euclid(1_000_000) as u32) * 1_000;
    filetime::set_file_mtime(path, FileTime::from_unix_time(seconds, nanos))
        .map_err(|e| StorageError::io_error(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorageClient;
    use crate::progress::ProgressReportMetadata;
    use farmsync_model::{hash_data, AssetManifest};
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    fn location() -> S3Location {
        S3Location::new("assets", "farm/ja").unwrap()
    }

    /// Seed the store with content and return a manifest naming it at the
    /// given relative paths.
    fn seeded_manifest(client: &MemoryStorageClient, files: &[(&str, &[u8])]) -> Manifest {
        let loc: S3Location = location();
        let mut entries: Vec<ManifestPath> = Vec::new();
        for (relative, content) in files {
            let hash: String = hash_data(content, HashAlgorithm::Xxh128);
            client.seed(
                "assets",
                &loc.cas_object_key(&hash, HashAlgorithm::Xxh128),
                content.to_vec(),
            );
            entries.push(ManifestPath::new(
                relative.to_string(),
                hash,
                content.len() as u64,
                1_720_199_667_787_520,
            ));
        }
        Manifest::V2023_03_03(AssetManifest::new(entries))
    }

    #[tokio::test]
    async fn test_downloads_files_under_root() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let manifest: Manifest =
            seeded_manifest(&client, &[("a.txt", b"alpha"), ("nested/b.txt", b"beta")]);
        let dest: TempDir = TempDir::new().unwrap();
        let manifests: HashMap<String, Manifest> =
            HashMap::from([(dest.path().display().to_string(), manifest)]);

        let stats: DownloadSummaryStatistics = download_files_from_manifests(
            &client,
            &location(),
            &manifests,
            &StorageSettings::default(),
            ConflictResolution::CreateCopy,
            None,
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(dest.path().join("a.txt")).unwrap(), b"alpha");
        assert_eq!(
            std::fs::read(dest.path().join("nested/b.txt")).unwrap(),
            b"beta"
        );
        assert_eq!(stats.summary.processed_files, 2);
        assert_eq!(
            stats.file_counts_by_root_directory[&dest.path().display().to_string()],
            2
        );
    }

    #[tokio::test]
    async fn test_restores_manifest_mtime() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let manifest: Manifest = seeded_manifest(&client, &[("a.txt", b"alpha")]);
        let dest: TempDir = TempDir::new().unwrap();
        let manifests: HashMap<String, Manifest> =
            HashMap::from([(dest.path().display().to_string(), manifest)]);

        download_files_from_manifests(
            &client,
            &location(),
            &manifests,
            &StorageSettings::default(),
            ConflictResolution::CreateCopy,
            None,
        )
        .await
        .unwrap();

        let metadata = std::fs::metadata(dest.path().join("a.txt")).unwrap();
        let mtime: FileTime = FileTime::from_last_modification_time(&metadata);
        assert_eq!(mtime.unix_seconds(), 1_720_199_667);
        assert_eq!(mtime.nanoseconds(), 787_520_000);
    }

    // A hash referenced by several paths is fetched from the store once.
    #[tokio::test]
    async fn test_distinct_hash_downloaded_once() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let manifest: Manifest = seeded_manifest(
            &client,
            &[
                ("copy1.bin", b"same bytes"),
                ("copy2.bin", b"same bytes"),
                ("copy3.bin", b"same bytes"),
            ],
        );
        let dest: TempDir = TempDir::new().unwrap();
        let manifests: HashMap<String, Manifest> =
            HashMap::from([(dest.path().display().to_string(), manifest)]);

        let stats: DownloadSummaryStatistics = download_files_from_manifests(
            &client,
            &location(),
            &manifests,
            &StorageSettings::default(),
            ConflictResolution::CreateCopy,
            None,
        )
        .await
        .unwrap();

        assert_eq!(client.get_count(), 1);
        for name in ["copy1.bin", "copy2.bin", "copy3.bin"] {
            assert_eq!(std::fs::read(dest.path().join(name)).unwrap(), b"same bytes");
        }
        assert_eq!(stats.summary.processed_files, 3);
    }

    #[tokio::test]
    async fn test_conflict_skip_keeps_existing_file() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let manifest: Manifest = seeded_manifest(&client, &[("a.txt", b"fresh")]);
        let dest: TempDir = TempDir::new().unwrap();
        std::fs::write(dest.path().join("a.txt"), b"existing").unwrap();
        let manifests: HashMap<String, Manifest> =
            HashMap::from([(dest.path().display().to_string(), manifest)]);

        let stats: DownloadSummaryStatistics = download_files_from_manifests(
            &client,
            &location(),
            &manifests,
            &StorageSettings::default(),
            ConflictResolution::Skip,
            None,
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(dest.path().join("a.txt")).unwrap(), b"existing");
        assert_eq!(stats.summary.skipped_files, 1);
        assert_eq!(stats.summary.processed_files, 0);
    }

    #[tokio::test]
    async fn test_conflict_create_copy_renames() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let manifest: Manifest = seeded_manifest(&client, &[("a.txt", b"fresh")]);
        let dest: TempDir = TempDir::new().unwrap();
        std::fs::write(dest.path().join("a.txt"), b"existing").unwrap();
        let manifests: HashMap<String, Manifest> =
            HashMap::from([(dest.path().display().to_string(), manifest)]);

        download_files_from_manifests(
            &client,
            &location(),
            &manifests,
            &StorageSettings::default(),
            ConflictResolution::CreateCopy,
            None,
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(dest.path().join("a.txt")).unwrap(), b"existing");
        assert_eq!(std::fs::read(dest.path().join("a (1).txt")).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_cancellation_carries_partial_statistics() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let files: Vec<(String, Vec<u8>)> = (0..6)
            .map(|i| (format!("f{i}.bin"), format!("unique-{i}").into_bytes()))
            .collect();
        let borrowed: Vec<(&str, &[u8])> = files
            .iter()
            .map(|(name, content)| (name.as_str(), content.as_slice()))
            .collect();
        let manifest: Manifest = seeded_manifest(&client, &borrowed);
        let dest: TempDir = TempDir::new().unwrap();
        let manifests: HashMap<String, Manifest> =
            HashMap::from([(dest.path().display().to_string(), manifest)]);

        let settings: StorageSettings = StorageSettings {
            max_pool_connections: 10, // one worker
            ..Default::default()
        };
        let pool_size: u64 = settings.worker_count() as u64;

        let reports: AtomicU64 = AtomicU64::new(0);
        let callback = |_metadata: &ProgressReportMetadata| -> bool {
            reports.fetch_add(1, Ordering::SeqCst) == 0
        };

        let result = download_files_from_manifests(
            &client,
            &location(),
            &manifests,
            &settings,
            ConflictResolution::CreateCopy,
            Some(&callback),
        )
        .await;

        match result {
            Err(StorageError::Cancelled { statistics }) => {
                let completed: u64 = statistics.processed_files + statistics.skipped_files;
                assert!(completed <= 2 + pool_size);
                assert!(completed < 6);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }
}
