//! Parallel upload of manifest contents into content-addressed storage.

use std::path::{Path, PathBuf};

use futures::{future, StreamExt};
use tracing::{debug, warn};

use farmsync_model::{HashAlgorithm, Manifest, ManifestPath};

use crate::error::StorageError;
use crate::location::S3Location;
use crate::manifest_storage::{upload_input_manifest, ManifestUploadResult};
use crate::progress::{ProgressCallback, ProgressStatus, ProgressTracker, SummaryStatistics};
use crate::retry::with_retries;
use crate::s3_check_cache::S3CheckCache;
use crate::settings::StorageSettings;
use crate::traits::StorageClient;

/// Uploads the files named by a manifest into the CAS prefix, skipping
/// objects already present.
///
/// Presence is decided by the local existence cache first and an
/// authoritative HEAD on a cache miss, so two jobs sharing most of their
/// inputs upload only the difference. Uploads run on a bounded worker pool;
/// the caller's progress callback can cancel between units of work.
pub struct UploadOrchestrator<'a, C: StorageClient> {
    client: &'a C,
    location: S3Location,
    settings: StorageSettings,
}

impl<'a, C: StorageClient> UploadOrchestrator<'a, C> {
    /// Create an orchestrator with default settings.
    pub fn new(client: &'a C, location: S3Location) -> Self {
        Self {
            client,
            location,
            settings: StorageSettings::default(),
        }
    }

    /// Override the transfer settings.
    pub fn with_settings(mut self, settings: StorageSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Upload every content object a manifest names, relative to
    /// `source_root`.
    ///
    /// # Errors
    /// `StorageError::Cancelled` (carrying partial statistics) when the
    /// progress callback returns false; the first failing unit's error
    /// otherwise.
    pub async fn upload_manifest_contents(
        &self,
        manifest: &Manifest,
        source_root: &Path,
        s3_check_cache: &S3CheckCache,
        callback: Option<&dyn ProgressCallback>,
    ) -> Result<SummaryStatistics, StorageError> {
        let tracker: ProgressTracker = ProgressTracker::new(ProgressStatus::UploadInProgress, callback);
        tracker.set_totals(manifest.file_count() as u64, manifest.total_size());

        let hash_alg: HashAlgorithm = manifest.hash_alg();

        // A false from the callback latches the tracker; `take_while` then
        // stops scheduling while `buffer_unordered` drains in-flight work.
        let mut uploads = futures::stream::iter(manifest.paths())
            .take_while(|_| future::ready(tracker.continue_reporting()))
            .map(|entry| self.upload_object_to_cas(entry, hash_alg, source_root, s3_check_cache))
            .buffer_unordered(self.settings.worker_count());

        while let Some(result) = uploads.next().await {
            let (uploaded, size): (bool, u64) = result?;
            if uploaded {
                tracker.increase_processed(1, size);
            } else {
                tracker.increase_skipped(1, size);
            }
            tracker.report_progress();
        }
        drop(uploads);

        if !tracker.continue_reporting() {
            return Err(StorageError::Cancelled {
                statistics: tracker.summary_statistics(),
            });
        }
        Ok(tracker.summary_statistics())
    }

    /// Upload one manifest entry if its content object is absent.
    ///
    /// Returns `(was_uploaded, file_size)`; `false` means the object was
    /// already present (or the entry was a symlink, which is refused).
    async fn upload_object_to_cas(
        &self,
        entry: &ManifestPath,
        hash_alg: HashAlgorithm,
        source_root: &Path,
        s3_check_cache: &S3CheckCache,
    ) -> Result<(bool, u64), StorageError> {
        let local_path: PathBuf = source_root.join(&entry.path);

        let is_symlink: bool = local_path
            .symlink_metadata()
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if is_symlink {
            warn!(
                path = %local_path.display(),
                "symlinked files are not uploaded, skipping"
            );
            return Ok((false, entry.size));
        }

        let key: String = self.location.cas_object_key(&entry.hash, hash_alg);
        let cache_key: String = format!("{}/{}", self.location.bucket, key);

        if s3_check_cache.contains(&cache_key) {
            debug!(path = %local_path.display(), %key, "skipping, present in existence cache");
            return Ok((false, entry.size));
        }

        let already_uploaded: bool = with_retries(
            &self.settings.retry,
            "checking if object exists",
            || async { self.client.head_object(&self.location.bucket, &key).await },
        )
        .await?
        .is_some();

        let uploaded: bool = if already_uploaded {
            debug!(path = %local_path.display(), %key, "skipping, object already in store");
            false
        } else {
            with_retries(&self.settings.retry, "uploading file", || async {
                self.client
                    .put_object_from_file(&self.location.bucket, &key, &local_path, None)
                    .await
            })
            .await?;
            true
        };

        s3_check_cache.put(&cache_key);
        Ok((uploaded, entry.size))
    }

    /// Upload the manifest file itself. Called after the content objects so
    /// a manifest key never names missing content.
    pub async fn upload_manifest(
        &self,
        manifest: &Manifest,
        partial_prefix: &str,
        source_root: &str,
        file_system_location_name: Option<&str>,
    ) -> Result<ManifestUploadResult, StorageError> {
        upload_input_manifest(
            self.client,
            &self.location,
            &self.settings.retry,
            manifest,
            partial_prefix,
            source_root,
            file_system_location_name,
        )
        .await
    }
}
