//! Object-store key layout.
//!
//! Content objects live at `<rootPrefix>/Data/<hash>.<alg>` and manifests
//! under `<rootPrefix>/Manifests/...`; input manifests get a
//! `<farm>/<queue>/Inputs/<guid>/` partial prefix, output manifests a
//! `<farm>/<queue>/<job>[/<step>[/<task>]]` prefix.

use farmsync_model::HashAlgorithm;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Folder under the root prefix holding content-addressed data objects.
pub const DATA_FOLDER_NAME: &str = "Data";
/// Folder under the root prefix holding manifests.
pub const MANIFEST_FOLDER_NAME: &str = "Manifests";
/// Folder under a queue prefix holding input manifests.
pub const INPUT_MANIFEST_FOLDER_NAME: &str = "Inputs";

/// Join S3 key segments with `/`.
pub fn join_s3_paths(root: &str, segments: &[&str]) -> String {
    let mut key: String = root.to_string();
    for segment in segments {
        key.push('/');
        key.push_str(segment);
    }
    key
}

/// A random 32-character hex GUID for input-manifest key prefixes.
pub fn generate_random_guid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Bucket and root prefix all attachments of a queue are stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Location {
    /// Bucket name.
    pub bucket: String,
    /// Key prefix all objects are stored relative to.
    pub root_prefix: String,
}

impl S3Location {
    /// Create a location, validating that both fields are present.
    ///
    /// # Errors
    /// `StorageError::InvalidLocation` on an empty bucket or prefix.
    pub fn new(
        bucket: impl Into<String>,
        root_prefix: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let bucket: String = bucket.into();
        let root_prefix: String = root_prefix.into();
        if bucket.is_empty() {
            return Err(StorageError::InvalidLocation {
                message: "bucket name is empty".to_string(),
            });
        }
        if root_prefix.is_empty() {
            return Err(StorageError::InvalidLocation {
                message: "root prefix is empty".to_string(),
            });
        }
        Ok(Self {
            bucket,
            root_prefix,
        })
    }

    /// Prefix of the content-addressed data folder.
    pub fn full_cas_prefix(&self) -> String {
        join_s3_paths(&self.root_prefix, &[DATA_FOLDER_NAME])
    }

    /// Full key of a content object.
    pub fn cas_object_key(&self, hash: &str, algorithm: HashAlgorithm) -> String {
        format!(
            "{}/{}.{}",
            self.full_cas_prefix(),
            hash,
            algorithm.extension()
        )
    }

    /// Prefix of the manifest folder.
    pub fn full_manifest_prefix(&self) -> String {
        join_s3_paths(&self.root_prefix, &[MANIFEST_FOLDER_NAME])
    }

    /// Turn a partial manifest key into a full one.
    pub fn add_manifest_folder_prefix(&self, partial_key: &str) -> String {
        join_s3_paths(&self.full_manifest_prefix(), &[partial_key])
    }

    /// Fresh partial prefix for a job submission's input manifests.
    pub fn partial_input_manifest_prefix(&self, farm_id: &str, queue_id: &str) -> String {
        join_s3_paths(
            farm_id,
            &[
                queue_id,
                INPUT_MANIFEST_FOLDER_NAME,
                &generate_random_guid(),
            ],
        )
    }

    /// Prefix under which a job's output manifests live, optionally narrowed
    /// to one step, then one task.
    ///
    /// # Errors
    /// `StorageError::InvalidOutputScope` when a task is given without a
    /// step.
    pub fn output_manifest_prefix(
        &self,
        farm_id: &str,
        queue_id: &str,
        job_id: &str,
        step_id: Option<&str>,
        task_id: Option<&str>,
    ) -> Result<String, StorageError> {
        if task_id.is_some() && step_id.is_none() {
            return Err(StorageError::InvalidOutputScope {
                message: "task ID specified without a step ID".to_string(),
            });
        }

        let mut prefix: String =
            join_s3_paths(&self.full_manifest_prefix(), &[farm_id, queue_id, job_id]);
        if let Some(step) = step_id {
            prefix = join_s3_paths(&prefix, &[step]);
        }
        if let Some(task) = task_id {
            prefix = join_s3_paths(&prefix, &[task]);
        }
        prefix.push('/');
        Ok(prefix)
    }
}
