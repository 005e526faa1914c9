//! Transfer settings shared by the upload and download orchestrators.

use crate::retry::RetrySettings;

/// Per-transfer concurrency the backing client uses internally (multipart
/// parts, connection reuse). The worker pool is sized so that
/// `workers * per-transfer concurrency` stays within the connection pool.
pub const S3_TRANSFER_CONCURRENCY: usize = 10;

/// Settings governing bulk transfer operations.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Ceiling on concurrent connections to the store. Shared by unrelated
    /// operations in the same process; each bulk operation still gets its
    /// own worker pool.
    pub max_pool_connections: usize,
    /// Retry policy for transient backend errors.
    pub retry: RetrySettings,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            max_pool_connections: 50,
            retry: RetrySettings::default(),
        }
    }
}

impl StorageSettings {
    /// Number of parallel workers for a bulk operation.
    pub fn worker_count(&self) -> usize {
        (self.max_pool_connections / S3_TRANSFER_CONCURRENCY).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_worker_count() {
        assert_eq!(StorageSettings::default().worker_count(), 5);
    }

    #[test]
    fn test_small_pool_still_gets_one_worker() {
        let settings: StorageSettings = StorageSettings {
            max_pool_connections: 3,
            ..Default::default()
        };
        assert_eq!(settings.worker_count(), 1);
    }
}
