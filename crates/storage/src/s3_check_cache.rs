//! Local "last seen in the store" existence cache.
//!
//! Records which content-object keys were recently confirmed present in the
//! backing store so the upload orchestrator can skip a HEAD request. Entries
//! older than the TTL are treated as absent (misses) but are not eagerly
//! deleted. Strictly a performance hint: every miss still triggers the
//! authoritative existence check, so a stale entry costs at most one
//! redundant upload and can never lose data.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

/// Cache database file name within the cache directory.
const S3_CHECK_CACHE_FILE_NAME: &str = "s3_check_cache.db";
/// Table name, versioned so schema changes start a fresh table.
const TABLE_NAME: &str = "s3checkV1";

/// Days after which a confirmation is no longer trusted. Aligned with
/// typical bucket lifecycle policies; deliberately a fixed constant.
pub const ENTRY_EXPIRY_DAYS: u64 = 30;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Storage backend for the existence cache; persistent or no-op, chosen
/// once at construction.
pub trait S3CheckCacheBackend: Send + Sync {
    /// Look up a confirmation timestamp.
    fn get(&self, s3_key: &str) -> Option<u64>;
    /// Record a confirmation at `timestamp` seconds since epoch.
    fn put(&self, s3_key: &str, timestamp: u64);
}

/// SQLite-backed existence cache.
pub struct SqliteS3CheckCache {
    connection: Mutex<Connection>,
}

impl SqliteS3CheckCache {
    /// Open (creating if needed) the cache database in `cache_dir`.
    pub fn open(cache_dir: &Path) -> rusqlite::Result<Self> {
        if let Err(error) = std::fs::create_dir_all(cache_dir) {
            return Err(rusqlite::Error::ToSqlConversionFailure(Box::new(error)));
        }
        let db_path: PathBuf = cache_dir.join(S3_CHECK_CACHE_FILE_NAME);
        let connection: Connection = Connection::open(db_path)?;
        connection.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {TABLE_NAME} (
                    s3_key TEXT PRIMARY KEY,
                    last_seen_time INTEGER NOT NULL
                )"
            ),
            [],
        )?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }
}

impl S3CheckCacheBackend for SqliteS3CheckCache {
    fn get(&self, s3_key: &str) -> Option<u64> {
        let connection = self.connection.lock();
        let result: rusqlite::Result<Option<i64>> = connection
            .query_row(
                &format!("SELECT last_seen_time FROM {TABLE_NAME} WHERE s3_key = ?1"),
                params![s3_key],
                |row| row.get(0),
            )
            .optional();

        match result {
            Ok(Some(timestamp)) if timestamp >= 0 => Some(timestamp as u64),
            Ok(_) => None,
            Err(error) => {
                warn!(%error, s3_key, "existence cache lookup failed, treating as miss");
                None
            }
        }
    }

    fn put(&self, s3_key: &str, timestamp: u64) {
        let connection = self.connection.lock();
        let result: rusqlite::Result<usize> = connection.execute(
            &format!(
                "INSERT OR REPLACE INTO {TABLE_NAME} (s3_key, last_seen_time) VALUES (?1, ?2)"
            ),
            params![s3_key, timestamp as i64],
        );
        if let Err(error) = result {
            warn!(%error, s3_key, "existence cache write failed");
        }
    }
}

/// Backend used when the persistent store is unavailable.
pub struct NoopS3CheckCache;

impl S3CheckCacheBackend for NoopS3CheckCache {
    fn get(&self, _s3_key: &str) -> Option<u64> {
        None
    }

    fn put(&self, _s3_key: &str, _timestamp: u64) {}
}

/// Handle to the local existence cache.
pub struct S3CheckCache {
    backend: Box<dyn S3CheckCacheBackend>,
}

impl S3CheckCache {
    /// Open the cache in `cache_dir`, degrading to the no-op backend if the
    /// embedded store cannot be opened.
    pub fn open(cache_dir: &Path) -> Self {
        match SqliteS3CheckCache::open(cache_dir) {
            Ok(backend) => Self {
                backend: Box::new(backend),
            },
            Err(error) => {
                warn!(
                    %error,
                    cache_dir = %cache_dir.display(),
                    "existence cache unavailable, every object will be checked against the store"
                );
                Self {
                    backend: Box::new(NoopS3CheckCache),
                }
            }
        }
    }

    /// A cache that never hits.
    pub fn disabled() -> Self {
        Self {
            backend: Box::new(NoopS3CheckCache),
        }
    }

    /// Wrap an explicit backend.
    pub fn from_backend(backend: Box<dyn S3CheckCacheBackend>) -> Self {
        Self { backend }
    }

    /// Whether the key was confirmed present within the TTL.
    pub fn contains(&self, s3_key: &str) -> bool {
        let Some(last_seen) = self.backend.get(s3_key) else {
            return false;
        };
        let now: u64 = now_epoch_seconds();
        now.saturating_sub(last_seen) < ENTRY_EXPIRY_DAYS * SECONDS_PER_DAY
    }

    /// Record that the key was confirmed present just now.
    pub fn put(&self, s3_key: &str) {
        self.backend.put(s3_key, now_epoch_seconds());
    }
}

fn now_epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
