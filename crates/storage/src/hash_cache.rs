//! Local file-hash cache.
//!
//! Maps (absolute file path, hash algorithm) to a previously computed digest
//! plus the mtime it was computed at. Purely a performance hint: callers
//! trust an entry only while the file's current mtime still equals the
//! recorded one, so the worst staleness costs one redundant hash. A content
//! change that preserves the mtime (e.g. a restored backup) is not detected;
//! that is an accepted limitation of the mtime-equality check.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use farmsync_model::HashAlgorithm;

/// Cache database file name within the cache directory.
const HASH_CACHE_FILE_NAME: &str = "hash_cache.db";
/// Table name, versioned so schema changes start a fresh table.
const TABLE_NAME: &str = "hashesV1";

/// One cached digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashCacheEntry {
    /// Absolute file path the digest was computed for.
    pub file_path: String,
    /// Algorithm that produced the digest.
    pub hash_algorithm: HashAlgorithm,
    /// The digest.
    pub file_hash: String,
    /// File mtime in microseconds at hashing time.
    pub last_modified_time_us: i64,
}

/// Storage backend for the hash cache.
///
/// Two implementations exist: the persistent SQLite store and a no-op used
/// when the store cannot be opened. The choice is made once at construction,
/// so lookup paths have no per-call enablement checks.
pub trait HashCacheBackend: Send + Sync {
    /// Look up an entry by path and algorithm.
    fn get(&self, file_path: &str, algorithm: HashAlgorithm) -> Option<HashCacheEntry>;
    /// Insert or replace an entry.
    fn put(&self, entry: &HashCacheEntry);
}

/// SQLite-backed hash cache.
///
/// Writers serialize through one lock per handle; multiple hashing threads
/// can share a handle safely.
pub struct SqliteHashCache {
    connection: Mutex<Connection>,
}

impl SqliteHashCache {
    /// Open (creating if needed) the cache database in `cache_dir`.
    pub fn open(cache_dir: &Path) -> rusqlite::Result<Self> {
        if let Err(error) = std::fs::create_dir_all(cache_dir) {
            return Err(rusqlite::Error::ToSqlConversionFailure(Box::new(error)));
        }
        let db_path: PathBuf = cache_dir.join(HASH_CACHE_FILE_NAME);
        let connection: Connection = Connection::open(db_path)?;
        connection.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {TABLE_NAME} (
                    file_path TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    file_hash TEXT NOT NULL,
                    last_modified_time INTEGER NOT NULL,
                    PRIMARY KEY (file_path, hash_algorithm)
                )"
            ),
            [],
        )?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }
}

impl HashCacheBackend for SqliteHashCache {
    fn get(&self, file_path: &str, algorithm: HashAlgorithm) -> Option<HashCacheEntry> {
        let connection = self.connection.lock();
        let result: rusqlite::Result<Option<(String, i64)>> = connection
            .query_row(
                &format!(
                    "SELECT file_hash, last_modified_time FROM {TABLE_NAME}
                     WHERE file_path = ?1 AND hash_algorithm = ?2"
                ),
                params![file_path, algorithm.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional();

        match result {
            Ok(Some((file_hash, last_modified_time_us))) => Some(HashCacheEntry {
                file_path: file_path.to_string(),
                hash_algorithm: algorithm,
                file_hash,
                last_modified_time_us,
            }),
            Ok(None) => None,
            Err(error) => {
                warn!(%error, file_path, "hash cache lookup failed, treating as miss");
                None
            }
        }
    }

    fn put(&self, entry: &HashCacheEntry) {
        let connection = self.connection.lock();
        let result: rusqlite::Result<usize> = connection.execute(
            &format!(
                "INSERT OR REPLACE INTO {TABLE_NAME}
                 (file_path, hash_algorithm, file_hash, last_modified_time)
                 VALUES (?1, ?2, ?3, ?4)"
            ),
            params![
                entry.file_path,
                entry.hash_algorithm.as_str(),
                entry.file_hash,
                entry.last_modified_time_us
            ],
        );
        if let Err(error) = result {
            warn!(%error, file_path = entry.file_path, "hash cache write failed");
        }
    }
}

/// Backend used when the persistent store is unavailable: every lookup is a
/// miss and writes vanish.
pub struct NoopHashCache;

impl HashCacheBackend for NoopHashCache {
    fn get(&self, _file_path: &str, _algorithm: HashAlgorithm) -> Option<HashCacheEntry> {
        None
    }

    fn put(&self, _entry: &HashCacheEntry) {}
}

/// Handle to the local hash cache.
pub struct HashCache {
    backend: Box<dyn HashCacheBackend>,
}

impl HashCache {
    /// Open the cache in `cache_dir`, degrading to the no-op backend if the
    /// embedded store cannot be opened. Degradation costs performance only,
    /// so it is never an error.
    pub fn open(cache_dir: &Path) -> Self {
        match SqliteHashCache::open(cache_dir) {
            Ok(backend) => Self {
                backend: Box::new(backend),
            },
            Err(error) => {
                warn!(
                    %error,
                    cache_dir = %cache_dir.display(),
                    "hash cache unavailable, file hashes will not be cached"
                );
                Self {
                    backend: Box::new(NoopHashCache),
                }
            }
        }
    }

    /// A cache that never hits, for callers that want caching off.
    pub fn disabled() -> Self {
        Self {
            backend: Box::new(NoopHashCache),
        }
    }

    /// Wrap an explicit backend.
    pub fn from_backend(backend: Box<dyn HashCacheBackend>) -> Self {
        Self { backend }
    }

    /// Get the cached entry for a path, if any. The caller decides whether
    /// to trust it by comparing the recorded mtime with the current one.
    pub fn entry(&self, file_path: &str, algorithm: HashAlgorithm) -> Option<HashCacheEntry> {
        self.backend.get(file_path, algorithm)
    }

    /// Insert or replace an entry.
    pub fn put_entry(&self, entry: &HashCacheEntry) {
        self.backend.put(entry);
    }
}
