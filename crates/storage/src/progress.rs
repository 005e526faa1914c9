//! Progress reporting, cancellation, and transfer statistics.
//!
//! Every bulk operation (hashing, upload, download) drives a
//! `ProgressTracker` and invokes a caller-supplied callback after each unit
//! of work. The callback's return value is the cancellation predicate: a
//! `false` latches the tracker, the orchestrator stops scheduling new work,
//! lets in-flight work finish, and fails with the accumulated statistics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Stage of processing being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStatus {
    /// Hashing files and building manifests.
    PreparingInProgress,
    /// Uploading content objects.
    UploadInProgress,
    /// Downloading content objects.
    DownloadInProgress,
}

impl ProgressStatus {
    fn verb(&self) -> &'static str {
        match self {
            ProgressStatus::PreparingInProgress => "Processed",
            ProgressStatus::UploadInProgress => "Uploaded",
            ProgressStatus::DownloadInProgress => "Downloaded",
        }
    }
}

/// Snapshot handed to the progress callback after each unit of work.
#[derive(Debug, Clone)]
pub struct ProgressReportMetadata {
    /// Stage being reported.
    pub status: ProgressStatus,
    /// Percentage complete, by bytes when sizes are known, else by files.
    pub progress: f64,
    /// Human-readable progress line.
    pub message: String,
}

/// Callback invoked with progress metadata; returns whether the operation
/// should continue. This is the only cancellation channel.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, metadata: &ProgressReportMetadata) -> bool;
}

impl<F> ProgressCallback for F
where
    F: Fn(&ProgressReportMetadata) -> bool + Send + Sync,
{
    fn on_progress(&self, metadata: &ProgressReportMetadata) -> bool {
        self(metadata)
    }
}

/// Statistics for one bulk operation.
///
/// `skipped` means work avoided: hash-cache hits during hashing, objects
/// already present in the store during upload, conflict-skipped files during
/// download.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryStatistics {
    /// Wall-clock duration of the operation.
    pub total_time: Duration,
    pub total_files: u64,
    pub total_bytes: u64,
    pub processed_files: u64,
    pub processed_bytes: u64,
    pub skipped_files: u64,
    pub skipped_bytes: u64,
    /// Processed bytes per second.
    pub transfer_rate: f64,
}

impl SummaryStatistics {
    /// Combine with another statistics value. Associative and commutative
    /// over the counters; the rate is recomputed from the combined totals.
    pub fn aggregate(mut self, other: &SummaryStatistics) -> SummaryStatistics {
        self.total_time += other.total_time;
        self.total_files += other.total_files;
        self.total_bytes += other.total_bytes;
        self.processed_files += other.processed_files;
        self.processed_bytes += other.processed_bytes;
        self.skipped_files += other.skipped_files;
        self.skipped_bytes += other.skipped_bytes;
        self.transfer_rate = if self.total_time.as_secs_f64() > 0.0 {
            self.processed_bytes as f64 / self.total_time.as_secs_f64()
        } else {
            0.0
        };
        self
    }
}

/// Download statistics: the shared counters plus file counts per
/// destination root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadSummaryStatistics {
    pub summary: SummaryStatistics,
    /// Number of files materialized under each destination root.
    pub file_counts_by_root_directory: HashMap<String, u64>,
}

impl DownloadSummaryStatistics {
    /// Combine with another download statistics value.
    pub fn aggregate(mut self, other: &DownloadSummaryStatistics) -> DownloadSummaryStatistics {
        self.summary = self.summary.aggregate(&other.summary);
        for (root, count) in &other.file_counts_by_root_directory {
            *self
                .file_counts_by_root_directory
                .entry(root.clone())
                .or_insert(0) += count;
        }
        self
    }

    /// Drop the per-root counts.
    pub fn into_summary_statistics(self) -> SummaryStatistics {
        self.summary
    }
}

/// Convert a byte count to a short human-readable size for progress lines.
pub fn human_readable_file_size(size_in_bytes: u64) -> String {
    const POSTFIXES: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut converted: f64 = size_in_bytes as f64;
    for postfix in POSTFIXES {
        let rounded: f64 = (converted * 100.0).round() / 100.0;
        if rounded < 1000.0 {
            return format!("{rounded} {postfix}");
        }
        converted /= 1000.0;
    }
    format!("{:.2} {}", converted * 1000.0, POSTFIXES[5])
}

struct TrackerCounters {
    total_files: u64,
    total_bytes: u64,
    processed_files: u64,
    processed_bytes: u64,
    skipped_files: u64,
    skipped_bytes: u64,
}

/// Records the progress of one bulk operation and reports it through the
/// caller's callback. Shared by reference between the scheduling loop and
/// completion handlers; counter updates serialize through one lock.
pub struct ProgressTracker<'a> {
    status: ProgressStatus,
    counters: Mutex<TrackerCounters>,
    continue_flag: AtomicBool,
    callback: Option<&'a dyn ProgressCallback>,
    started: Instant,
}

impl<'a> ProgressTracker<'a> {
    /// Create a tracker for one operation.
    pub fn new(status: ProgressStatus, callback: Option<&'a dyn ProgressCallback>) -> Self {
        Self {
            status,
            counters: Mutex::new(TrackerCounters {
                total_files: 0,
                total_bytes: 0,
                processed_files: 0,
                processed_bytes: 0,
                skipped_files: 0,
                skipped_bytes: 0,
            }),
            continue_flag: AtomicBool::new(true),
            callback,
            started: Instant::now(),
        }
    }

    /// Record the total amount of work before scheduling begins.
    pub fn set_totals(&self, total_files: u64, total_bytes: u64) {
        let mut counters = self.counters.lock();
        counters.total_files = total_files;
        counters.total_bytes = total_bytes;
    }

    /// Record completed work.
    pub fn increase_processed(&self, files: u64, bytes: u64) {
        let mut counters = self.counters.lock();
        counters.processed_files += files;
        counters.processed_bytes += bytes;
    }

    /// Record avoided work.
    pub fn increase_skipped(&self, files: u64, bytes: u64) {
        let mut counters = self.counters.lock();
        counters.skipped_files += files;
        counters.skipped_bytes += bytes;
    }

    /// Invoke the callback with current progress. A `false` return latches:
    /// once cancelled, the tracker stays cancelled and the callback is not
    /// called again.
    pub fn report_progress(&self) -> bool {
        if !self.continue_reporting() {
            return false;
        }
        let Some(callback) = self.callback else {
            return true;
        };

        let metadata: ProgressReportMetadata = self.metadata();
        if !callback.on_progress(&metadata) {
            self.continue_flag.store(false, Ordering::SeqCst);
        }
        self.continue_reporting()
    }

    /// Whether the operation should keep scheduling new work.
    pub fn continue_reporting(&self) -> bool {
        self.continue_flag.load(Ordering::SeqCst)
    }

    fn metadata(&self) -> ProgressReportMetadata {
        let counters = self.counters.lock();
        let completed_bytes: u64 = counters.processed_bytes + counters.skipped_bytes;
        let completed_files: u64 = counters.processed_files + counters.skipped_files;

        let (progress, message): (f64, String) = if counters.total_bytes > 0 {
            (
                (completed_bytes as f64 / counters.total_bytes as f64 * 1000.0).round() / 10.0,
                format!(
                    "{} {} / {} of {} file{}",
                    self.status.verb(),
                    human_readable_file_size(completed_bytes),
                    human_readable_file_size(counters.total_bytes),
                    counters.total_files,
                    if counters.total_files == 1 { "" } else { "s" },
                ),
            )
        } else if counters.total_files > 0 {
            (
                (completed_files as f64 / counters.total_files as f64 * 1000.0).round() / 10.0,
                format!(
                    "{} {}/{} file{}",
                    self.status.verb(),
                    completed_files,
                    counters.total_files,
                    if counters.total_files == 1 { "" } else { "s" },
                ),
            )
        } else {
            (0.0, format!("{} 0 files", self.status.verb()))
        };

        ProgressReportMetadata {
            status: self.status,
            progress,
            message,
        }
    }

    /// Snapshot the statistics accumulated so far.
    pub fn summary_statistics(&self) -> SummaryStatistics {
        let counters = self.counters.lock();
        let total_time: Duration = self.started.elapsed();
        let transfer_rate: f64 = if total_time.as_secs_f64() > 0.0 {
            counters.processed_bytes as f64 / total_time.as_secs_f64()
        } else {
            0.0
        };
        SummaryStatistics {
            total_time,
            total_files: counters.total_files,
            total_bytes: counters.total_bytes,
            processed_files: counters.processed_files,
            processed_bytes: counters.processed_bytes,
            skipped_files: counters.skipped_files,
            skipped_bytes: counters.skipped_bytes,
            transfer_rate,
        }
    }
}
