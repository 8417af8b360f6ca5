// Run metrics module
//
// Lightweight counters for a sync run, updated from concurrent workers

use crate::models::{CleanReport, ConversionResult, ConversionStatus};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Sync run metrics.
///
/// Uses atomic operations so workers can record without locks. Logged once
/// at the end of a run.
#[derive(Debug)]
pub struct Metrics {
    pub files_converted: AtomicUsize,
    pub files_skipped: AtomicUsize,
    pub files_failed: AtomicUsize,
    pub files_cancelled: AtomicUsize,

    /// Source files with no matching format
    pub files_ignored: AtomicUsize,

    pub files_removed: AtomicUsize,
    pub dirs_removed: AtomicUsize,
    pub removal_failures: AtomicUsize,

    /// Time spent in external commands that converted a file, in milliseconds
    pub total_conversion_time_ms: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            files_converted: AtomicUsize::new(0),
            files_skipped: AtomicUsize::new(0),
            files_failed: AtomicUsize::new(0),
            files_cancelled: AtomicUsize::new(0),
            files_ignored: AtomicUsize::new(0),
            files_removed: AtomicUsize::new(0),
            dirs_removed: AtomicUsize::new(0),
            removal_failures: AtomicUsize::new(0),
            total_conversion_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record the outcome of one conversion task
    pub fn record_conversion(&self, result: &ConversionResult) {
        let counter = match result.status {
            ConversionStatus::Converted => {
                self.record_conversion_time(result.duration);
                &self.files_converted
            }
            ConversionStatus::Skipped => &self.files_skipped,
            ConversionStatus::Failed => &self.files_failed,
            ConversionStatus::Cancelled => &self.files_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self, count: usize) {
        self.files_ignored.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_conversion_time(&self, duration: Duration) {
        self.total_conversion_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_clean(&self, report: &CleanReport) {
        self.files_removed
            .fetch_add(report.removed_files.len(), Ordering::Relaxed);
        self.dirs_removed
            .fetch_add(report.removed_dirs.len(), Ordering::Relaxed);
        self.removal_failures
            .fetch_add(report.failures.len(), Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average conversion time per converted file in milliseconds
    pub fn avg_conversion_time_ms(&self) -> f64 {
        let total = self.total_conversion_time_ms.load(Ordering::Relaxed);
        let count = self.files_converted.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Sync Summary ===");
        tracing::info!("Elapsed: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Files: {} converted, {} skipped, {} failed, {} cancelled, {} ignored",
            self.files_converted.load(Ordering::Relaxed),
            self.files_skipped.load(Ordering::Relaxed),
            self.files_failed.load(Ordering::Relaxed),
            self.files_cancelled.load(Ordering::Relaxed),
            self.files_ignored.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Total conversion time: {:.2}s (avg: {:.2}ms per file)",
            self.total_conversion_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_conversion_time_ms()
        );
        tracing::info!(
            "Cleanup: {} files removed, {} directories removed, {} failures",
            self.files_removed.load(Ordering::Relaxed),
            self.dirs_removed.load(Ordering::Relaxed),
            self.removal_failures.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
