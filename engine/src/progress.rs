//! Progress reporting trait.
//!
//! This module defines the ProgressCallback trait, which decouples the backup
//! driver from how progress is shown. The CLI prints it; tests record it.

use crate::backup::BackupSummary;
use crate::model::Candidate;
use uuid::Uuid;

/// Snapshot passed to [`ProgressCallback::on_progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub copied_bytes: u64,
    pub total_bytes: u64,
    /// Whole percent of `total_bytes` copied so far
    pub percent: u64,
    /// Modification time of the file just processed
    pub tstamp: i64,
}

/// Trait for receiving progress updates from a backup run.
///
/// All methods are called synchronously on the driver's thread.
pub trait ProgressCallback {
    /// Called once, before the first candidate is processed.
    fn on_backup_started(&self, run_id: Uuid, candidates: usize, total_bytes: u64);

    /// Called after a candidate has been copied (or would have been, in a dry run).
    fn on_file_copied(&self, _candidate: &Candidate, _bytes: u64) {}

    /// Called only when the whole-percent value increases.
    fn on_progress(&self, update: &ProgressUpdate);

    /// Called when the run stops normally, whether complete or truncated.
    fn on_backup_completed(&self, summary: &BackupSummary);
}

/// Tracks the last reported whole percent so updates are only emitted on increase.
#[derive(Debug, Clone)]
pub struct PercentTracker {
    total: u64,
    last: u64,
}

impl PercentTracker {
    pub fn new(total: u64) -> Self {
        PercentTracker { total, last: 0 }
    }

    /// Return the new percent if `copied` moved past the last reported one.
    /// Nothing is reported until at least 1% is done.
    pub fn advance(&mut self, copied: u64) -> Option<u64> {
        let percent = if self.total == 0 {
            100
        } else {
            (copied.saturating_mul(100) / self.total).min(100)
        };
        if percent > self.last {
            self.last = percent;
            Some(percent)
        } else {
            None
        }
    }
}

/// Human-readable size with 1024-based units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
