//! Incremental backup of remote files to a local tree.
//!
//! A backup has two stages, mirroring plan-then-run:
//! - [`plan_backup`] walks the remote namespace and returns the candidates in
//!   ascending modification-time order
//! - [`BackupDriver::run`] copies them one at a time within a byte budget
//!
//! A run stopped by the budget reports a resumption watermark: the modification
//! time of the last file it processed. Feeding that back as the next run's
//! minimum date continues where this one stopped.

use crate::checksums::ChecksumEngine;
use crate::error::{classify, EngineError, Phase, Result};
use crate::filter::{NameFilter, NoPreserveSet};
use crate::fs_ops::{self, LocalFile};
use crate::model::{ByteBudget, CandidateList, RemoteEntryStat, RemotePath, TimeWindow};
use crate::progress::{format_bytes, PercentTracker, ProgressCallback, ProgressUpdate};
use crate::remote::RemoteFs;
use crate::report::{compare_local, Comparison, DiscrepancySink};
use crate::walker::{WalkStats, WalkVisitor, Walker};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, info_span, warn};
use uuid::Uuid;

/// Walk `root` and return the files in `window`, sorted oldest first.
///
/// `visitor` sees every retained directory and file, including files outside
/// the window; the permission scripts are written this way.
pub fn plan_backup<R: RemoteFs + ?Sized>(
    remote: &R,
    filter: &NameFilter,
    root: &RemotePath,
    window: TimeWindow,
    visitor: &mut dyn WalkVisitor,
) -> (CandidateList, WalkStats) {
    let mut walker = Walker::new(remote, filter);
    let mut candidates = walker.walk(root, window, visitor);
    candidates.sort_by_modified();

    let stats = walker.stats().clone();
    info!(
        "Found {} files to back up ({}), {} outside the time window",
        candidates.len(),
        format_bytes(candidates.total_bytes),
        stats.outside_window
    );
    (candidates, stats)
}

#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Log what would be copied without touching the local tree
    pub dry_run: bool,
    /// Pause after every processed file
    pub sleep: Duration,
    /// Skip the copy when the local file already has the remote size and mtime
    pub skip_unchanged: bool,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    /// Every candidate was processed.
    Completed,
    /// The byte budget stopped the run. `watermark` is the modification time of
    /// the last processed file, or `None` if the first candidate already
    /// exceeded the budget.
    Truncated { watermark: Option<i64> },
}

impl BackupOutcome {
    /// 0 for a complete run, otherwise the watermark (0 if nothing was processed).
    pub fn resumption_value(&self) -> i64 {
        match self {
            BackupOutcome::Completed => 0,
            BackupOutcome::Truncated { watermark } => watermark.unwrap_or(0),
        }
    }

    /// The minimum date the next incremental run should start from.
    pub fn next_min_date(&self, window: &TimeWindow) -> i64 {
        match self {
            BackupOutcome::Completed => window.max,
            BackupOutcome::Truncated { watermark } => watermark.unwrap_or(window.min),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupSummary {
    pub run_id: Uuid,
    /// Candidates that fit in the budget
    pub files_processed: u64,
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub preserved: u64,
    pub preservation_skipped: u64,
    pub unchanged_skipped: u64,
    pub checksum_errors: u64,
    /// Copied files whose checksum could not be compared
    pub unverified: u64,
    pub outcome: BackupOutcome,
}

impl BackupSummary {
    fn new(run_id: Uuid) -> Self {
        BackupSummary {
            run_id,
            files_processed: 0,
            files_copied: 0,
            bytes_copied: 0,
            preserved: 0,
            preservation_skipped: 0,
            unchanged_skipped: 0,
            checksum_errors: 0,
            unverified: 0,
            outcome: BackupOutcome::Completed,
        }
    }
}

/// Mutable state of one run. Owned by [`BackupDriver::run`], never shared.
struct RunState {
    budget: ByteBudget,
    percent: PercentTracker,
    last_timestamp: Option<i64>,
    summary: BackupSummary,
}

/// Copies sorted candidates from a remote filesystem into a local tree.
pub struct BackupDriver<'a, R: RemoteFs + ?Sized> {
    remote: &'a R,
    local_root: PathBuf,
    preserve_root: PathBuf,
    no_preserve: &'a NoPreserveSet,
    engine: ChecksumEngine,
    options: BackupOptions,
    run_id: Uuid,
}

impl<'a, R: RemoteFs + ?Sized> BackupDriver<'a, R> {
    pub fn new(
        remote: &'a R,
        local_root: impl Into<PathBuf>,
        preserve_root: impl Into<PathBuf>,
        no_preserve: &'a NoPreserveSet,
        engine: ChecksumEngine,
        options: BackupOptions,
    ) -> Self {
        BackupDriver {
            remote,
            local_root: local_root.into(),
            preserve_root: preserve_root.into(),
            no_preserve,
            engine,
            options,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Process `candidates` in order until they run out or `budget` is exceeded.
    ///
    /// Checksum mismatches go to `sink` and never stop the run. Any failure to
    /// stat, preserve or copy a candidate does: it is returned as
    /// [`EngineError::Aborted`] carrying the last processed timestamp; see
    /// [`EngineError::resume_from`].
    pub fn run<W: Write>(
        &self,
        candidates: &CandidateList,
        budget: ByteBudget,
        progress_callback: Option<&dyn ProgressCallback>,
        sink: &mut DiscrepancySink<W>,
    ) -> Result<BackupSummary> {
        let span = info_span!("backup", run_id = %self.run_id);
        let _enter = span.enter();

        if let Some(callback) = progress_callback {
            callback.on_backup_started(self.run_id, candidates.len(), candidates.total_bytes);
        }

        let mut state = RunState {
            budget,
            percent: PercentTracker::new(candidates.total_bytes),
            last_timestamp: None,
            summary: BackupSummary::new(self.run_id),
        };

        for candidate in candidates {
            let last = state.last_timestamp;
            let stat = self
                .remote
                .stat(&candidate.path)
                .map_err(|e| EngineError::from(e).abort(last))?;

            if !state.budget.charge(stat.size) {
                info!(
                    used = state.budget.used,
                    ceiling = state.budget.ceiling,
                    "Size limit reached before {}",
                    candidate.path
                );
                state.summary.outcome = BackupOutcome::Truncated {
                    watermark: state.last_timestamp,
                };
                break;
            }

            info!(
                path = %candidate.path,
                bytes = stat.size,
                "File {} {} bytes, perms: {}/{}, {}",
                candidate.path,
                stat.size,
                stat.owner,
                stat.group,
                stat.permission_symbolic()
            );
            let tstamp = stat.modified_secs();
            let local = fs_ops::local_path_for(&self.local_root, &candidate.path);

            if !self.options.dry_run {
                self.back_up_file(&candidate.path, &local, &stat, &mut state, sink)
                    .map_err(|e| e.abort(last))?;
            }

            state.summary.files_processed += 1;
            state.last_timestamp = Some(tstamp);
            if let Some(callback) = progress_callback {
                callback.on_file_copied(candidate, stat.size);
            }

            if let Some(percent) = state.percent.advance(state.budget.used) {
                if let Some(callback) = progress_callback {
                    callback.on_progress(&ProgressUpdate {
                        copied_bytes: state.budget.used,
                        total_bytes: candidates.total_bytes,
                        percent,
                        tstamp,
                    });
                }
            }

            if !self.options.sleep.is_zero() {
                std::thread::sleep(self.options.sleep);
            }
        }

        let summary = state.summary;
        if let BackupOutcome::Truncated { .. } = summary.outcome {
            info!("Size limit reached.");
        }
        if let Some(callback) = progress_callback {
            callback.on_backup_completed(&summary);
        }
        Ok(summary)
    }

    /// Preserve, copy, stamp and check one file.
    fn back_up_file<W: Write>(
        &self,
        path: &RemotePath,
        local: &Path,
        stat: &RemoteEntryStat,
        state: &mut RunState,
        sink: &mut DiscrepancySink<W>,
    ) -> Result<()> {
        let existing = fs_ops::probe(local)?;

        if let LocalFile::File { len, modified_secs } = existing {
            let unchanged = len == stat.size && modified_secs == stat.modified_secs();
            if self.options.skip_unchanged && unchanged {
                info!("no need to back up {}, mtime matches remote", local.display());
                state.summary.unchanged_skipped += 1;
                return Ok(());
            }

            let local_str = local.to_string_lossy();
            if self.no_preserve.should_preserve(&local_str) {
                let target = fs_ops::local_path_for(&self.preserve_root, path);
                fs_ops::preserve_existing(local, &target)?;
                info!("preserved {} into {}", local.display(), target.display());
                state.summary.preserved += 1;
            } else {
                info!("skipped preservation of {}", local.display());
                state.summary.preservation_skipped += 1;
            }
        }

        self.remote.copy_to_local(path, local)?;
        state.summary.files_copied += 1;
        state.summary.bytes_copied += stat.size;

        if let Err(e) = fs_ops::set_modified(local, stat.modification_time_ms) {
            warn!("could not set modification time: {}", e);
        }

        self.check_copy(path, local, stat, state, sink);
        Ok(())
    }

    fn check_copy<W: Write>(
        &self,
        path: &RemotePath,
        local: &Path,
        stat: &RemoteEntryStat,
        state: &mut RunState,
        sink: &mut DiscrepancySink<W>,
    ) {
        let remote_checksum = match self.remote.checksum(path) {
            Ok(checksum) => checksum,
            Err(e) => {
                let err = EngineError::from(e);
                let class = classify(Phase::Verification, &err);
                warn!(path = %path, ?class, "could not fetch remote checksum: {}", err);
                state.summary.unverified += 1;
                return;
            }
        };

        match compare_local(path, stat, remote_checksum.as_ref(), local, &self.engine) {
            Comparison::Matched => {}
            Comparison::NoRemoteChecksum => {
                info!(path = %path, "no remote checksum available");
                state.summary.unverified += 1;
            }
            Comparison::Failed(discrepancy) => {
                sink.record(&discrepancy);
                state.summary.checksum_errors += 1;
            }
        }
    }
}
