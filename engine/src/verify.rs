//! Read-only comparison of a remote namespace against its local backup.
//!
//! Every retained remote file is checked against the mapped local path. Nothing
//! found here stops the pass: each problem is recorded and the pass moves on.

use crate::checksums::ChecksumEngine;
use crate::error::{classify, EngineError, Phase, Result};
use crate::filter::NameFilter;
use crate::fs_ops;
use crate::model::{RemoteEntryStat, RemotePath};
use crate::remote::RemoteFs;
use crate::report::{compare_local, Comparison, Discrepancy, DiscrepancySink};
use crate::walker::{WalkVisitor, Walker};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, info_span, warn};

const MIB: u64 = 1024 * 1024;

/// What to verify: one tree, or an explicit list of paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifySource {
    Walk(RemotePath),
    /// Each entry is visited like a walk root; a listed directory is traversed.
    List(Vec<RemotePath>),
}

impl VerifySource {
    /// Read one remote path per line. Blank lines are skipped.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("failed to read from-file {}: {}", path.display(), e))
        })?;
        let paths = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(RemotePath::new)
            .collect();
        Ok(VerifySource::List(paths))
    }

    pub fn roots(&self) -> &[RemotePath] {
        match self {
            VerifySource::Walk(root) => std::slice::from_ref(root),
            VerifySource::List(paths) => paths,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Files modified after this many epoch seconds are too new to be backed up yet
    pub max_date: i64,
    /// Files with any other block size are skipped; their checksums cannot match
    pub expected_block_size: u64,
}

/// Outcome of one full verify pass.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub checked: u64,
    pub matched: u64,
    /// Length matched but the remote side had no checksum to compare
    pub unverified: u64,
    pub skipped_too_new: u64,
    pub skipped_block_size: u64,
    pub remote_errors: u64,
    /// Every finding, in the order encountered
    pub discrepancies: Vec<Discrepancy>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

pub struct VerifyDriver<'a, R: RemoteFs + ?Sized> {
    remote: &'a R,
    filter: &'a NameFilter,
    local_root: PathBuf,
    engine: ChecksumEngine,
    options: VerifyOptions,
}

impl<'a, R: RemoteFs + ?Sized> VerifyDriver<'a, R> {
    pub fn new(
        remote: &'a R,
        filter: &'a NameFilter,
        local_root: impl Into<PathBuf>,
        engine: ChecksumEngine,
        options: VerifyOptions,
    ) -> Self {
        VerifyDriver {
            remote,
            filter,
            local_root: local_root.into(),
            engine,
            options,
        }
    }

    /// Check every retained file under `source`, writing findings to `sink`.
    pub fn verify<W: Write>(
        &self,
        source: &VerifySource,
        sink: &mut DiscrepancySink<W>,
    ) -> VerifyReport {
        let span = info_span!("verify", local_root = %self.local_root.display());
        let _enter = span.enter();

        let mut walker = Walker::new(self.remote, self.filter);
        let mut visitor = FileChecker {
            driver: self,
            sink,
            report: VerifyReport::default(),
        };
        for root in source.roots() {
            info!("Searching filesystem: {}", root);
            walker.traverse(root, &mut visitor);
        }

        let mut report = visitor.report;
        report.remote_errors += walker.stats().errors;
        info!(
            checked = report.checked,
            matched = report.matched,
            discrepancies = report.discrepancies.len(),
            "verify pass complete"
        );
        report
    }
}

struct FileChecker<'d, 'a, R: RemoteFs + ?Sized, W: Write> {
    driver: &'d VerifyDriver<'a, R>,
    sink: &'d mut DiscrepancySink<W>,
    report: VerifyReport,
}

impl<R: RemoteFs + ?Sized, W: Write> WalkVisitor for FileChecker<'_, '_, R, W> {
    fn on_file(&mut self, path: &RemotePath, stat: &RemoteEntryStat) {
        let options = &self.driver.options;

        if stat.modified_secs() > options.max_date {
            info!("IGNORING: {} too new", path);
            self.report.skipped_too_new += 1;
            return;
        }

        if stat.block_size != options.expected_block_size {
            warn!(
                "non-default block size ({}M) would fail checksum: {}",
                stat.block_size / MIB,
                path
            );
            self.report.skipped_block_size += 1;
            return;
        }

        let remote_checksum = match self.driver.remote.checksum(path) {
            Ok(checksum) => checksum,
            Err(e) => {
                let err = EngineError::from(e);
                let class = classify(Phase::Verification, &err);
                warn!(path = %path, ?class, "could not open {}: {}", path, err);
                self.report.remote_errors += 1;
                return;
            }
        };

        info!(
            "{} len={} {}/{} checksum={}",
            path,
            stat.size,
            stat.owner,
            stat.group,
            remote_checksum
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "<null>".to_string())
        );

        self.report.checked += 1;
        let local = fs_ops::local_path_for(&self.driver.local_root, path);
        match compare_local(path, stat, remote_checksum.as_ref(), &local, &self.driver.engine) {
            Comparison::Matched => self.report.matched += 1,
            Comparison::NoRemoteChecksum => self.report.unverified += 1,
            Comparison::Failed(discrepancy) => {
                self.sink.record(&discrepancy);
                self.report.discrepancies.push(discrepancy);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::DEFAULT_BLOCK_SIZE;
    use crate::remote::LocalDirFs;
    use crate::report::{DiscrepancyKind, VERIFY_PREFIX};
    use filetime::FileTime;

    struct Trees {
        _temp: tempfile::TempDir,
        remote: PathBuf,
        local: PathBuf,
    }

    fn trees() -> Trees {
        let temp = tempfile::tempdir().expect("Failed to create temp dir");
        let remote = temp.path().join("remote");
        let local = temp.path().join("local");
        fs::create_dir_all(&remote).expect("Failed to create dir");
        fs::create_dir_all(&local).expect("Failed to create dir");
        Trees {
            _temp: temp,
            remote,
            local,
        }
    }

    fn write_file(root: &Path, rel: &str, contents: &[u8], mtime: i64) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("Failed to create dirs");
        fs::write(&path, contents).expect("Failed to write file");
        filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0))
            .expect("Failed to set mtime");
    }

    fn options(max_date: i64) -> VerifyOptions {
        VerifyOptions {
            max_date,
            expected_block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    fn run_verify(
        remote: &LocalDirFs,
        local: &Path,
        source: &VerifySource,
        max_date: i64,
    ) -> (VerifyReport, String) {
        let filter = NameFilter::default();
        let engine = ChecksumEngine::default();
        let driver = VerifyDriver::new(remote, &filter, local, engine, options(max_date));
        let mut sink = DiscrepancySink::new(VERIFY_PREFIX, Vec::new());
        let report = driver.verify(source, &mut sink);
        (report, String::from_utf8(sink.into_inner()).expect("utf8"))
    }

    fn walk_data() -> VerifySource {
        VerifySource::Walk(RemotePath::new("/data"))
    }

    fn kinds(report: &VerifyReport) -> Vec<(String, DiscrepancyKind)> {
        report
            .discrepancies
            .iter()
            .map(|d| (d.path.to_string(), d.kind.clone()))
            .collect()
    }

    #[test]
    fn test_identical_trees_verify_clean() {
        let t = trees();
        for root in [&t.remote, &t.local] {
            write_file(root, "data/a", &[1u8; 700], 1000);
            write_file(root, "data/sub/b", b"hello", 1000);
        }
        let remote = LocalDirFs::new(&t.remote, DEFAULT_BLOCK_SIZE).expect("remote");

        let (report, output) = run_verify(&remote, &t.local, &walk_data(), i64::MAX);

        assert!(report.is_clean());
        assert_eq!(report.checked, 2);
        assert_eq!(report.matched, 2);
        assert!(output.is_empty());
    }

    #[test]
    fn test_every_discrepancy_is_reported_in_one_pass() {
        let t = trees();
        write_file(&t.remote, "data/missing", b"abc", 1000);
        write_file(&t.remote, "data/dir", b"abc", 1000);
        fs::create_dir_all(t.local.join("data/dir")).expect("Failed to create dir");
        write_file(&t.remote, "data/short", b"abcdef", 1000);
        write_file(&t.local, "data/short", b"abc", 1000);
        write_file(&t.remote, "data/changed", b"abcdef", 1000);
        write_file(&t.local, "data/changed", b"abcdeF", 1000);
        let remote = LocalDirFs::new(&t.remote, DEFAULT_BLOCK_SIZE).expect("remote");

        let (report, output) = run_verify(&remote, &t.local, &walk_data(), i64::MAX);

        let mut found = kinds(&report);
        found.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(found.len(), 4);
        assert!(matches!(found[0].1, DiscrepancyKind::ChecksumMismatch { .. }));
        assert_eq!(found[1].1, DiscrepancyKind::NotAFile);
        assert_eq!(found[2].1, DiscrepancyKind::Missing { remote_modified: 1000 });
        assert_eq!(found[3].1, DiscrepancyKind::LengthMismatch { remote: 6, local: 3 });
        assert_eq!(report.checked, 4);
        assert_eq!(report.matched, 0);
        assert_eq!(output.lines().count(), 4);
        assert!(output.lines().all(|l| l.starts_with("ERROR: ")));
    }

    #[test]
    fn test_too_new_files_are_skipped() {
        let t = trees();
        write_file(&t.remote, "data/old", b"x", 1000);
        write_file(&t.local, "data/old", b"x", 1000);
        write_file(&t.remote, "data/new", b"not backed up yet", 5000);
        let remote = LocalDirFs::new(&t.remote, DEFAULT_BLOCK_SIZE).expect("remote");

        let (report, _) = run_verify(&remote, &t.local, &walk_data(), 2000);

        assert!(report.is_clean());
        assert_eq!(report.skipped_too_new, 1);
        assert_eq!(report.matched, 1);
    }

    #[test]
    fn test_non_default_block_size_is_skipped() {
        let t = trees();
        write_file(&t.remote, "data/a", b"abc", 1000);
        let remote = LocalDirFs::new(&t.remote, 64 * 1024 * 1024).expect("remote");

        let (report, _) = run_verify(&remote, &t.local, &walk_data(), i64::MAX);

        assert_eq!(report.skipped_block_size, 1);
        assert_eq!(report.checked, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn test_explicit_list_visits_only_listed_paths() {
        let t = trees();
        write_file(&t.remote, "data/a", b"a", 1000);
        write_file(&t.remote, "data/b", b"b", 1000);
        write_file(&t.remote, "other/c", b"c", 1000);
        write_file(&t.local, "other/c", b"c", 1000);

        let list_file = t.local.join("paths.txt");
        fs::write(&list_file, "/data/a\n\n  /other  \n").expect("Failed to write list");
        let source = VerifySource::from_file(&list_file).expect("list");
        assert_eq!(source.roots(), &[RemotePath::new("/data/a"), RemotePath::new("/other")]);

        let remote = LocalDirFs::new(&t.remote, DEFAULT_BLOCK_SIZE).expect("remote");
        let (report, _) = run_verify(&remote, &t.local, &source, i64::MAX);

        assert_eq!(report.checked, 2);
        assert_eq!(report.matched, 1);
        let missing = DiscrepancyKind::Missing { remote_modified: 1000 };
        assert_eq!(kinds(&report), vec![("/data/a".to_string(), missing)]);
    }

    #[test]
    fn test_missing_list_file_is_a_config_error() {
        let t = trees();
        let result = VerifySource::from_file(&t.local.join("nope.txt"));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_missing_remote_root_is_counted_not_fatal() {
        let t = trees();
        write_file(&t.remote, "data/a", b"a", 1000);
        write_file(&t.local, "data/a", b"a", 1000);
        let remote = LocalDirFs::new(&t.remote, DEFAULT_BLOCK_SIZE).expect("remote");
        let source = VerifySource::List(vec![RemotePath::new("/gone"), RemotePath::new("/data")]);

        let (report, _) = run_verify(&remote, &t.local, &source, i64::MAX);

        assert_eq!(report.remote_errors, 1);
        assert_eq!(report.matched, 1);
    }
}
