//! Run configuration for backup and verify.
//!
//! Both configs are plain data built by the CLI. `validate` and the loaders
//! run before any remote call so a bad argument never starts a partial run.

use crate::backup::BackupOptions;
use crate::checksums::{ChecksumEngine, DEFAULT_BLOCK_SIZE};
use crate::error::{EngineError, Result};
use crate::filter::{IgnoreSet, NameFilter, NoPreserveSet};
use crate::model::{RemotePath, TimeWindow};
use crate::verify::{VerifyOptions, VerifySource};
use chrono::{DateTime, Days, LocalResult, NaiveDateTime, NaiveTime, TimeZone};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DAY_SECS: i64 = 24 * 60 * 60;

/// Lower bound of the backup window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSelector {
    /// The whole previous local calendar day. Overrides any max date.
    Yesterday,
    /// 24 hours before the max date
    LastDay,
    /// 7 days before the max date
    LastWeek,
    /// Explicit epoch seconds, usually the watermark printed by the previous run
    Epoch(i64),
}

impl FromStr for DateSelector {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "yesterday" => Ok(DateSelector::Yesterday),
            "last-day" => Ok(DateSelector::LastDay),
            "last-week" => Ok(DateSelector::LastWeek),
            other => other.parse::<i64>().map(DateSelector::Epoch).map_err(|_| {
                EngineError::Config(format!(
                    "invalid date {:?}: expected yesterday, last-day, last-week or epoch seconds",
                    s
                ))
            }),
        }
    }
}

impl fmt::Display for DateSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateSelector::Yesterday => write!(f, "yesterday"),
            DateSelector::LastDay => write!(f, "last-day"),
            DateSelector::LastWeek => write!(f, "last-week"),
            DateSelector::Epoch(secs) => write!(f, "{}", secs),
        }
    }
}

fn local_epoch<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime, earliest: bool) -> Result<i64> {
    let resolved = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(first, second) => Some(if earliest { first } else { second }),
        LocalResult::None => None,
    };
    resolved
        .map(|dt| dt.timestamp())
        .ok_or_else(|| EngineError::Config(format!("local time {} does not exist", naive)))
}

impl TimeWindow {
    /// Resolve a date selector against `now`.
    ///
    /// The upper bound is `max_date`, or `now` when absent, except for
    /// `Yesterday`, which spans 00:00:00 to 23:59:59 of the previous local day.
    pub fn resolve<Tz: TimeZone>(
        selector: DateSelector,
        now: &DateTime<Tz>,
        max_date: Option<i64>,
    ) -> Result<TimeWindow> {
        let max = max_date.unwrap_or_else(|| now.timestamp());
        let window = match selector {
            DateSelector::Yesterday => {
                let day = now
                    .date_naive()
                    .checked_sub_days(Days::new(1))
                    .ok_or_else(|| EngineError::Config("no previous day".to_string()))?;
                let (start_of_day, end_of_day) = NaiveTime::from_hms_opt(0, 0, 0)
                    .zip(NaiveTime::from_hms_opt(23, 59, 59))
                    .ok_or_else(|| EngineError::Config("invalid time of day".to_string()))?;
                let tz = now.timezone();
                TimeWindow::new(
                    local_epoch(&tz, day.and_time(start_of_day), true)?,
                    local_epoch(&tz, day.and_time(end_of_day), false)?,
                )
            }
            DateSelector::LastDay => TimeWindow::new(max - DAY_SECS, max),
            DateSelector::LastWeek => TimeWindow::new(max - 7 * DAY_SECS, max),
            DateSelector::Epoch(min) => TimeWindow::new(min, max),
        };
        if window.min > window.max {
            return Err(EngineError::Config(format!(
                "min date {} is after max date {}",
                window.min, window.max
            )));
        }
        Ok(window)
    }
}

fn check_block_size(block_size: u64) -> Result<ChecksumEngine> {
    ChecksumEngine::with_block_size(block_size)
}

fn load_filter(ignore_tables_file: Option<&Path>) -> Result<NameFilter> {
    let ignore = match ignore_tables_file {
        Some(path) => IgnoreSet::load(path)?,
        None => IgnoreSet::default(),
    };
    Ok(NameFilter::new(ignore))
}

/// Everything a backup run needs.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub remote_root: RemotePath,
    pub local_root: PathBuf,
    pub preserve_root: PathBuf,
    pub ignore_tables_file: Option<PathBuf>,
    pub no_preserve_file: Option<PathBuf>,
    pub dry_run: bool,
    pub date: DateSelector,
    pub max_date: Option<i64>,
    pub sleep: Duration,
    /// 0 means unlimited
    pub max_bytes: u64,
    pub skip_unchanged: bool,
    pub block_size: u64,
    /// Where to write the permission-replay scripts, if anywhere
    pub scripts_dir: Option<PathBuf>,
}

impl BackupConfig {
    pub fn new(
        remote_root: RemotePath,
        local_root: PathBuf,
        preserve_root: PathBuf,
        date: DateSelector,
    ) -> Self {
        BackupConfig {
            remote_root,
            local_root,
            preserve_root,
            ignore_tables_file: None,
            no_preserve_file: None,
            dry_run: false,
            date,
            max_date: None,
            sleep: Duration::ZERO,
            max_bytes: 0,
            skip_unchanged: false,
            block_size: DEFAULT_BLOCK_SIZE,
            scripts_dir: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_root == self.preserve_root {
            return Err(EngineError::Config(format!(
                "local path and preserve path are both {}",
                self.local_root.display()
            )));
        }
        if let Some(dir) = &self.scripts_dir {
            if !dir.is_dir() {
                return Err(EngineError::Config(format!(
                    "scripts directory {} does not exist",
                    dir.display()
                )));
            }
        }
        check_block_size(self.block_size)?;
        Ok(())
    }

    pub fn window<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<TimeWindow> {
        TimeWindow::resolve(self.date, now, self.max_date)
    }

    pub fn name_filter(&self) -> Result<NameFilter> {
        load_filter(self.ignore_tables_file.as_deref())
    }

    pub fn no_preserve(&self) -> Result<NoPreserveSet> {
        match &self.no_preserve_file {
            Some(path) => NoPreserveSet::load(path),
            None => Ok(NoPreserveSet::default()),
        }
    }

    pub fn checksum_engine(&self) -> Result<ChecksumEngine> {
        check_block_size(self.block_size)
    }

    pub fn options(&self) -> BackupOptions {
        BackupOptions {
            dry_run: self.dry_run,
            sleep: self.sleep,
            skip_unchanged: self.skip_unchanged,
        }
    }
}

/// Everything a verify pass needs.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Tree to walk; exclusive with `from_file`
    pub remote_root: Option<RemotePath>,
    /// File listing remote paths, one per line
    pub from_file: Option<PathBuf>,
    pub local_root: PathBuf,
    pub ignore_tables_file: Option<PathBuf>,
    pub max_date: Option<i64>,
    pub block_size: u64,
}

impl VerifyConfig {
    pub fn validate(&self) -> Result<()> {
        match (&self.remote_root, &self.from_file) {
            (Some(_), Some(_)) => Err(EngineError::Config(
                "give either a remote path or a from-file, not both".to_string(),
            )),
            (None, None) => Err(EngineError::Config(
                "a remote path or a from-file is required".to_string(),
            )),
            _ => check_block_size(self.block_size).map(|_| ()),
        }
    }

    pub fn source(&self) -> Result<VerifySource> {
        self.validate()?;
        match (&self.remote_root, &self.from_file) {
            (Some(root), None) => Ok(VerifySource::Walk(root.clone())),
            (None, Some(path)) => VerifySource::from_file(path),
            _ => Err(EngineError::Config("no single verify source".to_string())),
        }
    }

    pub fn name_filter(&self) -> Result<NameFilter> {
        load_filter(self.ignore_tables_file.as_deref())
    }

    pub fn checksum_engine(&self) -> Result<ChecksumEngine> {
        check_block_size(self.block_size)
    }

    pub fn options(&self) -> VerifyOptions {
        VerifyOptions {
            max_date: self.max_date.unwrap_or(i64::MAX),
            expected_block_size: self.block_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn test_parse_date_selector() {
        assert_eq!("yesterday".parse::<DateSelector>().unwrap(), DateSelector::Yesterday);
        assert_eq!("last-day".parse::<DateSelector>().unwrap(), DateSelector::LastDay);
        assert_eq!("last-week".parse::<DateSelector>().unwrap(), DateSelector::LastWeek);
        assert_eq!(
            "1700000000".parse::<DateSelector>().unwrap(),
            DateSelector::Epoch(1_700_000_000)
        );
        assert!(matches!(
            "tomorrow".parse::<DateSelector>(),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_relative_windows_end_at_max_date() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let day = TimeWindow::resolve(DateSelector::LastDay, &now, None).unwrap();
        assert_eq!(day, TimeWindow::new(1_700_000_000 - 86_400, 1_700_000_000));

        let week = TimeWindow::resolve(DateSelector::LastWeek, &now, Some(1_000_000)).unwrap();
        assert_eq!(week, TimeWindow::new(1_000_000 - 604_800, 1_000_000));

        let epoch = TimeWindow::resolve(DateSelector::Epoch(5), &now, Some(10)).unwrap();
        assert_eq!(epoch, TimeWindow::new(5, 10));
    }

    #[test]
    fn test_yesterday_spans_previous_local_day() {
        // 2024-03-10 15:30:00 at UTC+02:00
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 3, 10, 15, 30, 0).unwrap();

        // max_date is overridden
        let window = TimeWindow::resolve(DateSelector::Yesterday, &now, Some(1)).unwrap();

        let start = tz.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap().timestamp();
        let end = tz.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap().timestamp();
        assert_eq!(window, TimeWindow::new(start, end));
        assert_eq!(window.max - window.min, 86_399);
    }

    #[test]
    fn test_yesterday_crosses_year_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let window = TimeWindow::resolve(DateSelector::Yesterday, &now, None).unwrap();
        assert_eq!(window.min, Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap().timestamp());
    }

    #[test]
    fn test_inverted_window_is_rejected() {
        let now = Utc.timestamp_opt(1_000, 0).unwrap();
        let result = TimeWindow::resolve(DateSelector::Epoch(2_000), &now, None);
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_backup_config_validation() {
        let mut config = BackupConfig::new(
            RemotePath::new("/data"),
            PathBuf::from("/backup"),
            PathBuf::from("/backup"),
            DateSelector::LastDay,
        );
        assert!(config.validate().is_err());

        config.preserve_root = PathBuf::from("/preserve");
        assert!(config.validate().is_ok());

        config.block_size = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_ignore_file_is_a_config_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut config = BackupConfig::new(
            RemotePath::new("/data"),
            temp_dir.path().join("l"),
            temp_dir.path().join("p"),
            DateSelector::LastDay,
        );
        config.ignore_tables_file = Some(temp_dir.path().join("missing.txt"));
        assert!(matches!(config.name_filter(), Err(EngineError::Config(_))));

        config.ignore_tables_file = None;
        config.no_preserve_file = Some(temp_dir.path().join("missing.txt"));
        assert!(matches!(config.no_preserve(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_verify_config_requires_exactly_one_source() {
        let mut config = VerifyConfig {
            remote_root: None,
            from_file: None,
            local_root: PathBuf::from("/backup"),
            ignore_tables_file: None,
            max_date: None,
            block_size: DEFAULT_BLOCK_SIZE,
        };
        assert!(config.source().is_err());

        config.remote_root = Some(RemotePath::new("/data"));
        assert_eq!(config.source().unwrap(), VerifySource::Walk(RemotePath::new("/data")));
        assert_eq!(config.options().max_date, i64::MAX);

        config.from_file = Some(PathBuf::from("/tmp/list"));
        assert!(config.source().is_err());
    }
}
