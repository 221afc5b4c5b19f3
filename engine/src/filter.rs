//! Path-based exclusion rules.
//!
//! Decides from a remote path string alone whether a directory is pruned, a
//! file is skipped, or a file belongs to an ignored warehouse table.

use crate::error::{EngineError, Result};
use crate::model::RemotePath;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Root under which warehouse tables live.
pub const WAREHOUSE_ROOT: &str = "/user/hive/warehouse";

/// Ignored-table notices shown before going quiet.
pub const IGNORED_NOTICE_LIMIT: u64 = 5;

/// Lower-cased logical table names to leave out of backup and verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    tables: HashSet<String>,
}

impl IgnoreSet {
    /// Load one table name per line. Names are trimmed and lower-cased; blank lines are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!(
                "failed to read ignored tables from {}: {}",
                path.display(),
                e
            ))
        })?;
        let set = Self::from_lines(content.lines());
        tracing::info!(tables = set.len(), "will ignore {} tables", set.len());
        Ok(set)
    }

    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let tables = lines
            .into_iter()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .collect();
        IgnoreSet { tables }
    }

    /// Case-insensitive exact membership.
    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains(&table.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Substrings marking local files that are overwritten in place instead of preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoPreserveSet {
    substrings: Vec<String>,
}

impl NoPreserveSet {
    /// Load one substring per line, trimmed; blank lines are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!(
                "failed to read no-preserve substrings from {}: {}",
                path.display(),
                e
            ))
        })?;
        let set = Self::from_lines(content.lines());
        for s in &set.substrings {
            tracing::info!("will not preserve files with substring: {}", s);
        }
        Ok(set)
    }

    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let substrings = lines
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        NoPreserveSet { substrings }
    }

    /// True unless `path` contains one of the substrings.
    pub fn should_preserve(&self, path: &str) -> bool {
        !self.substrings.iter().any(|s| path.contains(s.as_str()))
    }
}

/// Exclusion rules for the remote namespace.
#[derive(Debug, Clone)]
pub struct NameFilter {
    excluded_dir_names: Vec<String>,
    excluded_dir_name_prefixes: Vec<String>,
    excluded_path_prefixes: Vec<String>,
    excluded_file_suffixes: Vec<String>,
    excluded_file_prefixes: Vec<String>,
    dated_table: Regex,
    bare_table: Regex,
    date_suffix: Regex,
    ignore: IgnoreSet,
}

impl Default for NameFilter {
    fn default() -> Self {
        NameFilter::new(IgnoreSet::default())
    }
}

impl NameFilter {
    /// Standard rules plus the given ignored tables.
    pub fn new(ignore: IgnoreSet) -> Self {
        let root = regex::escape(WAREHOUSE_ROOT);
        NameFilter {
            excluded_dir_names: vec![
                "dfstmp".to_string(),
                "tmp".to_string(),
                "jobtracker".to_string(),
                "ops".to_string(),
            ],
            excluded_dir_name_prefixes: vec!["_distcp_logs".to_string()],
            excluded_path_prefixes: vec!["/mapred".to_string()],
            excluded_file_suffixes: vec![".crc".to_string()],
            excluded_file_prefixes: vec!["/user/oozie/etl/workflows/".to_string()],
            dated_table: Regex::new(&format!(r"^{}/([^/]+)_20[0-9]{{6}}", root))
                .expect("static regex"),
            bare_table: Regex::new(&format!(r"^{}/([^/]+)/", root)).expect("static regex"),
            date_suffix: Regex::new(r"_[0-9]{8}$").expect("static regex"),
            ignore,
        }
    }

    /// Directories never descended into.
    pub fn is_excluded_directory(&self, path: &RemotePath) -> bool {
        let name = path.name();
        self.excluded_dir_names.iter().any(|n| n == name)
            || self
                .excluded_dir_name_prefixes
                .iter()
                .any(|p| name.starts_with(p.as_str()))
            || self
                .excluded_path_prefixes
                .iter()
                .any(|p| path.as_str().starts_with(p.as_str()))
    }

    /// Checksum side-car files and workflow logs, regardless of table rules.
    pub fn is_excluded_file(&self, path: &RemotePath) -> bool {
        self.excluded_file_suffixes
            .iter()
            .any(|s| path.name().ends_with(s.as_str()))
            || self
                .excluded_file_prefixes
                .iter()
                .any(|p| path.as_str().starts_with(p.as_str()))
    }

    /// Lower-cased warehouse table a path belongs to, if any.
    ///
    /// A `<name>_20YYMMDD` directory wins over a bare `<name>` directory.
    pub fn table_name_of(&self, path: &str) -> Option<String> {
        if !path.starts_with(WAREHOUSE_ROOT) {
            return None;
        }
        self.dated_table
            .captures(path)
            .or_else(|| self.bare_table.captures(path))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase())
    }

    pub fn is_ignored_table(&self, name: &str) -> bool {
        self.ignore.contains(name)
    }

    /// True if the file belongs to an ignored table, directly or through its
    /// date-partitioned family (`orders_20230101` is covered by `orders`).
    pub fn is_ignored_file(&self, path: &RemotePath) -> bool {
        if self.ignore.is_empty() {
            return false;
        }
        match self.table_name_of(path.as_str()) {
            Some(table) => {
                self.is_ignored_table(&table)
                    || self.is_ignored_table(&self.date_suffix.replace(&table, ""))
            }
            None => false,
        }
    }
}

/// What to log for one more ignored-table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoredNotice {
    /// Name the file
    Show,
    /// Say that further files will not be named
    Suppress,
    Silent,
}

/// Counts files skipped for ignored tables and throttles the per-file notices.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoredTableCounter {
    count: u64,
}

impl IgnoredTableCounter {
    pub fn record(&mut self) -> IgnoredNotice {
        self.count += 1;
        if self.count < IGNORED_NOTICE_LIMIT {
            IgnoredNotice::Show
        } else if self.count == IGNORED_NOTICE_LIMIT {
            IgnoredNotice::Suppress
        } else {
            IgnoredNotice::Silent
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_table_name_extraction() {
        let filter = NameFilter::default();
        assert_eq!(
            filter.table_name_of("/user/hive/warehouse/orders_20230101/part-00000"),
            Some("orders".to_string())
        );
        assert_eq!(
            filter.table_name_of("/user/hive/warehouse/orders/part-00000"),
            Some("orders".to_string())
        );
        assert_eq!(
            filter.table_name_of("/user/hive/warehouse/Orders/part-00000"),
            Some("orders".to_string())
        );
        assert_eq!(filter.table_name_of("/tmp/x"), None);
        assert_eq!(filter.table_name_of("/user/hive/warehouse/orders"), None);
    }

    #[test]
    fn test_ignore_set_is_case_insensitive() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("ignore.txt");
        let mut file = fs::File::create(&path).expect("Failed to create file");
        writeln!(file, "Orders\n\n  t_postalcodes  ").expect("Failed to write file");
        drop(file);

        let set = IgnoreSet::load(&path).expect("load");
        assert_eq!(set.len(), 2);

        let filter = NameFilter::new(set);
        assert!(filter.is_ignored_table("orders"));
        assert!(filter.is_ignored_table("ORDERS"));
        assert!(filter.is_ignored_table("t_postalcodes"));
        assert!(!filter.is_ignored_table("customers"));
    }

    #[test]
    fn test_missing_ignore_file_is_config_error() {
        let result = IgnoreSet::load(Path::new("/nonexistent/ignore.txt"));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_ignored_file_covers_dated_family() {
        let filter = NameFilter::new(IgnoreSet::from_lines(["clicks"]));
        assert!(filter.is_ignored_file(&RemotePath::new(
            "/user/hive/warehouse/clicks_20230101/part-0"
        )));
        assert!(filter.is_ignored_file(&RemotePath::new("/user/hive/warehouse/clicks/part-0")));
        assert!(!filter.is_ignored_file(&RemotePath::new("/user/hive/warehouse/views/part-0")));
        assert!(!filter.is_ignored_file(&RemotePath::new("/data/clicks/part-0")));
    }

    #[test]
    fn test_ignored_file_strips_date_from_bare_match() {
        // A nested dated directory falls through to the bare pattern.
        let filter = NameFilter::new(IgnoreSet::from_lines(["events"]));
        assert_eq!(
            filter.table_name_of("/user/hive/warehouse/events_19991231/x"),
            Some("events_19991231".to_string())
        );
        assert!(filter.is_ignored_file(&RemotePath::new("/user/hive/warehouse/events_19991231/x")));
    }

    #[test]
    fn test_excluded_directories() {
        let filter = NameFilter::default();
        let excluded = [
            "/data/tmp",
            "/dfstmp",
            "/a/jobtracker",
            "/ops",
            "/x/_distcp_logs_abc",
            "/mapred/system",
        ];
        for dir in excluded {
            assert!(filter.is_excluded_directory(&RemotePath::new(dir)), "{}", dir);
        }
        for dir in ["/data", "/data/tmpfiles", "/user/ops_team", "/"] {
            assert!(!filter.is_excluded_directory(&RemotePath::new(dir)), "{}", dir);
        }
    }

    #[test]
    fn test_excluded_files() {
        let filter = NameFilter::default();
        assert!(filter.is_excluded_file(&RemotePath::new("/data/.part-0.crc")));
        assert!(filter.is_excluded_file(&RemotePath::new("/user/oozie/etl/workflows/job/log")));
        assert!(!filter.is_excluded_file(&RemotePath::new("/data/part-0")));
    }

    #[test]
    fn test_no_preserve_substrings() {
        let set = NoPreserveSet::from_lines(["/scratch/", " .log "]);
        assert!(!set.should_preserve("/backup/scratch/a"));
        assert!(!set.should_preserve("/backup/app.log"));
        assert!(set.should_preserve("/backup/data/a"));
        assert!(NoPreserveSet::default().should_preserve("/anything"));
    }

    #[test]
    fn test_ignored_notice_threshold() {
        let mut counter = IgnoredTableCounter::default();
        let notices: Vec<_> = (0..7).map(|_| counter.record()).collect();
        assert_eq!(
            notices,
            vec![
                IgnoredNotice::Show,
                IgnoredNotice::Show,
                IgnoredNotice::Show,
                IgnoredNotice::Show,
                IgnoredNotice::Suppress,
                IgnoredNotice::Silent,
                IgnoredNotice::Silent,
            ]
        );
        assert_eq!(counter.count(), 7);
    }
}
