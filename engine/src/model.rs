//! Core data model for backup and verify runs.
//!
//! This module defines the main data structures shared by the walker and drivers:
//! - RemotePath: identity of an entry in the remote namespace
//! - RemoteEntryStat: a metadata snapshot captured at enumeration time
//! - Candidate / CandidateList: files selected for backup, in walk order
//! - ByteBudget: optional ceiling on the bytes a single run may copy

use std::fmt;

/// An absolute, slash-delimited path in the remote namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePath(String);

impl RemotePath {
    /// Build a remote path, adding the leading slash and dropping a trailing one.
    pub fn new(path: impl AsRef<str>) -> Self {
        let trimmed = path.as_ref().trim();
        let mut normalized = String::with_capacity(trimmed.len() + 1);
        if !trimmed.starts_with('/') {
            normalized.push('/');
        }
        normalized.push_str(trimmed);
        while normalized.len() > 1 && normalized.ends_with('/') {
            normalized.pop();
        }
        RemotePath(normalized)
    }

    /// The root of the remote namespace.
    pub fn root() -> Self {
        RemotePath("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Final path segment (empty for the root).
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Append a single child segment.
    pub fn join(&self, child: &str) -> Self {
        let child = child.trim_matches('/');
        if self.is_root() {
            RemotePath(format!("/{}", child))
        } else {
            RemotePath(format!("{}/{}", self.0, child))
        }
    }

    /// Path segments below the root, in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemotePath {
    fn from(s: &str) -> Self {
        RemotePath::new(s)
    }
}

/// Snapshot of a remote entry's metadata.
///
/// Captured at enumeration time and possibly stale by the time the entry is
/// copied; nothing locks the remote namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntryStat {
    /// Length in bytes (0 for directories)
    pub size: u64,
    pub owner: String,
    pub group: String,
    /// Permission bits, e.g. 0o755
    pub permission: u16,
    /// Modification time in milliseconds since the epoch
    pub modification_time_ms: i64,
    /// Block size the remote filesystem used for this file
    pub block_size: u64,
    pub is_dir: bool,
}

impl RemoteEntryStat {
    /// Modification time truncated to whole seconds since the epoch.
    pub fn modified_secs(&self) -> i64 {
        self.modification_time_ms.div_euclid(1000)
    }

    /// Permission bits rendered the way `chmod` expects them.
    pub fn permission_octal(&self) -> String {
        format!("{:o}", self.permission)
    }

    /// Render as `rwxr-xr-x` style for log lines.
    pub fn permission_symbolic(&self) -> String {
        const FLAGS: [char; 3] = ['r', 'w', 'x'];
        let mut out = String::with_capacity(9);
        for shift in (0..9).rev() {
            if self.permission & (1 << shift) != 0 {
                out.push(FLAGS[(8 - shift) % 3]);
            } else {
                out.push('-');
            }
        }
        out
    }
}

/// A remote directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub path: RemotePath,
    pub stat: RemoteEntryStat,
}

/// A file selected for backup, with its modification time in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: RemotePath,
    pub modified: i64,
}

/// Files collected during one walk, in insertion order until sorted.
///
/// Every element passed the name filter and time window when inserted.
#[derive(Debug, Clone, Default)]
pub struct CandidateList {
    items: Vec<Candidate>,
    /// Sum of the sizes of all inserted candidates, as seen during the walk
    pub total_bytes: u64,
}

impl CandidateList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: RemotePath, modified: i64, size: u64) {
        self.items.push(Candidate { path, modified });
        self.total_bytes += size;
    }

    /// Order ascending by modification time. Ties keep no particular order.
    pub fn sort_by_modified(&mut self) {
        self.items.sort_unstable_by_key(|c| c.modified);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.items.iter()
    }
}

impl<'a> IntoIterator for &'a CandidateList {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Running byte total against an optional ceiling. A ceiling of 0 means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteBudget {
    pub ceiling: u64,
    pub used: u64,
}

impl ByteBudget {
    pub fn new(ceiling: u64) -> Self {
        ByteBudget { ceiling, used: 0 }
    }

    pub fn unlimited() -> Self {
        ByteBudget::new(0)
    }

    pub fn is_unlimited(&self) -> bool {
        self.ceiling == 0
    }

    /// Account `bytes`; returns false once the running total exceeds the ceiling.
    pub fn charge(&mut self, bytes: u64) -> bool {
        self.used = self.used.saturating_add(bytes);
        self.is_unlimited() || self.used <= self.ceiling
    }
}

/// Inclusive `[min, max]` window of modification times, in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub min: i64,
    pub max: i64,
}

impl TimeWindow {
    pub fn new(min: i64, max: i64) -> Self {
        TimeWindow { min, max }
    }

    /// Window with only an upper bound.
    pub fn up_to(max: i64) -> Self {
        TimeWindow { min: i64::MIN, max }
    }

    pub fn contains(&self, secs: i64) -> bool {
        secs >= self.min && secs <= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_path_normalization() {
        assert_eq!(RemotePath::new("data/a").as_str(), "/data/a");
        assert_eq!(RemotePath::new("/data/a/").as_str(), "/data/a");
        assert_eq!(RemotePath::new("/").as_str(), "/");
        assert!(RemotePath::new("").is_root());
    }

    #[test]
    fn test_remote_path_join_and_name() {
        let root = RemotePath::root();
        let data = root.join("data");
        assert_eq!(data.as_str(), "/data");
        assert_eq!(data.join("a").as_str(), "/data/a");
        assert_eq!(data.join("a").name(), "a");
        assert_eq!(root.name(), "");
        assert_eq!(data.join("a").segments().collect::<Vec<_>>(), vec!["data", "a"]);
    }

    #[test]
    fn test_modified_secs_truncates() {
        let stat = RemoteEntryStat {
            size: 0,
            owner: "hdfs".into(),
            group: "hadoop".into(),
            permission: 0o755,
            modification_time_ms: 1_700_000_000_999,
            block_size: 0,
            is_dir: true,
        };
        assert_eq!(stat.modified_secs(), 1_700_000_000);
        assert_eq!(stat.permission_octal(), "755");
        assert_eq!(stat.permission_symbolic(), "rwxr-xr-x");
    }

    #[test]
    fn test_candidate_list_sorts_by_time() {
        let mut list = CandidateList::new();
        list.push(RemotePath::new("/c"), 30, 1);
        list.push(RemotePath::new("/a"), 10, 2);
        list.push(RemotePath::new("/b"), 20, 3);
        list.sort_by_modified();

        let order: Vec<_> = list.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(order, vec!["/a", "/b", "/c"]);
        assert_eq!(list.total_bytes, 6);
    }

    #[test]
    fn test_byte_budget() {
        let mut unlimited = ByteBudget::unlimited();
        assert!(unlimited.charge(u64::MAX));

        let mut budget = ByteBudget::new(100);
        assert!(budget.charge(60));
        assert!(budget.charge(40));
        assert!(!budget.charge(1));
    }

    #[test]
    fn test_time_window_is_inclusive() {
        let window = TimeWindow::new(10, 20);
        assert!(window.contains(10));
        assert!(window.contains(20));
        assert!(!window.contains(9));
        assert!(!window.contains(21));
        assert!(TimeWindow::up_to(5).contains(i64::MIN));
    }
}
