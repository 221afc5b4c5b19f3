//! Depth-first traversal of the remote namespace.
//!
//! Every visited path costs one `stat`, every visited directory one `list`.
//! Children are visited in the order the remote side lists them; the backup
//! driver sorts the collected candidates once, after the walk.
//!
//! A remote failure on one path is logged and that path (or subtree) skipped.
//! The walk always continues with the siblings.

use crate::error::{classify, EngineError, Phase};
use crate::filter::{IgnoredNotice, IgnoredTableCounter, NameFilter};
use crate::model::{CandidateList, RemoteEntryStat, RemotePath, TimeWindow};
use crate::remote::RemoteFs;
use tracing::{debug, info, warn};

/// Receives every directory and file that survives the name filter.
pub trait WalkVisitor {
    fn on_directory(&mut self, _path: &RemotePath, _stat: &RemoteEntryStat) {}

    fn on_file(&mut self, _path: &RemotePath, _stat: &RemoteEntryStat) {}
}

impl WalkVisitor for () {}

/// Counters for one traversal.
#[derive(Debug, Clone, Default)]
pub struct WalkStats {
    pub directories: u64,
    pub pruned_directories: u64,
    pub files: u64,
    pub excluded_files: u64,
    pub ignored_tables: IgnoredTableCounter,
    pub outside_window: u64,
    pub errors: u64,
}

/// Walks one remote namespace with one set of exclusion rules.
pub struct Walker<'a, R: RemoteFs + ?Sized> {
    remote: &'a R,
    filter: &'a NameFilter,
    stats: WalkStats,
}

/// Applies the time window and collects candidates, passing everything on.
struct Collector<'v> {
    window: TimeWindow,
    candidates: CandidateList,
    outside_window: u64,
    inner: &'v mut dyn WalkVisitor,
}

impl WalkVisitor for Collector<'_> {
    fn on_directory(&mut self, path: &RemotePath, stat: &RemoteEntryStat) {
        self.inner.on_directory(path, stat);
    }

    fn on_file(&mut self, path: &RemotePath, stat: &RemoteEntryStat) {
        self.inner.on_file(path, stat);

        let modified = stat.modified_secs();
        if !self.window.contains(modified) {
            self.outside_window += 1;
            return;
        }
        self.candidates.push(path.clone(), modified, stat.size);
    }
}

impl<'a, R: RemoteFs + ?Sized> Walker<'a, R> {
    pub fn new(remote: &'a R, filter: &'a NameFilter) -> Self {
        Walker {
            remote,
            filter,
            stats: WalkStats::default(),
        }
    }

    pub fn stats(&self) -> &WalkStats {
        &self.stats
    }

    /// Collect every retained file under `root` whose modification time is in
    /// `window`. `visitor` sees retained entries before the window is applied.
    ///
    /// The returned list is in walk order; sort it before handing it to the
    /// backup driver.
    pub fn walk(
        &mut self,
        root: &RemotePath,
        window: TimeWindow,
        visitor: &mut dyn WalkVisitor,
    ) -> CandidateList {
        info!("Searching filesystem: {}", root);
        let mut collector = Collector {
            window,
            candidates: CandidateList::new(),
            outside_window: 0,
            inner: visitor,
        };
        self.visit(root, &mut collector);
        self.stats.outside_window += collector.outside_window;
        collector.candidates
    }

    /// Visit `root` and everything below it, without any time filtering.
    pub fn traverse(&mut self, root: &RemotePath, visitor: &mut dyn WalkVisitor) {
        self.visit(root, visitor);
    }

    fn visit(&mut self, path: &RemotePath, visitor: &mut dyn WalkVisitor) {
        let stat = match self.remote.stat(path) {
            Ok(stat) => stat,
            Err(e) => return self.skip_on_error(path, e.into()),
        };
        if stat.is_dir {
            self.visit_directory(path, &stat, visitor);
        } else {
            self.visit_file(path, &stat, visitor);
        }
    }

    fn visit_directory(
        &mut self,
        path: &RemotePath,
        stat: &RemoteEntryStat,
        visitor: &mut dyn WalkVisitor,
    ) {
        if self.filter.is_excluded_directory(path) {
            debug!(path = %path, "pruning excluded directory");
            self.stats.pruned_directories += 1;
            return;
        }
        self.stats.directories += 1;
        visitor.on_directory(path, stat);

        let children = match self.remote.list(path) {
            Ok(children) => children,
            Err(e) => return self.skip_on_error(path, e.into()),
        };
        for child in children {
            self.visit(&child.path, visitor);
        }
    }

    fn visit_file(
        &mut self,
        path: &RemotePath,
        stat: &RemoteEntryStat,
        visitor: &mut dyn WalkVisitor,
    ) {
        if self.filter.is_excluded_file(path) {
            self.stats.excluded_files += 1;
            return;
        }
        if self.filter.is_ignored_file(path) {
            match self.stats.ignored_tables.record() {
                IgnoredNotice::Show => info!("Skipping ignore-table file: {}", path),
                IgnoredNotice::Suppress => info!("(...not showing other skipped tables...)"),
                IgnoredNotice::Silent => {}
            }
            return;
        }
        self.stats.files += 1;
        visitor.on_file(path, stat);
    }

    fn skip_on_error(&mut self, path: &RemotePath, err: EngineError) {
        let class = classify(Phase::Traversal, &err);
        warn!(path = %path, ?class, "could not open {}: {}", path, err);
        self.stats.errors += 1;
    }
}
