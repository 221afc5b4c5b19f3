//! # hdfs-backup engine
//!
//! Incremental backup of a remote block-oriented filesystem to a local tree,
//! and verification that the local tree still matches.
//!
//! ## Overview
//!
//! The engine is synchronous and single-threaded. It provides:
//! - A local reproduction of the remote composite checksum (MD5-of-MD5-of-CRC32),
//!   legacy padding included
//! - Path-based exclusion rules for system areas and ignored warehouse tables
//! - A depth-first walker that tolerates per-path remote failures
//! - A backup driver with a byte budget, preserve-before-overwrite and a
//!   resumption watermark
//! - A verify driver that reports every discrepancy in one pass
//!
//! ## Basic Usage
//!
//! ```no_run
//! use hdfs_backup_engine::{
//!     plan_backup, BackupDriver, BackupOptions, ByteBudget, ChecksumEngine, DiscrepancySink,
//!     LocalDirFs, NameFilter, NoPreserveSet, RemotePath, TimeWindow, BACKUP_PREFIX,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let remote = LocalDirFs::new("/mnt/export", hdfs_backup_engine::DEFAULT_BLOCK_SIZE)?;
//! let filter = NameFilter::default();
//!
//! // Collect everything modified in the window, oldest first
//! let window = TimeWindow::new(1_700_000_000, 1_700_086_400);
//! let root = RemotePath::new("/data");
//! let (candidates, _stats) = plan_backup(&remote, &filter, &root, window, &mut ());
//!
//! // Copy within a 10 GiB budget
//! let no_preserve = NoPreserveSet::default();
//! let driver = BackupDriver::new(
//!     &remote,
//!     "/backup",
//!     "/backup-preserved",
//!     &no_preserve,
//!     ChecksumEngine::default(),
//!     BackupOptions::default(),
//! );
//! let mut sink = DiscrepancySink::stdout(BACKUP_PREFIX);
//! let summary = driver.run(&candidates, ByteBudget::new(10 << 30), None, &mut sink)?;
//! println!("{}", summary.outcome.next_min_date(&window));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **checksums**: Composite checksum computation
//! - **filter**: Exclusion rules, ignored tables, no-preserve substrings
//! - **remote**: Remote filesystem trait and clients
//! - **walker**: Namespace traversal
//! - **scripts**: Permission-replay shell scripts
//! - **backup** / **verify**: The two drivers
//! - **report**: Integrity findings and their sink
//! - **progress**: Progress callback trait
//! - **config**: Run configuration and date windows
//! - **fs_ops**: Local filesystem operations
//! - **model** / **error**: Data model and error types

pub mod backup;
pub mod checksums;
pub mod config;
pub mod error;
pub mod filter;
pub mod fs_ops;
pub mod model;
pub mod progress;
pub mod remote;
pub mod report;
pub mod scripts;
pub mod verify;
pub mod walker;

// Re-export main types and functions
pub use backup::{plan_backup, BackupDriver, BackupOptions, BackupOutcome, BackupSummary};
pub use checksums::{
    ChecksumEngine, CompositeChecksum, DigestPadding, DEFAULT_BLOCK_SIZE, DEFAULT_BYTES_PER_CRC,
};
pub use config::{BackupConfig, DateSelector, VerifyConfig};
pub use error::{classify, EngineError, ErrorClass, Phase, RemoteError};
pub use filter::{IgnoreSet, NameFilter, NoPreserveSet};
pub use model::{ByteBudget, Candidate, CandidateList, RemoteEntryStat, RemotePath, TimeWindow};
pub use progress::{format_bytes, ProgressCallback, ProgressUpdate};
pub use remote::{LocalDirFs, RemoteFs, WebHdfs};
pub use report::{Discrepancy, DiscrepancyKind, DiscrepancySink, BACKUP_PREFIX, VERIFY_PREFIX};
pub use scripts::PermissionScripts;
pub use verify::{VerifyDriver, VerifyOptions, VerifyReport, VerifySource};
pub use walker::{WalkStats, WalkVisitor, Walker};
