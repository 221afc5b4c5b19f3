//! Integrity findings and where they are written.
//!
//! A [`Discrepancy`] is a value, not an error: neither backup nor verify stops
//! on one. Each finding is written to a [`DiscrepancySink`] as a single line
//! with a fixed prefix, separate from the tracing output, so tooling can grep
//! for integrity problems without any progress noise.

use crate::checksums::{ChecksumEngine, CompositeChecksum};
use crate::error::{EngineError, Result};
use crate::fs_ops::{self, LocalFile};
use crate::model::{RemoteEntryStat, RemotePath};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Line prefix for findings made right after a backup copy.
pub const BACKUP_PREFIX: &str = "CHECKSUM-ERROR";

/// Line prefix for findings made by a verify pass.
pub const VERIFY_PREFIX: &str = "ERROR";

/// Which comparison failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscrepancyKind {
    /// No local counterpart. Carries the remote modification time in seconds.
    Missing { remote_modified: i64 },
    NotAFile,
    LengthMismatch { remote: u64, local: u64 },
    ChecksumMismatch {
        remote: CompositeChecksum,
        local: CompositeChecksum,
    },
    /// The local checksum could not be computed; nothing was compared.
    LocalChecksumUnavailable { reason: String },
}

/// One integrity finding for one remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    pub path: RemotePath,
    pub local: PathBuf,
    pub kind: DiscrepancyKind,
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let local = self.local.display();
        match &self.kind {
            DiscrepancyKind::Missing { remote_modified } => write!(
                f,
                "file does not exist: {} (remote {} modified {})",
                local, self.path, remote_modified
            ),
            DiscrepancyKind::NotAFile => write!(f, "path is not a file: {}", local),
            DiscrepancyKind::LengthMismatch { remote, local: len } => write!(
                f,
                "length mismatch: {} local={} remote={}",
                local, len, remote
            ),
            DiscrepancyKind::ChecksumMismatch { remote, local: sum } => write!(
                f,
                "checksum mismatch: {} local={} remote={}",
                local, sum, remote
            ),
            DiscrepancyKind::LocalChecksumUnavailable { reason } => write!(
                f,
                "failed to get checksum for local file {}: {}",
                local, reason
            ),
        }
    }
}

/// Result of comparing one remote file against its local copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    Matched,
    /// Everything up to the length check agreed, but the remote side has no
    /// checksum for this file, so the content could not be compared.
    NoRemoteChecksum,
    Failed(Discrepancy),
}

/// Compare a remote file with the local file at `local`.
///
/// Checks run in a fixed order and stop at the first failure: existence, regular
/// file, byte length, checksum. A length mismatch is therefore reported even when
/// the checksums would happen to agree.
pub fn compare_local(
    path: &RemotePath,
    stat: &RemoteEntryStat,
    remote_checksum: Option<&CompositeChecksum>,
    local: &Path,
    engine: &ChecksumEngine,
) -> Comparison {
    let failed = |kind| {
        Comparison::Failed(Discrepancy {
            path: path.clone(),
            local: local.to_path_buf(),
            kind,
        })
    };

    let local_len = match fs_ops::probe(local) {
        Ok(LocalFile::Missing) => {
            return failed(DiscrepancyKind::Missing {
                remote_modified: stat.modified_secs(),
            })
        }
        Ok(LocalFile::NotAFile) => return failed(DiscrepancyKind::NotAFile),
        Ok(LocalFile::File { len, .. }) => len,
        Err(e) => {
            return failed(DiscrepancyKind::LocalChecksumUnavailable {
                reason: e.to_string(),
            })
        }
    };

    if local_len != stat.size {
        return failed(DiscrepancyKind::LengthMismatch {
            remote: stat.size,
            local: local_len,
        });
    }

    let Some(remote_checksum) = remote_checksum else {
        return Comparison::NoRemoteChecksum;
    };

    match engine.compute(local) {
        Ok(local_checksum) if local_checksum.matches(remote_checksum) => Comparison::Matched,
        Ok(local_checksum) => failed(DiscrepancyKind::ChecksumMismatch {
            remote: remote_checksum.clone(),
            local: local_checksum,
        }),
        Err(e) => failed(DiscrepancyKind::LocalChecksumUnavailable {
            reason: e.to_string(),
        }),
    }
}

/// Writes one prefixed line per discrepancy.
///
/// Write failures are logged once and then swallowed; a broken report stream
/// must not turn an integrity finding into a run failure.
pub struct DiscrepancySink<W: Write> {
    prefix: &'static str,
    out: W,
    written: u64,
    broken: bool,
}

impl DiscrepancySink<Box<dyn Write>> {
    pub fn stdout(prefix: &'static str) -> Self {
        DiscrepancySink::new(prefix, Box::new(io::stdout()))
    }

    /// Append findings to `path`, creating it if needed.
    pub fn append_to(prefix: &'static str, path: &Path) -> Result<Self> {
        let file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| EngineError::LocalIo {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(DiscrepancySink::new(prefix, Box::new(BufWriter::new(file))))
    }
}

impl<W: Write> DiscrepancySink<W> {
    pub fn new(prefix: &'static str, out: W) -> Self {
        DiscrepancySink {
            prefix,
            out,
            written: 0,
            broken: false,
        }
    }

    pub fn record(&mut self, discrepancy: &Discrepancy) {
        warn!(path = %discrepancy.path, "{}", discrepancy);
        self.written += 1;
        if self.broken {
            return;
        }
        let line = writeln!(self.out, "{}: {}", self.prefix, discrepancy)
            .and_then(|_| self.out.flush());
        if let Err(e) = line {
            error!("failed to write discrepancy report: {}", e);
            self.broken = true;
        }
    }

    /// Number of discrepancies recorded, whether or not the write succeeded.
    pub fn count(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
