//! A remote namespace served from a local directory tree.
//!
//! Used for mounted or staged exports of the remote filesystem, and by tests.
//! Checksums are computed locally with the same engine used for backups, so a
//! faithful copy always matches.

use super::{stage_copy, RemoteFs};
use crate::checksums::{ChecksumEngine, CompositeChecksum};
use crate::error::{RemoteError, Result};
use crate::model::{RemoteEntry, RemoteEntryStat, RemotePath};
use std::fs;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct LocalDirFs {
    root: PathBuf,
    block_size: u64,
    engine: ChecksumEngine,
}

impl LocalDirFs {
    /// Serve `root` as `/`, reporting `block_size` for every file.
    pub fn new(root: impl Into<PathBuf>, block_size: u64) -> Result<Self> {
        Ok(LocalDirFs {
            root: root.into(),
            block_size,
            engine: ChecksumEngine::with_block_size(block_size)?,
        })
    }

    /// Where a remote path lives on disk.
    pub fn local_path(&self, path: &RemotePath) -> PathBuf {
        let mut local = self.root.clone();
        for segment in path.segments() {
            local.push(segment);
        }
        local
    }

    fn io_error(path: &RemotePath, source: io::Error) -> RemoteError {
        if source.kind() == io::ErrorKind::NotFound {
            RemoteError::NotFound {
                path: path.to_string(),
            }
        } else {
            RemoteError::Io {
                path: path.to_string(),
                source,
            }
        }
    }

    fn stat_from_metadata(&self, metadata: &fs::Metadata) -> RemoteEntryStat {
        let modification_time_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let (owner, group, permission) = ownership(metadata);

        RemoteEntryStat {
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            owner,
            group,
            permission,
            modification_time_ms,
            block_size: if metadata.is_dir() { 0 } else { self.block_size },
            is_dir: metadata.is_dir(),
        }
    }
}

#[cfg(unix)]
fn ownership(metadata: &fs::Metadata) -> (String, String, u16) {
    use std::os::unix::fs::MetadataExt;
    (
        metadata.uid().to_string(),
        metadata.gid().to_string(),
        (metadata.mode() & 0o7777) as u16,
    )
}

#[cfg(not(unix))]
fn ownership(metadata: &fs::Metadata) -> (String, String, u16) {
    let permission = if metadata.is_dir() {
        0o755
    } else if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    };
    ("unknown".to_string(), "unknown".to_string(), permission)
}

impl RemoteFs for LocalDirFs {
    fn stat(&self, path: &RemotePath) -> std::result::Result<RemoteEntryStat, RemoteError> {
        let metadata = fs::metadata(self.local_path(path)).map_err(|e| Self::io_error(path, e))?;
        Ok(self.stat_from_metadata(&metadata))
    }

    fn list(&self, path: &RemotePath) -> std::result::Result<Vec<RemoteEntry>, RemoteError> {
        let entries = fs::read_dir(self.local_path(path)).map_err(|e| Self::io_error(path, e))?;

        let mut listing = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Self::io_error(path, e))?;
            let child = path.join(&entry.file_name().to_string_lossy());
            // A child that cannot be followed (dangling symlink) is listed by its
            // own metadata; the walker's stat of it then fails for that path only.
            let metadata = match fs::metadata(entry.path())
                .or_else(|_| fs::symlink_metadata(entry.path()))
            {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(path = %child, "skipping unreadable entry: {}", e);
                    continue;
                }
            };
            listing.push(RemoteEntry {
                stat: self.stat_from_metadata(&metadata),
                path: child,
            });
        }
        Ok(listing)
    }

    fn checksum(
        &self,
        path: &RemotePath,
    ) -> std::result::Result<Option<CompositeChecksum>, RemoteError> {
        let local = self.local_path(path);
        let metadata = fs::metadata(&local).map_err(|e| Self::io_error(path, e))?;
        if metadata.is_dir() {
            return Err(RemoteError::Exception {
                path: path.to_string(),
                exception: "FileNotFoundException".to_string(),
                message: "Path is not a file".to_string(),
            });
        }
        let file = fs::File::open(&local).map_err(|e| Self::io_error(path, e))?;
        let checksum = self
            .engine
            .compute_reader(BufReader::new(file), metadata.len())
            .map_err(|e| Self::io_error(path, e))?;
        Ok(Some(checksum))
    }

    fn copy_to_local(
        &self,
        path: &RemotePath,
        local: &Path,
    ) -> std::result::Result<(), RemoteError> {
        let mut source =
            fs::File::open(self.local_path(path)).map_err(|e| Self::io_error(path, e))?;
        stage_copy(local, |staged| {
            io::copy(&mut source, staged)
                .map(|_| ())
                .map_err(|e| Self::io_error(path, e))
        })
    }
}
