//! Remote filesystem client interface.
//!
//! The walker and drivers only talk to the remote namespace through
//! [`RemoteFs`]. Two clients are provided:
//! - [`LocalDirFs`]: a namespace rooted at a local directory
//! - [`WebHdfs`]: the WebHDFS REST API over blocking HTTP

mod local;
mod webhdfs;

pub use local::LocalDirFs;
pub use webhdfs::WebHdfs;

use crate::checksums::CompositeChecksum;
use crate::error::RemoteError;
use crate::model::{RemoteEntry, RemoteEntryStat, RemotePath};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tempfile::NamedTempFile;

/// Blocking operations the engine needs from a remote filesystem.
pub trait RemoteFs {
    /// Metadata for a file or directory.
    fn stat(&self, path: &RemotePath) -> Result<RemoteEntryStat, RemoteError>;

    /// Children of a directory, in whatever order the remote side returns them.
    fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Server-computed composite checksum. `None` means the remote side has none.
    fn checksum(&self, path: &RemotePath) -> Result<Option<CompositeChecksum>, RemoteError>;

    /// Copy a remote file to `local`, replacing whatever is there.
    fn copy_to_local(&self, path: &RemotePath, local: &Path) -> Result<(), RemoteError>;
}

impl<T: RemoteFs + ?Sized> RemoteFs for &T {
    fn stat(&self, path: &RemotePath) -> Result<RemoteEntryStat, RemoteError> {
        (**self).stat(path)
    }

    fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>, RemoteError> {
        (**self).list(path)
    }

    fn checksum(&self, path: &RemotePath) -> Result<Option<CompositeChecksum>, RemoteError> {
        (**self).checksum(path)
    }

    fn copy_to_local(&self, path: &RemotePath, local: &Path) -> Result<(), RemoteError> {
        (**self).copy_to_local(path, local)
    }
}

impl<T: RemoteFs + ?Sized> RemoteFs for Box<T> {
    fn stat(&self, path: &RemotePath) -> Result<RemoteEntryStat, RemoteError> {
        (**self).stat(path)
    }

    fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>, RemoteError> {
        (**self).list(path)
    }

    fn checksum(&self, path: &RemotePath) -> Result<Option<CompositeChecksum>, RemoteError> {
        (**self).checksum(path)
    }

    fn copy_to_local(&self, path: &RemotePath, local: &Path) -> Result<(), RemoteError> {
        (**self).copy_to_local(path, local)
    }
}

/// Run `write` against a temporary file beside `local`, then move it into place.
///
/// Nothing appears at `local` unless `write` succeeds, so an interrupted copy
/// never leaves a truncated file behind for the next run to preserve.
pub(crate) fn stage_copy<F>(local: &Path, write: F) -> Result<(), RemoteError>
where
    F: FnOnce(&mut File) -> Result<(), RemoteError>,
{
    let target_error = |source: io::Error| RemoteError::Io {
        path: local.display().to_string(),
        source,
    };
    let parent = match local.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(target_error)?;

    let mut staged = NamedTempFile::new_in(parent).map_err(target_error)?;
    write(staged.as_file_mut())?;
    staged.persist(local).map_err(|e| target_error(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_stage_copy_moves_complete_file_into_place() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("out").join("a");

        stage_copy(&target, |file| {
            io::Write::write_all(file, b"complete").map_err(|source| RemoteError::Io {
                path: "/a".to_string(),
                source,
            })
        })
        .expect("copy");

        assert_eq!(fs::read(&target).expect("read"), b"complete");
        assert_eq!(entries(&temp_dir.path().join("out")), vec!["a".to_string()]);
    }

    #[test]
    fn test_failed_stage_copy_leaves_nothing_at_target() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("a");

        let result = stage_copy(&target, |file| {
            io::Write::write_all(file, b"partial").map_err(|source| RemoteError::Io {
                path: "/a".to_string(),
                source,
            })?;
            Err(RemoteError::Protocol {
                path: "/a".to_string(),
                reason: "connection reset mid-stream".to_string(),
            })
        });

        assert!(matches!(result, Err(RemoteError::Protocol { .. })));
        assert!(!target.exists());
        assert!(entries(temp_dir.path()).is_empty());
    }
}
