//! Local filesystem operations.
//!
//! This module provides the local side of a backup:
//! - Mapping remote paths under a local root
//! - Probing what currently sits at a mapped path
//! - Moving a displaced copy into the preserve area
//! - Stamping copied files with the remote modification time

use crate::error::{EngineError, Result};
use crate::model::RemotePath;
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Mirror a remote path under `root`: `/data/a` maps to `<root>/data/a`.
pub fn local_path_for(root: &Path, remote: &RemotePath) -> PathBuf {
    let mut local = root.to_path_buf();
    for segment in remote.segments() {
        local.push(segment);
    }
    local
}

/// What currently exists at a local path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalFile {
    Missing,
    /// Something other than a regular file (directory, socket, ...)
    NotAFile,
    File { len: u64, modified_secs: i64 },
}

/// Inspect `path` without following it into a directory listing.
pub fn probe(path: &Path) -> Result<LocalFile> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => {
            let modified_secs = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            Ok(LocalFile::File {
                len: metadata.len(),
                modified_secs,
            })
        }
        Ok(_) => Ok(LocalFile::NotAFile),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(LocalFile::Missing),
        Err(e) => Err(EngineError::LocalIo {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Move an existing local file to `target`, creating its parent directories.
///
/// Either failure is fatal to a backup run: the displaced bytes must never be
/// silently lost.
pub fn preserve_existing(existing: &Path, target: &Path) -> Result<()> {
    ensure_parent_dir_exists(target)?;
    fs::rename(existing, target).map_err(|e| EngineError::PreserveFailed {
        from: existing.to_path_buf(),
        to: target.to_path_buf(),
        source: e,
    })
}

/// Set a local file's modification time from remote epoch milliseconds.
pub fn set_modified(path: &Path, modification_time_ms: i64) -> Result<()> {
    let secs = modification_time_ms.div_euclid(1000);
    let nanos = (modification_time_ms.rem_euclid(1000) * 1_000_000) as u32;
    filetime::set_file_mtime(path, FileTime::from_unix_time(secs, nanos)).map_err(|e| {
        EngineError::LocalIo {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Errors
/// Returns EngineError if the parent exists but is not a directory, or if
/// directory creation fails
pub fn ensure_parent_dir_exists(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => return Ok(()),
    };

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Parent path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(parent).map_err(|e| EngineError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_path_for() {
        let root = Path::new("/backup");
        assert_eq!(
            local_path_for(root, &RemotePath::new("/data/a")),
            PathBuf::from("/backup/data/a")
        );
        assert_eq!(local_path_for(root, &RemotePath::root()), PathBuf::from("/backup"));
    }

    #[test]
    fn test_probe() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = temp_dir.path().join("f");
        fs::write(&file, b"abc").expect("Failed to write file");
        set_modified(&file, 1_600_000_000_500).expect("Failed to set mtime");

        assert_eq!(
            probe(&file).expect("probe"),
            LocalFile::File {
                len: 3,
                modified_secs: 1_600_000_000
            }
        );
        assert_eq!(probe(temp_dir.path()).expect("probe"), LocalFile::NotAFile);
        assert_eq!(probe(&temp_dir.path().join("nope")).expect("probe"), LocalFile::Missing);
    }

    #[test]
    fn test_preserve_existing_moves_bytes() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let existing = temp_dir.path().join("backup").join("a");
        fs::create_dir_all(existing.parent().unwrap()).expect("Failed to create dir");
        fs::write(&existing, b"old bytes").expect("Failed to write file");
        let target = temp_dir.path().join("preserve").join("data").join("a");

        preserve_existing(&existing, &target).expect("preserve");

        assert!(!existing.exists());
        assert_eq!(fs::read(&target).expect("read"), b"old bytes");
    }

    #[test]
    fn test_preserve_fails_when_parent_is_a_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let existing = temp_dir.path().join("a");
        fs::write(&existing, b"x").expect("Failed to write file");
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"x").expect("Failed to write file");

        let result = preserve_existing(&existing, &blocker.join("a"));
        assert!(matches!(result, Err(EngineError::DirectoryCreationFailed { .. })));
        assert!(existing.exists());
    }

    #[test]
    fn test_ensure_parent_dir_exists() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("subdir").join("file.txt");

        ensure_parent_dir_exists(&path).expect("Failed to create parent");

        assert!(path.parent().unwrap().exists());
    }
}
