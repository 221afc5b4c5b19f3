//! Error types for the backup engine.
//!
//! `RemoteError` covers failures of the remote filesystem client and
//! `EngineError` everything the engine itself can fail with. Whether an error
//! ends the run or only skips one path is not a property of the error but of
//! the phase it happened in; see [`classify`].
//!
//! Integrity findings (missing local copy, length or checksum mismatch) are not
//! errors at all. They are recorded as [`crate::report::Discrepancy`] values.

use crate::model::TimeWindow;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a remote filesystem client.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The path does not exist on the remote side
    #[error("remote path not found: {path}")]
    NotFound { path: String },

    /// Local I/O failed while serving a remote request (local-directory remote, copy target)
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Transport-level failure talking to the remote service
    #[error("request for {path} failed: {source}")]
    Http {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// The remote service answered with an exception
    #[error("remote exception for {path}: {exception}: {message}")]
    Exception {
        path: String,
        exception: String,
        message: String,
    },

    /// The response could not be understood
    #[error("malformed response for {path}: {reason}")]
    Protocol { path: String, reason: String },
}

/// Errors raised by the walker and drivers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Failed to read or write a local file
    #[error("local I/O error on {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The checksum engine was pointed at a directory
    #[error("cannot compute checksum, {} is a directory", path.display())]
    IsADirectory { path: PathBuf },

    /// Failed to create a directory
    #[error("failed to create directory {}: {source}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to move an existing local copy into the preserve area
    #[error("failed to move {} to {}: {source}", from.display(), to.display())]
    PreserveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Rejected configuration or argument value
    #[error("configuration error: {0}")]
    Config(String),

    /// A backup run stopped on a fatal error. `last_timestamp` is the
    /// modification time of the last file fully processed, if any.
    #[error("backup aborted: {cause}")]
    Aborted {
        last_timestamp: Option<i64>,
        #[source]
        cause: Box<EngineError>,
    },
}

/// Where in a run an error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Argument validation and loading of the ignore/no-preserve lists
    Startup,
    /// Enumerating the remote namespace
    Traversal,
    /// Comparing remote files against their local copies
    Verification,
    /// Sizing, preserving, copying a file already selected for backup
    Copy,
}

/// What the run does about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Log it, skip the path, continue with its siblings
    TransientPerPath,
    /// Stop the whole run, reporting the last safe resumption timestamp
    FatalRun,
    /// Reject before any work begins
    Configuration,
}

/// Decide how an error is handled in the given phase.
///
/// Traversal and verification tolerate per-path failures so one bad entry never
/// aborts a pass over the namespace. Once a file is selected for backup, any
/// failure to size, preserve or copy it ends the run, since continuing could lose
/// a preserved copy or leave a gap below the resumption watermark.
pub fn classify(phase: Phase, err: &EngineError) -> ErrorClass {
    match (phase, err) {
        (_, EngineError::Config(_)) => ErrorClass::Configuration,
        (Phase::Startup, _) => ErrorClass::Configuration,
        (_, EngineError::Aborted { .. }) => ErrorClass::FatalRun,
        (Phase::Copy, _) => ErrorClass::FatalRun,
        (Phase::Traversal | Phase::Verification, _) => ErrorClass::TransientPerPath,
    }
}

impl EngineError {
    /// Wrap `self` as the cause of an aborted backup run.
    pub fn abort(self, last_timestamp: Option<i64>) -> EngineError {
        match self {
            aborted @ EngineError::Aborted { .. } => aborted,
            cause => EngineError::Aborted {
                last_timestamp,
                cause: Box::new(cause),
            },
        }
    }

    /// Where the next run should start after this error aborted a backup of
    /// `window`: the last processed timestamp, or the window start if nothing
    /// was processed. `None` for any other error.
    pub fn resume_from(&self, window: &TimeWindow) -> Option<i64> {
        match self {
            EngineError::Aborted { last_timestamp, .. } => {
                Some(last_timestamp.unwrap_or(window.min))
            }
            _ => None,
        }
    }

    /// True if the underlying remote error says the path does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Remote(RemoteError::NotFound { .. }))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_not_found() -> EngineError {
        EngineError::Remote(RemoteError::NotFound {
            path: "/data/a".to_string(),
        })
    }

    #[test]
    fn test_same_error_is_transient_while_walking_and_fatal_while_copying() {
        let err = remote_not_found();
        assert_eq!(classify(Phase::Traversal, &err), ErrorClass::TransientPerPath);
        assert_eq!(classify(Phase::Verification, &err), ErrorClass::TransientPerPath);
        assert_eq!(classify(Phase::Copy, &err), ErrorClass::FatalRun);
    }

    #[test]
    fn test_config_errors_are_configuration_in_any_phase() {
        let err = EngineError::Config("bad date".to_string());
        assert_eq!(classify(Phase::Copy, &err), ErrorClass::Configuration);
        assert_eq!(classify(Phase::Traversal, &err), ErrorClass::Configuration);
    }

    #[test]
    fn test_abort_keeps_first_timestamp() {
        let aborted = remote_not_found().abort(Some(42)).abort(Some(99));
        match aborted {
            EngineError::Aborted { last_timestamp, cause } => {
                assert_eq!(last_timestamp, Some(42));
                assert!(cause.is_not_found());
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_abort_before_first_file_resumes_from_window_start() {
        let window = TimeWindow::new(500, 4000);
        assert_eq!(remote_not_found().abort(None).resume_from(&window), Some(500));
        assert_eq!(remote_not_found().abort(Some(1000)).resume_from(&window), Some(1000));
        assert_eq!(remote_not_found().resume_from(&window), None);
    }

    #[test]
    fn test_display_mentions_path() {
        let err = EngineError::PreserveFailed {
            from: PathBuf::from("/backup/a"),
            to: PathBuf::from("/preserve/a"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let text = err.to_string();
        assert!(text.contains("/backup/a"));
        assert!(text.contains("/preserve/a"));
    }
}
