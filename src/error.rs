//! Error types for the backup/restore engine
//!
//! This module defines the error taxonomy shared by every orchestrator using
//! thiserror. Kinds are explicit values so callers can tell rollback-triggering
//! failures apart from best-effort warnings without inspecting messages.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::oplog::OperationLog;
use crate::rollback::RollbackReport;

/// The main error type for engine operations
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Precondition failed before any mutation took place
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// A directory could not be cleared because files stayed locked
    #[error("Target locked after {attempts} attempt(s): {}", path.display())]
    TargetLocked { path: PathBuf, attempts: u32 },

    /// The external mirroring tool exited unsuccessfully or overran its deadline
    #[error("External tool '{tool}' failed: {reason}")]
    ExternalToolFailed { tool: String, reason: String },

    /// The item-by-item copy could not salvage anything
    #[error("Copy failed: {0}")]
    CopyFailed(String),

    /// Restored data did not pass the post-copy check
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// A remote command exited non-zero and failures were not allowed
    #[error("Remote command failed ({context}): exit {status}: {stderr}")]
    RemoteCommandFailed {
        context: String,
        status: i32,
        stderr: String,
    },

    /// The whole operation exceeded its wall-clock budget
    #[error("Operation timed out after {}s", budget.as_secs())]
    OperationTimedOut { budget: Duration },

    /// Another operation is already running on this engine
    #[error("Another backup or restore operation is already in progress")]
    Busy,

    /// Starting, stopping or querying the managed service failed
    #[error("Service control error: {0}")]
    ServiceControl(String),

    /// Secure transport errors (connect, upload)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Archive packaging errors
    #[error("Archive error: {0}")]
    Archive(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),
}

impl EngineError {
    /// Create a "target locked" error for a path
    pub fn target_locked(path: &Path, attempts: u32) -> Self {
        Self::TargetLocked {
            path: path.to_path_buf(),
            attempts,
        }
    }

    /// Create an external tool failure
    pub fn tool_failed(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExternalToolFailed {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Check if this is a validation error (raised with zero side effects)
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::ValidationFailed(_))
    }

    /// Check if this error is a timeout of the whole operation
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::OperationTimedOut { .. })
    }

    /// Check if this error should send a copy down the fallback path
    /// instead of failing the operation
    pub fn triggers_fallback(&self) -> bool {
        matches!(self, Self::ExternalToolFailed { .. })
    }

    /// Check if this error aborts the operation on its own
    ///
    /// A failed mirroring tool is recovered by the fallback copy, so it is
    /// the only kind that is not fatal by itself.
    pub fn is_fatal(&self) -> bool {
        !self.triggers_fallback()
    }

    /// Check if this error is transient resource contention
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TargetLocked { .. })
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<zip::result::ZipError> for EngineError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

impl From<walkdir::Error> for EngineError {
    fn from(err: walkdir::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// A failed operation as surfaced to the caller
///
/// Carries the original failure together with everything the caller needs
/// for manual recovery: the rollback outcome (if rollback ran), where the
/// safety snapshot lives (if one was kept), and the full operation log.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct OperationFailure {
    /// The failure that aborted the operation
    #[source]
    pub error: EngineError,
    /// Outcome of the automatic rollback, if one ran
    pub rollback: Option<RollbackReport>,
    /// Safety snapshot left on disk for manual recovery
    pub snapshot: Option<PathBuf>,
    /// Everything logged during the operation
    pub log: OperationLog,
}

impl OperationFailure {
    /// Wrap an error that happened before anything was mutated
    pub fn without_rollback(error: EngineError, log: OperationLog) -> Self {
        Self {
            error,
            rollback: None,
            snapshot: None,
            log,
        }
    }

    /// Check whether the filesystem was fully reverted
    pub fn fully_reverted(&self) -> bool {
        self.rollback.as_ref().is_some_and(|r| r.is_clean())
    }

    /// Human-readable description including rollback status
    pub fn describe(&self) -> String {
        let mut text = format!("{}", self.error);
        match &self.rollback {
            Some(report) => {
                text.push('\n');
                text.push_str(&report.summary());
            }
            None if !self.error.is_validation() => {
                text.push_str("\nNo automatic rollback was performed.");
            }
            None => {}
        }
        if let Some(snapshot) = &self.snapshot {
            text.push_str(&format!(
                "\nSafety snapshot kept for manual recovery at: {}",
                snapshot.display()
            ));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::ValidationFailed("package missing".into());
        assert_eq!(err.to_string(), "Validation failed: package missing");
    }

    #[test]
    fn test_target_locked_error() {
        let err = EngineError::target_locked(Path::new("/data/plex"), 5);
        assert_eq!(
            err.to_string(),
            "Target locked after 5 attempt(s): /data/plex"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_remote_command_error() {
        let err = EngineError::RemoteCommandFailed {
            context: "extract".into(),
            status: 9,
            stderr: "unzip: not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "Remote command failed (extract): exit 9: unzip: not found"
        );
    }

    #[test]
    fn test_fallback_classification() {
        assert!(EngineError::tool_failed("robocopy", "exit 16").triggers_fallback());
        assert!(!EngineError::CopyFailed("nothing copied".into()).triggers_fallback());
        assert!(EngineError::CopyFailed("nothing copied".into()).is_fatal());
        assert!(!EngineError::tool_failed("rsync", "timed out").is_fatal());
    }

    #[test]
    fn test_timeout_display() {
        let err = EngineError::OperationTimedOut {
            budget: Duration::from_secs(90),
        };
        assert_eq!(err.to_string(), "Operation timed out after 90s");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let engine_err: EngineError = io_err.into();
        assert!(matches!(engine_err, EngineError::Io(_)));
    }

    #[test]
    fn test_failure_describe_mentions_snapshot() {
        let failure = OperationFailure {
            error: EngineError::VerificationFailed("Preferences.xml missing".into()),
            rollback: None,
            snapshot: Some(PathBuf::from("/tmp/SafetyBackup_1")),
            log: OperationLog::new("restore"),
        };
        let text = failure.describe();
        assert!(text.contains("No automatic rollback"));
        assert!(text.contains("/tmp/SafetyBackup_1"));
        assert!(!failure.fully_reverted());
    }
}
