//! Append-only record of one operation
//!
//! Entries are only added through a `Reporter` while the operation runs.
//! Once `finish` has been called the log is frozen; later appends are dropped.

use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entry::{LogEntry, LogLevel};

/// Timestamped, leveled log of a single backup or restore operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLog {
    /// Unique id, also attached to the tracing span of the operation
    pub id: Uuid,
    /// Operation kind ("backup", "restore", "remote-restore")
    pub operation: String,
    /// When the operation started
    pub started_at: DateTime<Local>,
    /// When the operation ended, once finished
    pub finished_at: Option<DateTime<Local>>,
    entries: Vec<LogEntry>,
}

impl OperationLog {
    /// Start a new, empty log
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation: operation.into(),
            started_at: Local::now(),
            finished_at: None,
            entries: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, entry: LogEntry) {
        if self.finished_at.is_none() {
            self.entries.push(entry);
        }
    }

    pub(crate) fn finish(&mut self) {
        if self.finished_at.is_none() {
            self.finished_at = Some(Local::now());
        }
    }

    /// Check if the operation has ended
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// All entries in the order they were recorded
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    fn count(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    /// Number of informational entries (completed steps)
    pub fn step_count(&self) -> usize {
        self.count(LogLevel::Info)
    }

    /// Number of warnings
    pub fn warning_count(&self) -> usize {
        self.count(LogLevel::Warning)
    }

    /// Number of errors
    pub fn error_count(&self) -> usize {
        self.count(LogLevel::Error)
    }

    /// Elapsed time, up to now if the operation is still running
    pub fn duration(&self) -> Duration {
        self.finished_at.unwrap_or_else(Local::now) - self.started_at
    }

    /// Short summary: duration, steps completed and problems encountered
    pub fn summary(&self) -> String {
        let secs = self.duration().num_seconds().max(0);
        let mut summary = format!("Operation Duration: {:02}:{:02}\n", secs / 60, secs % 60);
        summary.push_str(&format!("Steps Completed: {}\n", self.step_count()));
        if self.warning_count() > 0 {
            summary.push_str(&format!("Warnings: {}\n", self.warning_count()));
        }
        if self.error_count() > 0 {
            summary.push_str(&format!("Errors Encountered: {}\n", self.error_count()));
        }
        summary
    }

    /// Only the error lines
    pub fn error_text(&self) -> String {
        self.entries
            .iter()
            .filter(|e| e.level == LogLevel::Error)
            .map(LogEntry::format_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Every entry, one line each, in chronological order
    pub fn full_text(&self) -> String {
        self.entries
            .iter()
            .map(LogEntry::format_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
