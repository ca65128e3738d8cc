//! Operation log entry data structures

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// A completed step or informational note
    Info,
    /// Something went wrong but the operation continued
    Warning,
    /// A failure that aborted a stage
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// A single entry of an operation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the entry was recorded (local time, as shown to operators)
    pub timestamp: DateTime<Local>,

    /// Severity of the entry
    pub level: LogLevel,

    /// Message text
    pub message: String,
}

impl LogEntry {
    /// Create an entry stamped with the current time
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
        }
    }

    /// Format as a single log line: `[HH:MM:SS] LEVEL: message`
    pub fn format_line(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            self.message
        )
    }
}
