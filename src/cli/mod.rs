//! CLI command handlers
//!
//! This module contains the implementation of CLI commands, bridging the
//! clap argument parsing with the engine. Operations run on the engine's
//! worker thread; handlers print its log entries and progress as they arrive.

pub mod backup;
pub mod config;
pub mod remote;
pub mod restore;
pub mod validate;

use std::sync::Arc;

use crate::config::Settings;
use crate::engine::{Collaborators, Engine, OperationHandle};
use crate::error::{EngineResult, OperationFailure};
use crate::oplog::{OperationLog, ProgressEvent};
use crate::remote::OpenSshTransport;

pub use backup::{handle_backup_command, handle_list_command, handle_rename_command, BackupArgs, ListArgs, RenameArgs};
pub use config::handle_config_command;
pub use remote::{handle_remote_command, RemoteArgs};
pub use restore::{handle_recover_command, handle_restore_command, RecoverArgs, RestoreArgs};
pub use validate::{handle_validate_command, ValidateArgs};

/// Engine over the real system
pub(crate) fn system_engine(settings: &Settings) -> Engine {
    Engine::new(
        Collaborators::system(settings),
        Arc::new(OpenSshTransport::system()),
    )
}

/// Print events until the operation ends, then return its outcome
pub(crate) fn follow<T>(handle: OperationHandle<Result<T, OperationFailure>>) -> EngineResult<Result<T, OperationFailure>> {
    let mut last_percent = None;
    for event in handle.events().iter() {
        match event {
            ProgressEvent::Entry(entry) => println!("{}", entry.format_line()),
            ProgressEvent::Progress { fraction, stage } => {
                let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u32;
                if last_percent != Some(percent) {
                    println!("[{:>3}%] {}", percent, stage);
                    last_percent = Some(percent);
                }
            }
        }
    }
    handle.wait()
}

/// Print the end-of-operation summary of a log
pub(crate) fn print_summary(log: &OperationLog) {
    println!();
    println!("{}", log.summary());
}

/// Report a failed operation and hand back its error
pub(crate) fn report_failure(failure: OperationFailure) -> crate::error::EngineError {
    eprintln!();
    eprintln!("{}", failure.describe());
    eprintln!();
    eprintln!("{}", failure.log.summary());
    failure.error
}

/// Format a file size in human-readable form
pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
