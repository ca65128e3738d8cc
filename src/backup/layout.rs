//! On-disk layout of a backup package
//!
//! ```text
//! {Weekday} {dd-MM-yyyy}-Backup/
//!     RegBackup/Regbackup-{Weekday}.reg
//!     FileBackup/...
//!     Logs/LogBackup-{Weekday}.txt
//! ```

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};

/// Configuration export sub-folder
pub const REG_DIR: &str = "RegBackup";
/// Mirrored data sub-folder
pub const DATA_DIR: &str = "FileBackup";
/// Copy log sub-folder
pub const LOGS_DIR: &str = "Logs";

/// Paths of one backup package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupLayout {
    root: PathBuf,
    weekday: String,
}

impl BackupLayout {
    /// Layout of the package for `date` under `backup_root`
    pub fn for_date(backup_root: &Path, date: NaiveDate) -> Self {
        let weekday = date.format("%A").to_string();
        let name = format!(
            "{} {:02}-{:02}-{}-Backup",
            weekday,
            date.day(),
            date.month(),
            date.year()
        );
        Self {
            root: backup_root.join(name),
            weekday,
        }
    }

    /// Package root folder
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configuration export folder
    pub fn reg_dir(&self) -> PathBuf {
        self.root.join(REG_DIR)
    }

    /// Configuration export file
    pub fn reg_file(&self) -> PathBuf {
        self.reg_dir().join(format!("Regbackup-{}.reg", self.weekday))
    }

    /// Name under which an overwritten configuration export is saved
    pub fn original_reg_name(&self) -> String {
        format!("Regbackup-{}_original.reg", self.weekday)
    }

    /// Mirrored data folder
    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    /// Copy log folder
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    /// Copy log file
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(format!("LogBackup-{}.txt", self.weekday))
    }
}
