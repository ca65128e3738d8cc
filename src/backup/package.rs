//! Description of an existing backup package

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, TimeZone};

use super::archive::is_zip;
use crate::error::{EngineError, EngineResult};
use crate::fsops::dir_size;

/// A backup on disk: a package folder or a `.zip` of one
#[derive(Debug, Clone)]
pub struct BackupPackage {
    /// Location on disk
    pub path: PathBuf,
    /// Display name (editable via `rename`)
    pub name: String,
    /// When the package was created
    pub created: DateTime<Local>,
    /// Whether the package is a single archive file
    pub compressed: bool,
    /// Size in bytes (sum of files for a folder)
    pub size: u64,
}

impl BackupPackage {
    /// Describe the package at `path`
    pub fn open(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            return Err(EngineError::ValidationFailed(format!(
                "Backup not found: {}",
                path.display()
            )));
        }

        let compressed = is_zip(path);
        let name = if compressed {
            path.file_stem()
        } else {
            path.file_name()
        }
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

        let size = if compressed {
            fs::metadata(path)?.len()
        } else {
            dir_size(path)?
        };

        let created = date_from_name(&name)
            .or_else(|| creation_time(path))
            .unwrap_or_else(Local::now);

        Ok(Self {
            path: path.to_path_buf(),
            name,
            created,
            compressed,
            size,
        })
    }

    /// Rename the package on disk, keeping it in the same folder
    pub fn rename(&mut self, new_name: &str) -> EngineResult<()> {
        let new_name = new_name.trim();
        if new_name.is_empty() || new_name.contains(['/', '\\']) {
            return Err(EngineError::ValidationFailed(format!(
                "Invalid backup name: '{}'",
                new_name
            )));
        }

        let file_name = if self.compressed {
            format!("{}.zip", new_name)
        } else {
            new_name.to_string()
        };
        let target = self
            .path
            .parent()
            .map(|parent| parent.join(&file_name))
            .unwrap_or_else(|| PathBuf::from(&file_name));

        if target.exists() {
            return Err(EngineError::ValidationFailed(format!(
                "A backup named '{}' already exists",
                new_name
            )));
        }

        fs::rename(&self.path, &target)
            .map_err(|e| EngineError::Io(format!("Failed to rename backup: {}", e)))?;
        self.path = target;
        self.name = new_name.to_string();
        Ok(())
    }
}

/// Date embedded in a default package name (`Monday 04-03-2024-Backup`)
fn date_from_name(name: &str) -> Option<DateTime<Local>> {
    let date_part = name.split_whitespace().nth(1)?.strip_suffix("-Backup")?;
    let date = NaiveDate::parse_from_str(date_part, "%d-%m-%Y").ok()?;
    Local
        .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
        .earliest()
}

fn creation_time(path: &Path) -> Option<DateTime<Local>> {
    let metadata = fs::metadata(path).ok()?;
    let time = metadata.created().or_else(|_| metadata.modified()).ok()?;
    Some(DateTime::<Local>::from(time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use tempfile::TempDir;

    #[test]
    fn test_open_directory_package() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Monday 04-03-2024-Backup");
        fs::create_dir_all(root.join("FileBackup")).unwrap();
        fs::write(root.join("FileBackup").join("Preferences.xml"), [0u8; 10]).unwrap();

        let package = BackupPackage::open(&root).unwrap();
        assert_eq!(package.name, "Monday 04-03-2024-Backup");
        assert!(!package.compressed);
        assert_eq!(package.size, 10);
        assert_eq!(package.created.day(), 4);
        assert_eq!(package.created.month(), 3);
    }

    #[test]
    fn test_rename_zip_package() {
        let temp = TempDir::new().unwrap();
        let zip_path = temp.path().join("old.zip");
        fs::write(&zip_path, "PK").unwrap();

        let mut package = BackupPackage::open(&zip_path).unwrap();
        assert!(package.compressed);
        assert_eq!(package.name, "old");

        package.rename("before upgrade").unwrap();
        assert_eq!(package.path, temp.path().join("before upgrade.zip"));
        assert!(package.path.exists());
        assert!(!zip_path.exists());
    }

    #[test]
    fn test_rename_rejects_separators() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("pkg");
        fs::create_dir_all(&root).unwrap();

        let mut package = BackupPackage::open(&root).unwrap();
        assert!(package.rename("../escape").is_err());
        assert!(package.rename("   ").is_err());
    }

    #[test]
    fn test_open_missing_package() {
        let temp = TempDir::new().unwrap();
        let err = BackupPackage::open(&temp.path().join("nope")).unwrap_err();
        assert!(err.is_validation());
    }
}
