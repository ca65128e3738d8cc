//! Path management for the backup engine
//!
//! ## Path Resolution Order
//!
//! 1. `PMS_BACKUP_HOME` environment variable (if set)
//! 2. Unix (Linux/macOS): `$XDG_CONFIG_HOME/pms-backup` or `~/.config/pms-backup`
//! 3. Windows: `%APPDATA%\pms-backup`

use std::path::PathBuf;

use crate::error::EngineError;

/// Manages the paths the engine keeps its own state in
#[derive(Debug, Clone)]
pub struct EnginePaths {
    /// Base directory for settings and default backups
    base_dir: PathBuf,
}

impl EnginePaths {
    /// Create a new EnginePaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if no home or application-data directory can be found.
    pub fn new() -> Result<Self, EngineError> {
        let base_dir = if let Ok(custom) = std::env::var("PMS_BACKUP_HOME") {
            PathBuf::from(custom)
        } else {
            resolve_default_path()?
        };

        Ok(Self { base_dir })
    }

    /// Create EnginePaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Backup root used when the settings do not name one
    pub fn default_backup_root(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Ensure the base directory exists
    pub fn ensure_directories(&self) -> Result<(), EngineError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| EngineError::Io(format!("Failed to create base directory: {}", e)))
    }
}

/// Resolve the default base directory path based on platform
#[cfg(not(windows))]
fn resolve_default_path() -> Result<PathBuf, EngineError> {
    let config_base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(xdg) => PathBuf::from(xdg),
        Err(_) => {
            let home = std::env::var("HOME")
                .map_err(|_| EngineError::Config("HOME environment variable not set".into()))?;
            PathBuf::from(home).join(".config")
        }
    };
    Ok(config_base.join("pms-backup"))
}

/// Resolve the default base directory path based on platform
#[cfg(windows)]
fn resolve_default_path() -> Result<PathBuf, EngineError> {
    let appdata = std::env::var("APPDATA")
        .map_err(|_| EngineError::Config("Could not determine APPDATA directory".into()))?;
    Ok(PathBuf::from(appdata).join("pms-backup"))
}
