//! Persisted engine defaults
//!
//! Settings are only defaults: every orchestrator call receives an explicit
//! options value built from them plus whatever the caller overrides.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::paths::EnginePaths;
use super::profile::{ServiceProfile, LINUX_DATA_DIR};
use crate::error::EngineError;
use crate::fsops::RetryPolicy;

/// Retry settings for clearing locked directories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts before giving up
    pub attempts: u32,
    /// Base delay in milliseconds; attempt `n` waits `n * base`
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay_ms: 1000,
        }
    }
}

/// Defaults for restores onto a remote host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDefaults {
    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Data directory on the remote host
    #[serde(default = "default_remote_data_path")]
    pub data_path: String,

    /// Parent of the per-operation scratch directory on the remote host
    #[serde(default = "default_scratch_root")]
    pub scratch_root: String,

    /// Whether to stop and start the remote service
    #[serde(default = "default_true")]
    pub manage_service: bool,

    /// Service name used when detection finds nothing
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Seconds to wait after stopping the remote service
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,
}

impl Default for RemoteDefaults {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_path: default_remote_data_path(),
            scratch_root: default_scratch_root(),
            manage_service: true,
            service_name: default_service_name(),
            settle_delay_secs: default_settle_delay(),
        }
    }
}

/// Where configuration is exported from and imported into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigBackend {
    /// Windows registry via `reg.exe`
    Registry,
    /// A preferences file inside the data directory
    File,
}

impl Default for ConfigBackend {
    fn default() -> Self {
        if cfg!(windows) {
            Self::Registry
        } else {
            Self::File
        }
    }
}

/// User settings for the backup engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Where new backups are created; `None` uses the engine's base directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_root: Option<PathBuf>,

    /// Overrides the managed application's data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Manage the local service through this systemd unit instead of the
    /// process table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_unit: Option<String>,

    /// Export configuration during backup / import it during restore
    #[serde(default = "default_true")]
    pub include_config: bool,

    /// Mirror the data directory during backup
    #[serde(default = "default_true")]
    pub include_data: bool,

    /// Stop the service while backing up
    #[serde(default = "default_true")]
    pub stop_service: bool,

    /// Undo partial work when an operation fails
    #[serde(default = "default_true")]
    pub enable_rollback: bool,

    /// Configuration backend
    #[serde(default)]
    pub config_backend: ConfigBackend,

    /// Directory clearing retries
    #[serde(default)]
    pub retry: RetrySettings,

    /// Deadline for the external mirroring tool, in seconds
    #[serde(default = "default_mirror_timeout")]
    pub mirror_timeout_secs: u64,

    /// Wall-clock budget for a whole restore, in seconds
    #[serde(default = "default_restore_timeout")]
    pub restore_timeout_secs: u64,

    /// Remote restore defaults
    #[serde(default)]
    pub remote: RemoteDefaults,
}

fn default_schema_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_mirror_timeout() -> u64 {
    30 * 60
}

fn default_restore_timeout() -> u64 {
    2 * 60 * 60
}

fn default_port() -> u16 {
    22
}

fn default_remote_data_path() -> String {
    LINUX_DATA_DIR.to_string()
}

fn default_scratch_root() -> String {
    "/tmp/plex_restore".to_string()
}

fn default_service_name() -> String {
    "plexmediaserver".to_string()
}

fn default_settle_delay() -> u64 {
    3
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            backup_root: None,
            data_dir: None,
            service_unit: None,
            include_config: true,
            include_data: true,
            stop_service: true,
            enable_rollback: true,
            config_backend: ConfigBackend::default(),
            retry: RetrySettings::default(),
            mirror_timeout_secs: default_mirror_timeout(),
            restore_timeout_secs: default_restore_timeout(),
            remote: RemoteDefaults::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or create default settings if file doesn't exist
    pub fn load_or_create(paths: &EnginePaths) -> Result<Self, EngineError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path)
                .map_err(|e| EngineError::Io(format!("Failed to read settings file: {}", e)))?;

            let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
                EngineError::Config(format!("Failed to parse settings file: {}", e))
            })?;

            Ok(settings)
        } else {
            // Don't save yet - let caller decide when to persist
            Ok(Settings::default())
        }
    }

    /// Save settings to disk
    pub fn save(&self, paths: &EnginePaths) -> Result<(), EngineError> {
        paths.ensure_directories()?;

        let settings_path = paths.settings_file();
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(&settings_path, contents)
            .map_err(|e| EngineError::Io(format!("Failed to write settings file: {}", e)))?;

        Ok(())
    }

    /// Root directory new backups are created under
    pub fn backup_root(&self, paths: &EnginePaths) -> PathBuf {
        self.backup_root
            .clone()
            .unwrap_or_else(|| paths.default_backup_root())
    }

    /// The managed application profile with the data directory override applied
    pub fn profile(&self) -> ServiceProfile {
        let profile = ServiceProfile::plex();
        match &self.data_dir {
            Some(dir) => profile.with_data_dir(dir),
            None => profile,
        }
    }

    /// Retry policy for clearing directories
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.attempts,
            Duration::from_millis(self.retry.base_delay_ms),
        )
    }

    /// Deadline for the external mirroring tool
    pub fn mirror_timeout(&self) -> Duration {
        Duration::from_secs(self.mirror_timeout_secs)
    }

    /// Wall-clock budget for a restore
    pub fn restore_timeout(&self) -> Duration {
        Duration::from_secs(self.restore_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.include_config);
        assert!(settings.include_data);
        assert!(settings.enable_rollback);
        assert_eq!(settings.retry.attempts, 5);
        assert_eq!(settings.retry.base_delay_ms, 1000);
        assert_eq!(settings.remote.port, 22);
        assert_eq!(settings.remote.settle_delay_secs, 3);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let paths = EnginePaths::with_base_dir(temp_dir.path().to_path_buf());

        let mut settings = Settings::default();
        settings.stop_service = false;
        settings.backup_root = Some(temp_dir.path().join("elsewhere"));

        settings.save(&paths).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert!(!loaded.stop_service);
        assert_eq!(loaded.backup_root(&paths), temp_dir.path().join("elsewhere"));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let loaded: Settings = serde_json::from_str(r#"{"include_data": false}"#).unwrap();
        assert!(!loaded.include_data);
        assert!(loaded.include_config);
        assert_eq!(loaded.remote.scratch_root, "/tmp/plex_restore");
        assert_eq!(loaded.retry_policy().max_attempts, 5);
    }

    #[test]
    fn test_profile_override() {
        let settings = Settings {
            data_dir: Some(PathBuf::from("/srv/pms")),
            ..Default::default()
        };
        assert_eq!(settings.profile().data_dir, PathBuf::from("/srv/pms"));
    }
}
