//! Description of the managed application
//!
//! The engine itself knows nothing about a particular media server; which
//! processes to stop, where the data lives, what must survive a restore and
//! which names to probe on a remote host all come from a `ServiceProfile`.
//! `ServiceProfile::plex()` holds the defaults for Plex Media Server.

use std::path::PathBuf;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

/// Default data directory of the Linux package
pub const LINUX_DATA_DIR: &str =
    "/var/lib/plexmediaserver/Library/Application Support/Plex Media Server";

/// A file that must exist with at least `min_size` bytes after a restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalArtifact {
    /// Path relative to the data directory
    pub path: PathBuf,
    /// Smallest size considered non-trivial
    pub min_size: u64,
}

impl CriticalArtifact {
    /// Create an artifact requirement
    pub fn new(path: impl Into<PathBuf>, min_size: u64) -> Self {
        Self {
            path: path.into(),
            min_size,
        }
    }
}

/// Everything the engine needs to know about the application it protects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceProfile {
    /// Display name
    pub name: String,

    /// Process names matched when stopping or probing the local service
    pub process_names: Vec<String>,

    /// Executables tried in order when starting the local service
    pub executable_paths: Vec<PathBuf>,

    /// Local data directory that is backed up and restored
    pub data_dir: PathBuf,

    /// Sub-directories of the data directory left out of backups
    pub excluded_dirs: Vec<PathBuf>,

    /// Registry key exported as the configuration artifact
    pub registry_key: String,

    /// Files of which at least one must be non-empty in a package's data tree
    pub package_critical_files: Vec<PathBuf>,

    /// Paths copied into the safety snapshot before a restore
    pub snapshot_paths: Vec<PathBuf>,

    /// Artifacts checked after a restore; one passing is enough
    pub verification: Vec<CriticalArtifact>,

    /// Remote systemd unit names probed, first match wins
    pub remote_service_candidates: Vec<String>,

    /// Remote accounts probed for ownership fixing, first match wins
    pub remote_account_candidates: Vec<String>,
}

impl ServiceProfile {
    /// Defaults for Plex Media Server on the current platform
    pub fn plex() -> Self {
        let database = PathBuf::from("Plug-in Support")
            .join("Databases")
            .join("com.plexapp.plugins.library.db");

        Self {
            name: "Plex Media Server".to_string(),
            process_names: vec!["Plex Media Server".to_string()],
            executable_paths: default_executables(),
            data_dir: default_data_dir(),
            excluded_dirs: vec![PathBuf::from("Cache")],
            registry_key: r"HKEY_CURRENT_USER\Software\Plex, Inc.".to_string(),
            package_critical_files: vec![PathBuf::from("Preferences.xml"), database.clone()],
            snapshot_paths: vec![
                PathBuf::from("Preferences.xml"),
                PathBuf::from("Plug-in Support").join("Databases"),
                PathBuf::from("Media").join("localhost"),
            ],
            verification: vec![
                CriticalArtifact::new("Preferences.xml", 100),
                CriticalArtifact::new(database, 1000),
            ],
            remote_service_candidates: vec![
                "plexmediaserver".to_string(),
                "plex".to_string(),
                "pms".to_string(),
            ],
            remote_account_candidates: vec![
                "plex".to_string(),
                "plexmediaserver".to_string(),
                "pms".to_string(),
            ],
        }
    }

    /// Same profile pointed at another data directory
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Absolute paths of the excluded directories
    pub fn excluded_paths(&self) -> Vec<PathBuf> {
        self.excluded_dirs
            .iter()
            .map(|dir| self.data_dir.join(dir))
            .collect()
    }
}

impl Default for ServiceProfile {
    fn default() -> Self {
        Self::plex()
    }
}

fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        return PathBuf::from(LINUX_DATA_DIR);
    }
    BaseDirs::new()
        .map(|dirs| dirs.data_local_dir().join("Plex Media Server"))
        .unwrap_or_else(|| PathBuf::from("Plex Media Server"))
}

fn default_executables() -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![
            PathBuf::from(r"C:\Program Files (x86)\Plex\Plex Media Server\Plex Media Server.exe"),
            PathBuf::from(r"C:\Program Files\Plex\Plex Media Server\Plex Media Server.exe"),
        ]
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from(
            "/Applications/Plex Media Server.app/Contents/MacOS/Plex Media Server",
        )]
    } else {
        vec![PathBuf::from("/usr/lib/plexmediaserver/Plex Media Server")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plex_defaults() {
        let profile = ServiceProfile::plex();
        assert_eq!(profile.process_names, vec!["Plex Media Server"]);
        assert_eq!(profile.snapshot_paths.len(), 3);
        assert_eq!(profile.verification[0].min_size, 100);
        assert_eq!(profile.verification[1].min_size, 1000);
        assert_eq!(profile.remote_service_candidates[0], "plexmediaserver");
    }

    #[test]
    fn test_excluded_paths_are_absolute_under_data_dir() {
        let profile = ServiceProfile::plex().with_data_dir("/srv/pms");
        assert_eq!(profile.excluded_paths(), vec![PathBuf::from("/srv/pms/Cache")]);
    }
}
