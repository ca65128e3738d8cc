//! Safety snapshot of the live data taken before a restore
//!
//! Only a fixed set of critical paths is copied, so the snapshot is quick to
//! take. It is kept on disk until the restore either succeeds or has been
//! rolled back cleanly.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::fsops::{clear_directory, copy_path, copy_tree, RetryPolicy};

/// Minimal copy of the live data
#[derive(Debug)]
pub struct SafetySnapshot {
    path: PathBuf,
    files: u64,
    warnings: Vec<String>,
}

impl SafetySnapshot {
    /// Copy `critical_paths` (relative to `data_dir`) into a new folder under `parent`
    ///
    /// Paths that do not exist are skipped; paths that fail to copy are
    /// skipped with a warning.
    pub fn take(data_dir: &Path, critical_paths: &[PathBuf], parent: &Path) -> EngineResult<Self> {
        let path = unique_dir(parent);
        fs::create_dir_all(&path).map_err(|e| {
            EngineError::Io(format!("Failed to create safety snapshot {}: {}", path.display(), e))
        })?;

        let mut files = 0;
        let mut warnings = Vec::new();
        for relative in critical_paths {
            let source = data_dir.join(relative);
            if !source.exists() {
                debug!("Not in live data, skipping: {}", relative.display());
                continue;
            }
            match copy_path(&source, &path.join(relative)) {
                Ok(count) => files += count,
                Err(e) => warnings.push(format!(
                    "Safety snapshot could not copy {}: {}",
                    relative.display(),
                    e
                )),
            }
        }

        info!(path = %path.display(), files, "Safety snapshot taken");
        Ok(Self {
            path,
            files,
            warnings,
        })
    }

    /// Where the snapshot lives
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of files captured
    pub fn files(&self) -> u64 {
        self.files
    }

    /// Paths that could not be captured
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Delete the snapshot
    pub fn discard(self) -> EngineResult<()> {
        fs::remove_dir_all(&self.path).map_err(|e| {
            EngineError::Io(format!(
                "Failed to delete safety snapshot {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Keep the snapshot on disk and return its location
    pub fn keep(self) -> PathBuf {
        self.path
    }
}

/// Replace the contents of `target` with a kept safety snapshot
///
/// Returns the number of files put back.
pub fn recover_from_snapshot(snapshot: &Path, target: &Path, retry: &RetryPolicy) -> EngineResult<u64> {
    if !snapshot.is_dir() {
        return Err(EngineError::ValidationFailed(format!(
            "Safety snapshot not found: {}",
            snapshot.display()
        )));
    }
    clear_directory(target, retry)?;
    copy_tree(snapshot, target)
}

fn unique_dir(parent: &Path) -> PathBuf {
    let base = format!("SafetyBackup_{}", Local::now().format("%Y%m%d_%H%M%S"));
    let mut candidate = parent.join(&base);
    let mut n = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{}_{}", base, n));
        n += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceProfile;
    use crate::test_support::fake_data_dir;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_copies_only_critical_paths() {
        let temp = TempDir::new().unwrap();
        let data = fake_data_dir(&temp.path().join("data"));
        let profile = ServiceProfile::plex();

        let snapshot = SafetySnapshot::take(&data, &profile.snapshot_paths, temp.path()).unwrap();
        assert_eq!(snapshot.files(), 2);
        assert!(snapshot.warnings().is_empty());
        assert!(snapshot.path().join("Preferences.xml").exists());
        assert!(!snapshot.path().join("Cache").exists());
        assert!(snapshot
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("SafetyBackup_"));
    }

    #[test]
    fn test_two_snapshots_in_the_same_second_do_not_collide() {
        let temp = TempDir::new().unwrap();
        let data = fake_data_dir(&temp.path().join("data"));
        let paths = vec![PathBuf::from("Preferences.xml")];

        let first = SafetySnapshot::take(&data, &paths, temp.path()).unwrap();
        let second = SafetySnapshot::take(&data, &paths, temp.path()).unwrap();
        assert_ne!(first.path(), second.path());
    }

    #[test]
    fn test_recover_and_discard() {
        let temp = TempDir::new().unwrap();
        let data = fake_data_dir(&temp.path().join("data"));
        let snapshot =
            SafetySnapshot::take(&data, &[PathBuf::from("Preferences.xml")], temp.path()).unwrap();

        fs::write(data.join("Preferences.xml"), "corrupt").unwrap();
        let restored =
            recover_from_snapshot(snapshot.path(), &data, &RetryPolicy::new(1, Duration::from_millis(1)))
                .unwrap();
        assert_eq!(restored, 1);
        assert_eq!(fs::metadata(data.join("Preferences.xml")).unwrap().len(), 1024);

        let path = snapshot.path().to_path_buf();
        snapshot.discard().unwrap();
        assert!(!path.exists());
    }
}
