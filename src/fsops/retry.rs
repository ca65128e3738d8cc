//! Retrying directory clearing
//!
//! The managed service can keep file handles open for a short while after it
//! was told to stop. Clearing its data directory therefore retries with a
//! linear backoff before reporting the target as locked.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{EngineError, EngineResult};

/// How often and how patiently to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up (at least one is always made)
    pub max_attempts: u32,
    /// Attempt `n` is followed by a wait of `n * base_delay`
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Wait after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}

/// Primitive filesystem operations used while clearing a directory
pub trait FsBackend: Send + Sync {
    /// Remove read-only (and on Windows hidden/system) attributes below `root`
    fn strip_attributes(&self, root: &Path) -> std::io::Result<()>;

    /// Delete one file
    fn remove_file(&self, path: &Path) -> std::io::Result<()>;

    /// Delete one empty directory
    fn remove_dir(&self, path: &Path) -> std::io::Result<()>;
}

/// The real filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFs;

impl FsBackend for StdFs {
    fn strip_attributes(&self, root: &Path) -> std::io::Result<()> {
        #[cfg(windows)]
        {
            // Hidden and system flags are invisible to std; attrib clears them
            let pattern = root.join("*");
            let _ = std::process::Command::new("attrib")
                .args(["-R", "-H", "-S", "/S", "/D"])
                .arg(&pattern)
                .output();
        }

        for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
            let metadata = entry.metadata().map_err(std::io::Error::other)?;
            let mut permissions = metadata.permissions();
            if permissions.readonly() {
                #[allow(clippy::permissions_set_readonly_false)]
                permissions.set_readonly(false);
                fs::set_permissions(entry.path(), permissions)?;
            }
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> std::io::Result<()> {
        fs::remove_dir(path)
    }
}

/// Delete everything inside `path`, keeping `path` itself
///
/// A missing directory counts as already cleared.
pub fn clear_directory(path: &Path, policy: &RetryPolicy) -> EngineResult<()> {
    clear_directory_with(&StdFs, path, policy)
}

/// `clear_directory` over an arbitrary backend
pub fn clear_directory_with(
    fs: &dyn FsBackend,
    path: &Path,
    policy: &RetryPolicy,
) -> EngineResult<()> {
    if !path.exists() {
        return Ok(());
    }

    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match clear_once(fs, path) {
            Ok(()) => {
                debug!(path = %path.display(), attempt, "Directory cleared");
                return Ok(());
            }
            Err(e) if attempt < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    path = %path.display(),
                    attempt,
                    "Failed to clear directory ({}), retrying in {:?}",
                    e,
                    delay
                );
                thread::sleep(delay);
            }
            Err(e) => {
                warn!(path = %path.display(), attempt, "Giving up clearing directory: {}", e);
            }
        }
    }

    Err(EngineError::target_locked(path, attempts))
}

fn clear_once(fs: &dyn FsBackend, root: &Path) -> std::io::Result<()> {
    fs.strip_attributes(root)?;

    // contents_first yields children before their parent: files, then
    // directories bottom-up
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        } else {
            fs.remove_file(entry.path())?;
        }
    }
    for dir in dirs {
        fs.remove_dir(&dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Refuses to delete files named `locked.db` until `release_after` calls
    struct LockingFs {
        calls: AtomicU32,
        release_after: u32,
    }

    impl LockingFs {
        fn new(release_after: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                release_after,
            }
        }
    }

    impl FsBackend for LockingFs {
        fn strip_attributes(&self, root: &Path) -> std::io::Result<()> {
            StdFs.strip_attributes(root)
        }

        fn remove_file(&self, path: &Path) -> std::io::Result<()> {
            if path.file_name().is_some_and(|n| n == "locked.db") {
                let seen = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if seen <= self.release_after {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "file in use",
                    ));
                }
            }
            fs::remove_file(path)
        }

        fn remove_dir(&self, path: &Path) -> std::io::Result<()> {
            fs::remove_dir(path)
        }
    }

    fn populated_dir() -> TempDir {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("Plug-in Support").join("Databases");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp.path().join("Preferences.xml"), "<Preferences/>").unwrap();
        fs::write(nested.join("locked.db"), vec![0u8; 64]).unwrap();
        temp
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(4), Duration::from_secs(4));
    }

    #[test]
    fn test_clear_removes_contents_but_keeps_root() {
        let temp = populated_dir();
        clear_directory(temp.path(), &fast_policy(1)).unwrap();

        assert!(temp.path().exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_clear_strips_readonly() {
        let temp = populated_dir();
        let prefs = temp.path().join("Preferences.xml");
        let mut perms = fs::metadata(&prefs).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&prefs, perms).unwrap();

        clear_directory(temp.path(), &fast_policy(1)).unwrap();
        assert!(!prefs.exists());
    }

    #[test]
    fn test_lock_released_before_final_attempt() {
        let temp = populated_dir();
        let fs_backend = LockingFs::new(4);

        clear_directory_with(&fs_backend, temp.path(), &fast_policy(5)).unwrap();
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_lock_never_released() {
        let temp = populated_dir();
        let fs_backend = LockingFs::new(u32::MAX);

        let err = clear_directory_with(&fs_backend, temp.path(), &fast_policy(3)).unwrap_err();
        match err {
            EngineError::TargetLocked { path, attempts } => {
                assert_eq!(path, temp.path());
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(temp.path().join("Plug-in Support").exists());
    }

    #[test]
    fn test_missing_directory_is_already_clear() {
        let temp = TempDir::new().unwrap();
        clear_directory(&temp.path().join("absent"), &fast_policy(1)).unwrap();
    }
}
