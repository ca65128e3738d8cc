//! Live data moved out of the way while it is being replaced
//!
//! Before a restore clears the data directory, its top-level entries are
//! renamed into a holding folder next to it. Renaming within one volume is
//! cheap, so the whole pre-restore tree survives a failed restore, not only
//! what the safety snapshot covers. Entries that cannot be moved stay in
//! place and are cleared with the rest; for those only the snapshot's copy
//! can be put back.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, warn};

use super::report::RollbackReport;
use crate::error::{EngineError, EngineResult};
use crate::fsops::{clear_directory, copy_path, RetryPolicy};

#[derive(Debug, Clone)]
struct LeftBehind {
    name: PathBuf,
    /// The snapshot holds this entry in full, not just part of it
    whole_in_snapshot: bool,
}

/// Pre-restore contents of one directory, held aside
#[derive(Debug)]
pub struct SetAside {
    target: PathBuf,
    holding: Option<PathBuf>,
    snapshot: PathBuf,
    moved: Vec<PathBuf>,
    left_behind: Vec<LeftBehind>,
}

impl SetAside {
    /// Move every top-level entry of `target` into a sibling holding folder
    ///
    /// `snapshot` is the safety snapshot taken from `target` with
    /// `snapshot_paths`; it backs up entries that could not be moved.
    pub fn take(target: &Path, snapshot: &Path, snapshot_paths: &[PathBuf]) -> EngineResult<Self> {
        let entries = fs::read_dir(target).map_err(|e| {
            EngineError::Io(format!("Failed to read {}: {}", target.display(), e))
        })?;

        let holding = holding_dir(target).and_then(|dir| match fs::create_dir(&dir) {
            Ok(()) => Some(dir),
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Could not create holding folder");
                None
            }
        });

        let mut moved = Vec::new();
        let mut left_behind = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = PathBuf::from(entry.file_name());
            let renamed = match &holding {
                Some(holding) => fs::rename(entry.path(), holding.join(&name)),
                None => Err(io::Error::new(io::ErrorKind::Other, "no holding folder")),
            };
            match renamed {
                Ok(()) => moved.push(name),
                Err(e) => {
                    debug!(entry = %name.display(), error = %e, "Left in place");
                    let whole_in_snapshot = snapshot_paths.iter().any(|p| *p == name);
                    left_behind.push(LeftBehind {
                        name,
                        whole_in_snapshot,
                    });
                }
            }
        }

        Ok(Self {
            target: target.to_path_buf(),
            holding,
            snapshot: snapshot.to_path_buf(),
            moved,
            left_behind,
        })
    }

    /// The directory whose contents were moved
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Where the moved entries are held
    pub fn holding(&self) -> Option<&Path> {
        self.holding.as_deref()
    }

    /// Number of entries moved aside
    pub fn moved(&self) -> usize {
        self.moved.len()
    }

    /// Number of entries that stayed in the target
    pub fn left_behind(&self) -> usize {
        self.left_behind.len()
    }

    /// Put the pre-restore contents back, recording what happened in `report`
    pub fn restore(self, retry: &RetryPolicy, report: &mut RollbackReport) {
        let prepared = if self.target.exists() {
            clear_directory(&self.target, retry)
        } else {
            fs::create_dir_all(&self.target).map_err(EngineError::from)
        };
        if let Err(e) = prepared {
            report.warnings.push(format!(
                "Could not clear {} to put the previous data back: {}{}",
                self.target.display(),
                e,
                self.kept_hint()
            ));
            return;
        }

        if let Some(holding) = &self.holding {
            let mut returned = 0;
            for name in &self.moved {
                match fs::rename(holding.join(name), self.target.join(name)) {
                    Ok(()) => returned += 1,
                    Err(e) => report.warnings.push(format!(
                        "Failed to move {} back from {}: {}",
                        name.display(),
                        holding.display(),
                        e
                    )),
                }
            }
            if returned > 0 {
                report.actions.push(format!(
                    "Moved {} item(s) back into {}",
                    returned,
                    self.target.display()
                ));
            }
            if let Err(e) = fs::remove_dir(holding) {
                report.warnings.push(format!(
                    "Holding folder left in place: {}: {}",
                    holding.display(),
                    e
                ));
            }
        }

        for entry in &self.left_behind {
            let dest = self.target.join(&entry.name);
            let saved = self.snapshot.join(&entry.name);
            if !saved.exists() {
                report.warnings.push(format!(
                    "{} was cleared and is not in the safety snapshot",
                    dest.display()
                ));
                continue;
            }
            match copy_path(&saved, &dest) {
                Ok(_) if entry.whole_in_snapshot => report
                    .actions
                    .push(format!("Restored {} from the safety snapshot", dest.display())),
                Ok(_) => report.warnings.push(format!(
                    "Only the safety snapshot's part of {} was restored",
                    dest.display()
                )),
                Err(e) => report.warnings.push(format!(
                    "Failed to restore {} from the safety snapshot: {}",
                    dest.display(),
                    e
                )),
            }
        }
    }

    /// Delete the held contents once they are no longer needed
    pub fn release(self) -> EngineResult<()> {
        match self.holding {
            Some(holding) => fs::remove_dir_all(&holding).map_err(|e| {
                EngineError::Io(format!(
                    "Failed to delete holding folder {}: {}",
                    holding.display(),
                    e
                ))
            }),
            None => Ok(()),
        }
    }

    fn kept_hint(&self) -> String {
        match &self.holding {
            Some(holding) => format!("; previous data kept at {}", holding.display()),
            None => String::new(),
        }
    }
}

/// `.{name}.restore-hold-{timestamp}` next to `target`, not yet existing
fn holding_dir(target: &Path) -> Option<PathBuf> {
    let parent = target.parent()?;
    let name = target.file_name()?.to_string_lossy();
    let base = format!(
        ".{}.restore-hold-{}",
        name,
        Local::now().format("%Y%m%d_%H%M%S")
    );
    let mut candidate = parent.join(&base);
    let mut n = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{}_{}", base, n));
        n += 1;
    }
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn retry() -> RetryPolicy {
        RetryPolicy::new(1, Duration::from_millis(1))
    }

    fn live_dir(root: &Path) -> PathBuf {
        let live = root.join("live");
        fs::create_dir_all(live.join("Cache")).unwrap();
        fs::write(live.join("Preferences.xml"), "<Preferences/>").unwrap();
        fs::write(live.join("Cache").join("thumb.tmp"), "cache").unwrap();
        live
    }

    #[test]
    fn test_take_empties_target_and_restore_brings_everything_back() {
        let temp = TempDir::new().unwrap();
        let live = live_dir(temp.path());
        let snapshot = temp.path().join("snapshot");

        let held = SetAside::take(&live, &snapshot, &[PathBuf::from("Preferences.xml")]).unwrap();
        assert_eq!(held.moved(), 2);
        assert_eq!(held.left_behind(), 0);
        assert_eq!(fs::read_dir(&live).unwrap().count(), 0);
        let holding = held.holding().unwrap().to_path_buf();
        assert!(holding.join("Cache").join("thumb.tmp").exists());

        fs::write(live.join("Preferences.xml"), "restored").unwrap();
        let mut report = RollbackReport::default();
        held.restore(&retry(), &mut report);

        assert!(report.is_clean(), "{:?}", report.warnings);
        assert_eq!(fs::read_to_string(live.join("Preferences.xml")).unwrap(), "<Preferences/>");
        assert!(live.join("Cache").join("thumb.tmp").exists());
        assert!(!holding.exists());
    }

    #[test]
    fn test_release_deletes_holding_folder() {
        let temp = TempDir::new().unwrap();
        let live = live_dir(temp.path());

        let held = SetAside::take(&live, &temp.path().join("snapshot"), &[]).unwrap();
        let holding = held.holding().unwrap().to_path_buf();
        held.release().unwrap();

        assert!(!holding.exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_entries_left_behind_fall_back_to_snapshot_with_warnings() {
        let temp = TempDir::new().unwrap();
        let live = temp.path().join("live");
        let snapshot = temp.path().join("snapshot");
        fs::create_dir_all(&live).unwrap();
        fs::create_dir_all(snapshot.join("Plug-in Support").join("Databases")).unwrap();
        fs::write(snapshot.join("Preferences.xml"), "saved").unwrap();
        fs::write(
            snapshot.join("Plug-in Support").join("Databases").join("library.db"),
            "db",
        )
        .unwrap();

        let held = SetAside {
            target: live.clone(),
            holding: None,
            snapshot,
            moved: Vec::new(),
            left_behind: vec![
                LeftBehind {
                    name: PathBuf::from("Preferences.xml"),
                    whole_in_snapshot: true,
                },
                LeftBehind {
                    name: PathBuf::from("Plug-in Support"),
                    whole_in_snapshot: false,
                },
                LeftBehind {
                    name: PathBuf::from("Cache"),
                    whole_in_snapshot: false,
                },
            ],
        };
        let mut report = RollbackReport::default();
        held.restore(&retry(), &mut report);

        assert_eq!(fs::read_to_string(live.join("Preferences.xml")).unwrap(), "saved");
        assert!(live.join("Plug-in Support/Databases/library.db").exists());
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.iter().any(|w| w.contains("Only the safety snapshot's part")));
        assert!(report.warnings.iter().any(|w| w.contains("not in the safety snapshot")));
    }
}
