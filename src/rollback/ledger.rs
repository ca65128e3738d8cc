//! The rollback ledger

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use super::report::RollbackReport;
use super::set_aside::SetAside;
use crate::backup::ConfigStore;
use crate::error::{EngineError, EngineResult};
use crate::fsops::{clear_directory, copy_path, copy_tree, RetryPolicy};
use crate::oplog::Reporter;
use crate::service::ServiceController;

/// Collaborators a rollback needs to undo changes
pub struct RollbackContext<'a> {
    /// Restores the service's pre-operation state
    pub service: &'a dyn ServiceController,
    /// Re-imports a replaced configuration
    pub config_store: Option<&'a dyn ConfigStore>,
    /// Retry policy for clearing directories being restored
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
struct Overwrite {
    original: PathBuf,
    saved: PathBuf,
}

/// Record of the side effects of one operation
///
/// Owned by the orchestrator running the operation. The scratch directory
/// holding saved copies is deleted when the ledger is dropped.
pub struct RollbackLedger {
    service_was_running: Option<bool>,
    destination: Option<PathBuf>,
    created_dirs: Vec<PathBuf>,
    created_files: Vec<PathBuf>,
    recorded: HashSet<PathBuf>,
    overwrites: Vec<Overwrite>,
    set_asides: Vec<SetAside>,
    replaced_config: Option<PathBuf>,
    scratch: TempDir,
    config_done: bool,
    data_done: bool,
}

impl RollbackLedger {
    /// Start an empty ledger with a fresh scratch directory
    pub fn new() -> EngineResult<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("pms-backup-")
            .tempdir()
            .map_err(|e| EngineError::Io(format!("Failed to create scratch directory: {}", e)))?;
        Ok(Self {
            service_was_running: None,
            destination: None,
            created_dirs: Vec::new(),
            created_files: Vec::new(),
            recorded: HashSet::new(),
            overwrites: Vec::new(),
            set_asides: Vec::new(),
            replaced_config: None,
            scratch,
            config_done: false,
            data_done: false,
        })
    }

    /// Remember whether the service was running before the operation
    pub fn record_service_state(&mut self, running: bool) {
        self.service_was_running = Some(running);
    }

    /// Service state recorded at the start, if tracked
    pub fn service_was_running(&self) -> Option<bool> {
        self.service_was_running
    }

    /// Set the operation's destination root
    pub fn set_destination(&mut self, path: impl Into<PathBuf>) {
        self.destination = Some(path.into());
    }

    /// The operation's destination root
    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    /// Record a directory the operation created
    pub fn record_directory_created(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.recorded.insert(path.clone()) {
            self.created_dirs.push(path);
        }
    }

    /// Record a file the operation created
    pub fn record_file_created(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.recorded.insert(path.clone()) {
            self.created_files.push(path);
        }
    }

    /// Record that `original` was overwritten and its old content saved at `saved`
    pub fn record_overwrite(&mut self, original: impl Into<PathBuf>, saved: impl Into<PathBuf>) {
        self.overwrites.push(Overwrite {
            original: original.into(),
            saved: saved.into(),
        });
    }

    /// Record contents moved aside before their directory was cleared
    pub fn record_set_aside(&mut self, set_aside: SetAside) {
        self.set_asides.push(set_aside);
    }

    /// Holding folders of contents still set aside
    pub fn held_paths(&self) -> Vec<PathBuf> {
        self.set_asides
            .iter()
            .filter_map(|s| s.holding().map(Path::to_path_buf))
            .collect()
    }

    /// Delete contents set aside once the operation has succeeded
    ///
    /// Returns a message for every holding folder that could not be deleted.
    pub fn release_set_asides(&mut self) -> Vec<String> {
        self.set_asides
            .drain(..)
            .filter_map(|s| s.release().err().map(|e| e.to_string()))
            .collect()
    }

    /// Record that the live configuration was replaced; `saved` holds the old one
    pub fn record_config_replaced(&mut self, saved: impl Into<PathBuf>) {
        self.replaced_config = Some(saved.into());
    }

    /// Create `path` and any missing parents, recording each one created
    ///
    /// Existing directories are reused and not recorded.
    pub fn ensure_dir(&mut self, path: &Path) -> EngineResult<()> {
        let mut missing = Vec::new();
        let mut current = Some(path);
        while let Some(dir) = current {
            if dir.exists() {
                break;
            }
            missing.push(dir.to_path_buf());
            current = dir.parent();
        }

        let result = fs::create_dir_all(path);
        // Record outermost first, even if creation stopped half way
        for dir in missing.into_iter().rev() {
            if dir.exists() {
                self.record_directory_created(dir);
            }
        }
        result.map_err(|e| {
            EngineError::Io(format!("Failed to create directory {}: {}", path.display(), e))
        })
    }

    /// Copy `original` into the scratch area as `name` and record the overwrite
    pub fn save_copy(&mut self, original: &Path, name: &str) -> EngineResult<PathBuf> {
        let saved = self.scratch.path().join(name);
        copy_path(original, &saved)?;
        self.record_overwrite(original, saved.clone());
        Ok(saved)
    }

    /// Scratch directory for saved copies and intermediate files
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Mark the configuration stage complete
    pub fn mark_config_done(&mut self) {
        self.config_done = true;
    }

    /// Mark the data stage complete
    pub fn mark_data_done(&mut self) {
        self.data_done = true;
    }

    /// Whether the configuration stage completed
    pub fn config_done(&self) -> bool {
        self.config_done
    }

    /// Whether the data stage completed
    pub fn data_done(&self) -> bool {
        self.data_done
    }

    /// Whether nothing has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.created_dirs.is_empty()
            && self.created_files.is_empty()
            && self.overwrites.is_empty()
            && self.set_asides.is_empty()
            && self.replaced_config.is_none()
    }

    /// Directories recorded as created, in creation order
    pub fn created_dirs(&self) -> &[PathBuf] {
        &self.created_dirs
    }

    /// Files recorded as created
    pub fn created_files(&self) -> &[PathBuf] {
        &self.created_files
    }

    /// Undo everything recorded, as far as possible
    ///
    /// Order: service state, overwritten files and configuration, contents
    /// set aside, created files, then created directories newest first and only when empty.
    /// Entries are consumed, so a second call does nothing.
    pub fn rollback(&mut self, ctx: &RollbackContext<'_>, reporter: &mut Reporter) -> RollbackReport {
        let mut report = RollbackReport::default();
        reporter.info("Starting rollback");

        // Step 1: service state
        if let Some(was_running) = self.service_was_running.take() {
            self.restore_service(ctx.service, was_running, &mut report);
        }

        // Step 2: overwritten content
        if let Some(saved) = self.replaced_config.take() {
            match ctx.config_store {
                Some(store) => match store.import(&saved) {
                    Ok(()) => report
                        .actions
                        .push(format!("Re-imported previous configuration into {}", store.describe())),
                    Err(e) => report
                        .warnings
                        .push(format!("Failed to re-import previous configuration: {}", e)),
                },
                None => report.warnings.push(format!(
                    "Previous configuration saved at {} was not re-imported",
                    saved.display()
                )),
            }
        }
        for overwrite in self.overwrites.drain(..).rev() {
            match restore_overwrite(&overwrite, &ctx.retry) {
                Ok(()) => report.actions.push(format!(
                    "Restored {} from {}",
                    overwrite.original.display(),
                    overwrite.saved.display()
                )),
                Err(e) => report.warnings.push(format!(
                    "Failed to restore {} from {}: {}",
                    overwrite.original.display(),
                    overwrite.saved.display(),
                    e
                )),
            }
        }

        for set_aside in self.set_asides.drain(..).rev() {
            set_aside.restore(&ctx.retry, &mut report);
        }

        // Step 3: created files
        for file in self.created_files.drain(..) {
            if !file.exists() {
                report
                    .warnings
                    .push(format!("Created file already missing: {}", file.display()));
                continue;
            }
            match fs::remove_file(&file) {
                Ok(()) => report.actions.push(format!("Deleted file {}", file.display())),
                Err(e) => report
                    .warnings
                    .push(format!("Failed to delete file {}: {}", file.display(), e)),
            }
        }

        // Step 4: created directories, newest first
        self.recorded.clear();
        for dir in self.created_dirs.drain(..).rev() {
            if !dir.exists() {
                report
                    .warnings
                    .push(format!("Created directory already missing: {}", dir.display()));
                continue;
            }
            let is_empty = fs::read_dir(&dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !is_empty {
                report.warnings.push(format!(
                    "Directory not empty, left in place: {}",
                    dir.display()
                ));
                continue;
            }
            match fs::remove_dir(&dir) {
                Ok(()) => report.actions.push(format!("Removed directory {}", dir.display())),
                Err(e) => report
                    .warnings
                    .push(format!("Failed to remove directory {}: {}", dir.display(), e)),
            }
        }

        for action in &report.actions {
            debug!("Rollback: {}", action);
        }
        for warning in &report.warnings {
            reporter.warn(format!("Rollback: {}", warning));
        }
        reporter.info(report.summary());
        report
    }

    fn restore_service(&self, service: &dyn ServiceController, was_running: bool, report: &mut RollbackReport) {
        let running = match service.is_running() {
            Ok(running) => running,
            Err(e) => {
                report
                    .warnings
                    .push(format!("Could not query {}: {}", service.describe(), e));
                // Assume the opposite so the state change is attempted
                !was_running
            }
        };

        if was_running && !running {
            match service.start() {
                Ok(()) => report.actions.push(format!("Restarted {}", service.describe())),
                Err(e) => report
                    .warnings
                    .push(format!("Failed to restart {}: {}", service.describe(), e)),
            }
        } else if !was_running && running {
            match service.stop() {
                Ok(()) => report.actions.push(format!("Stopped {}", service.describe())),
                Err(e) => report
                    .warnings
                    .push(format!("Failed to stop {}: {}", service.describe(), e)),
            }
        }
    }
}

fn restore_overwrite(overwrite: &Overwrite, retry: &RetryPolicy) -> EngineResult<()> {
    if !overwrite.saved.exists() {
        return Err(EngineError::Io("saved copy is missing".into()));
    }
    if overwrite.saved.is_dir() {
        if overwrite.original.exists() {
            clear_directory(&overwrite.original, retry)?;
        }
        copy_tree(&overwrite.saved, &overwrite.original)?;
    } else {
        copy_path(&overwrite.saved, &overwrite.original)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::NullSink;
    use crate::test_support::{FakeConfigStore, FakeService};
    use std::sync::Arc;
    use std::time::Duration;

    fn reporter() -> Reporter {
        Reporter::new("test", Arc::new(NullSink))
    }

    fn ctx<'a>(service: &'a FakeService, store: Option<&'a FakeConfigStore>) -> RollbackContext<'a> {
        RollbackContext {
            service,
            config_store: store.map(|s| s as &dyn ConfigStore),
            retry: RetryPolicy::new(1, Duration::from_millis(1)),
        }
    }

    #[test]
    fn test_created_artifacts_are_removed() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path().join("Monday 04-03-2024-Backup");
        let mut ledger = RollbackLedger::new().unwrap();

        ledger.ensure_dir(&root.join("RegBackup")).unwrap();
        ledger.ensure_dir(&root.join("FileBackup")).unwrap();
        let reg = root.join("RegBackup").join("Regbackup-Monday.reg");
        fs::write(&reg, "REGEDIT4\r\n").unwrap();
        ledger.record_file_created(&reg);
        assert_eq!(ledger.created_dirs().len(), 3);

        let service = FakeService::stopped();
        let report = ledger.rollback(&ctx(&service, None), &mut reporter());

        assert!(report.is_clean(), "{:?}", report.warnings);
        assert!(!root.exists());
        assert!(temp.path().exists());
    }

    #[test]
    fn test_existing_directories_are_reused_not_recorded() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut ledger = RollbackLedger::new().unwrap();
        ledger.ensure_dir(temp.path()).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_non_empty_directory_left_with_warning() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("created");
        let mut ledger = RollbackLedger::new().unwrap();
        ledger.ensure_dir(&dir).unwrap();
        fs::write(dir.join("user-added.txt"), "keep me").unwrap();

        let service = FakeService::stopped();
        let report = ledger.rollback(&ctx(&service, None), &mut reporter());

        assert!(!report.is_clean());
        assert!(dir.join("user-added.txt").exists());
        assert!(report.warnings[0].contains("not empty"));
    }

    #[test]
    fn test_overwrite_restored_and_service_restarted() {
        let temp = tempfile::TempDir::new().unwrap();
        let file = temp.path().join("Regbackup-Monday.reg");
        fs::write(&file, "old").unwrap();

        let mut ledger = RollbackLedger::new().unwrap();
        ledger.record_service_state(true);
        let saved = ledger.save_copy(&file, "Regbackup-Monday_original.reg").unwrap();
        assert!(saved.starts_with(ledger.scratch_dir()));
        fs::write(&file, "new").unwrap();

        let service = FakeService::stopped();
        let report = ledger.rollback(&ctx(&service, None), &mut reporter());

        assert!(report.is_clean());
        assert_eq!(fs::read_to_string(&file).unwrap(), "old");
        assert!(service.is_up());
    }

    #[test]
    fn test_directory_overwrite_restores_exact_tree() {
        let temp = tempfile::TempDir::new().unwrap();
        let target = temp.path().join("data");
        let snapshot = temp.path().join("snapshot");
        fs::create_dir_all(&target).unwrap();
        fs::create_dir_all(&snapshot).unwrap();
        fs::write(snapshot.join("Preferences.xml"), "original").unwrap();
        fs::write(target.join("Preferences.xml"), "broken").unwrap();
        fs::write(target.join("stray.tmp"), "x").unwrap();

        let mut ledger = RollbackLedger::new().unwrap();
        ledger.record_overwrite(&target, &snapshot);
        let service = FakeService::stopped();
        let report = ledger.rollback(&ctx(&service, None), &mut reporter());

        assert!(report.is_clean());
        assert_eq!(fs::read_to_string(target.join("Preferences.xml")).unwrap(), "original");
        assert!(!target.join("stray.tmp").exists());
    }

    #[test]
    fn test_failures_become_warnings_and_rollback_continues() {
        let temp = tempfile::TempDir::new().unwrap();
        let created = temp.path().join("made");
        let mut ledger = RollbackLedger::new().unwrap();
        ledger.record_service_state(true);
        ledger.record_overwrite(temp.path().join("a"), temp.path().join("missing-copy"));
        ledger.record_config_replaced(temp.path().join("old.reg"));
        ledger.ensure_dir(&created).unwrap();

        let service = FakeService::stopped().failing_start();
        let store = FakeConfigStore::new("REGEDIT4\r\n").failing_import();
        let report = ledger.rollback(&ctx(&service, Some(&store)), &mut reporter());

        assert_eq!(report.warnings.len(), 3);
        assert!(!created.exists());
    }

    #[test]
    fn test_second_rollback_is_a_no_op() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut ledger = RollbackLedger::new().unwrap();
        ledger.ensure_dir(&temp.path().join("x")).unwrap();

        let service = FakeService::stopped();
        ledger.rollback(&ctx(&service, None), &mut reporter());
        let second = ledger.rollback(&ctx(&service, None), &mut reporter());
        assert!(second.actions.is_empty());
        assert!(second.is_clean());
    }
}
