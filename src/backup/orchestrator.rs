//! The backup operation
//!
//! Stages run strictly in order: stop the service (optional), export the
//! configuration (optional), mirror the data directory (optional), restart
//! the service. Everything created on the way is recorded in the ledger so a
//! failure can be rolled back before the error is returned.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use walkdir::WalkDir;

use super::layout::BackupLayout;
use crate::config::{EnginePaths, Settings};
use crate::engine::Collaborators;
use crate::error::{EngineError, EngineResult, OperationFailure};
use crate::fsops::{MirrorOutcome, MirrorRequest};
use crate::oplog::{OperationLog, ProgressSink, Reporter};
use crate::rollback::RollbackLedger;

/// Inputs of one backup
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Folder the package is created in
    pub backup_root: PathBuf,
    /// Export the configuration
    pub include_config: bool,
    /// Mirror the data directory
    pub include_data: bool,
    /// Stop the service while copying
    pub stop_service: bool,
    /// Undo partial work on failure
    pub enable_rollback: bool,
    /// Deadline for the external mirroring tool
    pub mirror_timeout: Duration,
    /// Date used in the package name; today if `None`
    pub date: Option<NaiveDate>,
}

impl BackupOptions {
    /// Options from persisted settings
    pub fn from_settings(settings: &Settings, paths: &EnginePaths) -> Self {
        Self {
            backup_root: settings.backup_root(paths),
            include_config: settings.include_config,
            include_data: settings.include_data,
            stop_service: settings.stop_service,
            enable_rollback: settings.enable_rollback,
            mirror_timeout: settings.mirror_timeout(),
            date: None,
        }
    }
}

/// Result of a successful backup
#[derive(Debug)]
pub struct BackupReport {
    /// Package folder
    pub package: PathBuf,
    /// Whether the configuration was exported
    pub config_exported: bool,
    /// Mirror accounting, if data was included
    pub mirror: Option<MirrorOutcome>,
    /// Everything logged
    pub log: OperationLog,
}

/// Drives backups
pub struct BackupOrchestrator {
    collab: Collaborators,
}

impl BackupOrchestrator {
    /// Orchestrator over the given collaborators
    pub fn new(collab: Collaborators) -> Self {
        Self { collab }
    }

    /// Run a backup, rolling back on failure when enabled
    pub fn run(
        &self,
        options: &BackupOptions,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<BackupReport, OperationFailure> {
        let mut reporter = Reporter::new("backup", sink);
        let _span = reporter.span().clone().entered();

        let mut ledger = match RollbackLedger::new() {
            Ok(ledger) => ledger,
            Err(e) => {
                reporter.error(format!("Backup failed: {}", e));
                return Err(OperationFailure::without_rollback(e, reporter.finish()));
            }
        };

        let date = options.date.unwrap_or_else(|| Local::now().date_naive());
        let layout = BackupLayout::for_date(&options.backup_root, date);
        ledger.set_destination(layout.root());

        match self.execute(options, &layout, &mut ledger, &mut reporter) {
            Ok(mirror) => {
                reporter.progress(1.0, "Done");
                reporter.info(format!("Backup completed: {}", layout.root().display()));
                Ok(BackupReport {
                    package: layout.root().to_path_buf(),
                    config_exported: ledger.config_done(),
                    mirror,
                    log: reporter.finish(),
                })
            }
            Err(error) => {
                reporter.error(format!("Backup failed: {}", error));
                if error.is_validation() {
                    return Err(OperationFailure::without_rollback(error, reporter.finish()));
                }

                let rollback = if options.enable_rollback {
                    let ctx = self.collab.rollback_context();
                    Some(ledger.rollback(&ctx, &mut reporter))
                } else {
                    reporter.warn(format!(
                        "Rollback disabled; partial backup left at {}",
                        layout.root().display()
                    ));
                    self.restore_service(&ledger, &mut reporter);
                    None
                };

                Err(OperationFailure {
                    error,
                    rollback,
                    snapshot: None,
                    log: reporter.finish(),
                })
            }
        }
    }

    fn execute(
        &self,
        options: &BackupOptions,
        layout: &BackupLayout,
        ledger: &mut RollbackLedger,
        reporter: &mut Reporter,
    ) -> EngineResult<Option<MirrorOutcome>> {
        let service = self.collab.service.as_ref();
        let data_source = &self.collab.profile.data_dir;

        // Step 1: preconditions
        reporter.progress(0.0, "Checking");
        if !options.include_config && !options.include_data {
            return Err(EngineError::ValidationFailed(
                "Nothing to back up: configuration and data are both excluded".into(),
            ));
        }
        if options.include_data && !data_source.is_dir() {
            return Err(EngineError::ValidationFailed(format!(
                "Data directory not found: {}",
                data_source.display()
            )));
        }

        let was_running = service.is_running().unwrap_or_else(|e| {
            reporter.warn(format!("Could not query {}: {}", service.describe(), e));
            false
        });
        ledger.record_service_state(was_running);
        reporter.info(format!(
            "Backing up to {} ({} is {})",
            layout.root().display(),
            service.describe(),
            if was_running { "running" } else { "stopped" }
        ));

        // Step 2: stop the service
        let stopped = options.stop_service && was_running;
        if stopped {
            reporter.progress(0.1, "Stopping service");
            service.stop()?;
            reporter.info(format!("Stopped {}", service.describe()));
        }

        // Step 3: configuration
        if options.include_config {
            reporter.progress(0.2, "Exporting configuration");
            self.export_config(layout, ledger, reporter)?;
            ledger.mark_config_done();
        }

        // Step 4: data
        let mut mirror = None;
        if options.include_data {
            reporter.progress(0.4, "Copying data");
            mirror = Some(self.mirror_data(options, layout, ledger, reporter)?);
            ledger.mark_data_done();
        }

        // Step 5: restart
        if stopped {
            reporter.progress(0.9, "Starting service");
            service.start()?;
            reporter.info(format!("Restarted {}", service.describe()));
        }

        Ok(mirror)
    }

    fn export_config(
        &self,
        layout: &BackupLayout,
        ledger: &mut RollbackLedger,
        reporter: &mut Reporter,
    ) -> EngineResult<()> {
        let store = self.collab.config_store.as_ref();
        ledger.ensure_dir(&layout.reg_dir())?;

        let reg_file = layout.reg_file();
        let existed = reg_file.exists();
        if existed {
            let saved = ledger.save_copy(&reg_file, &layout.original_reg_name())?;
            reporter.info(format!("Saved existing export to {}", saved.display()));
        }

        let result = store.export(&reg_file);
        if !existed && reg_file.exists() {
            ledger.record_file_created(&reg_file);
        }
        result?;

        reporter.info(format!(
            "Exported configuration from {} to {}",
            store.describe(),
            reg_file.display()
        ));
        Ok(())
    }

    fn mirror_data(
        &self,
        options: &BackupOptions,
        layout: &BackupLayout,
        ledger: &mut RollbackLedger,
        reporter: &mut Reporter,
    ) -> EngineResult<MirrorOutcome> {
        let data_dir = layout.data_dir();
        let log_file = layout.log_file();
        ledger.ensure_dir(&data_dir)?;
        ledger.ensure_dir(&layout.logs_dir())?;

        let log_existed = log_file.exists();
        let before = existing_entries(&data_dir);

        let request = MirrorRequest::new(
            &self.collab.profile.data_dir,
            &data_dir,
            options.mirror_timeout,
        )
        .excluding(self.collab.profile.excluded_paths())
        .with_log(&log_file);
        let result = self.collab.copy_strategy().mirror(&request, reporter);

        // Track whatever the copy produced, even a partial one
        track_new_entries(ledger, &data_dir, &before);
        if !log_existed && log_file.exists() {
            ledger.record_file_created(&log_file);
        }

        let outcome = result?;
        reporter.info(format!(
            "Copied {} of {} file(s) to {}",
            outcome.files_copied,
            outcome.files_found,
            data_dir.display()
        ));
        Ok(outcome)
    }

    /// Put the service back the way it was when rollback is disabled
    fn restore_service(&self, ledger: &RollbackLedger, reporter: &mut Reporter) {
        let service = self.collab.service.as_ref();
        if ledger.service_was_running() != Some(true) {
            return;
        }
        if matches!(service.is_running(), Ok(true)) {
            return;
        }
        match service.start() {
            Ok(()) => reporter.info(format!("Restarted {}", service.describe())),
            Err(e) => reporter.error(format!("Failed to restart {}: {}", service.describe(), e)),
        }
    }
}

fn existing_entries(root: &Path) -> HashSet<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .map(|entry| entry.into_path())
        .collect()
}

/// Record every entry below `root` that is not in `before`, parents first
fn track_new_entries(ledger: &mut RollbackLedger, root: &Path, before: &HashSet<PathBuf>) {
    for entry in WalkDir::new(root).min_depth(1).into_iter().filter_map(Result::ok) {
        if before.contains(entry.path()) {
            continue;
        }
        if entry.file_type().is_dir() {
            ledger.record_directory_created(entry.into_path());
        } else {
            ledger.record_file_created(entry.into_path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsops::{MirrorMethod, RetryPolicy};
    use crate::oplog::NullSink;
    use crate::process::{ScriptedProcess, ScriptedResponse};
    use crate::test_support::{fake_data_dir, FakeConfigStore, FakeService, FixedFreeSpace, FAKE_REG_CONTENT};
    use crate::config::ServiceProfile;
    use crate::fsops::MirrorTool;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        service: Arc<FakeService>,
        store: Arc<FakeConfigStore>,
    }

    impl Fixture {
        fn new(service: FakeService, store: FakeConfigStore) -> Self {
            let temp = TempDir::new().unwrap();
            fake_data_dir(&temp.path().join("data"));
            Self {
                temp,
                service: Arc::new(service),
                store: Arc::new(store),
            }
        }

        fn orchestrator(&self, process: ScriptedProcess) -> BackupOrchestrator {
            BackupOrchestrator::new(Collaborators {
                service: self.service.clone(),
                config_store: self.store.clone(),
                process: Arc::new(process),
                free_space: Arc::new(FixedFreeSpace(None)),
                profile: ServiceProfile::plex().with_data_dir(self.temp.path().join("data")),
                retry: RetryPolicy::new(1, Duration::from_millis(1)),
                mirror_tool: Some(MirrorTool::Rsync),
            })
        }

        fn options(&self) -> BackupOptions {
            BackupOptions {
                backup_root: self.temp.path().join("backups"),
                include_config: true,
                include_data: true,
                stop_service: true,
                enable_rollback: true,
                mirror_timeout: Duration::from_secs(5),
                date: NaiveDate::from_ymd_opt(2024, 3, 4),
            }
        }
    }

    fn failing_rsync() -> ScriptedProcess {
        ScriptedProcess::new().on("rsync", ScriptedResponse::failure(12, "protocol error"))
    }

    #[test]
    fn test_backup_creates_layout_and_restarts_service() {
        let fx = Fixture::new(FakeService::running(), FakeConfigStore::new(FAKE_REG_CONTENT));
        let report = fx
            .orchestrator(failing_rsync())
            .run(&fx.options(), Arc::new(NullSink))
            .unwrap();

        let root = fx.temp.path().join("backups").join("Monday 04-03-2024-Backup");
        assert_eq!(report.package, root);
        assert_eq!(
            fs::read_to_string(root.join("RegBackup").join("Regbackup-Monday.reg")).unwrap(),
            FAKE_REG_CONTENT
        );
        assert!(root.join("FileBackup").join("Preferences.xml").exists());
        assert!(!root.join("FileBackup").join("Cache").exists());
        assert!(root.join("Logs").join("LogBackup-Monday.txt").exists());
        assert_eq!(report.mirror.unwrap().method, MirrorMethod::Fallback);
        assert!(fx.service.is_up());
        assert_eq!(fx.service.events(), vec!["stop", "start"]);
    }

    #[test]
    fn test_config_failure_rolls_back_everything() {
        let fx = Fixture::new(
            FakeService::running(),
            FakeConfigStore::new(FAKE_REG_CONTENT).failing_export(),
        );
        let failure = fx
            .orchestrator(ScriptedProcess::new())
            .run(&fx.options(), Arc::new(NullSink))
            .unwrap_err();

        assert!(matches!(failure.error, EngineError::ExternalToolFailed { .. }));
        assert!(failure.fully_reverted());
        assert_eq!(fs::read_dir(fx.temp.path()).unwrap().count(), 1);
        assert!(fx.service.is_up());
    }

    #[test]
    fn test_data_failure_removes_mirrored_files() {
        let fx = Fixture::new(FakeService::running(), FakeConfigStore::new(FAKE_REG_CONTENT));
        // Tool succeeds, but the restart afterwards fails
        let service = Arc::new(FakeService::running().failing_start());
        let orchestrator = BackupOrchestrator::new(Collaborators {
            service: service.clone(),
            ..fx.orchestrator(failing_rsync()).collab
        });

        let failure = orchestrator.run(&fx.options(), Arc::new(NullSink)).unwrap_err();

        assert!(matches!(failure.error, EngineError::ServiceControl(_)));
        let rollback = failure.rollback.unwrap();
        // The only warning is the service that still refuses to start
        assert_eq!(rollback.warnings.len(), 1, "{:?}", rollback.warnings);
        assert!(!fx.temp.path().join("backups").exists());
    }

    #[test]
    fn test_existing_package_is_reused_and_export_saved() {
        let fx = Fixture::new(FakeService::stopped(), FakeConfigStore::new(FAKE_REG_CONTENT));
        let reg_dir = fx
            .temp
            .path()
            .join("backups")
            .join("Monday 04-03-2024-Backup")
            .join("RegBackup");
        fs::create_dir_all(&reg_dir).unwrap();
        fs::write(reg_dir.join("Regbackup-Monday.reg"), "earlier export").unwrap();

        let options = BackupOptions {
            include_data: false,
            ..fx.options()
        };
        fx.orchestrator(ScriptedProcess::new())
            .run(&options, Arc::new(NullSink))
            .unwrap();

        assert_eq!(
            fs::read_to_string(reg_dir.join("Regbackup-Monday.reg")).unwrap(),
            FAKE_REG_CONTENT
        );
        assert!(fx.service.events().is_empty());
    }

    #[test]
    fn test_nothing_to_back_up_is_rejected_without_side_effects() {
        let fx = Fixture::new(FakeService::running(), FakeConfigStore::new(FAKE_REG_CONTENT));
        let options = BackupOptions {
            include_config: false,
            include_data: false,
            ..fx.options()
        };
        let failure = fx
            .orchestrator(ScriptedProcess::new())
            .run(&options, Arc::new(NullSink))
            .unwrap_err();

        assert!(failure.error.is_validation());
        assert!(failure.rollback.is_none());
        assert!(fx.service.events().is_empty());
    }

    #[test]
    fn test_rollback_disabled_keeps_partial_backup_but_restarts_service() {
        let fx = Fixture::new(
            FakeService::running(),
            FakeConfigStore::new(FAKE_REG_CONTENT).failing_export(),
        );
        let options = BackupOptions {
            enable_rollback: false,
            ..fx.options()
        };
        let failure = fx
            .orchestrator(ScriptedProcess::new())
            .run(&options, Arc::new(NullSink))
            .unwrap_err();

        assert!(failure.rollback.is_none());
        assert!(fx.temp.path().join("backups").join("Monday 04-03-2024-Backup").exists());
        assert!(fx.service.is_up());
    }
}
