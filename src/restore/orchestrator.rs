//! The restore operation
//!
//! Validate, snapshot, stop, restore configuration, clear, copy, verify.
//! Validation is the only stage that rejects without side effects. From the
//! snapshot on, a failure rolls the ledger back (unless the operation ran
//! out of time), and the service is started again whatever happened.
//!
//! The ledger only learns about the data directory when it is about to be
//! cleared, so an earlier failure leaves the live data as it was.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::snapshot::SafetySnapshot;
use crate::backup::archive::{extract_zip, find_component, is_zip};
use crate::backup::layout::{DATA_DIR, REG_DIR};
use crate::config::Settings;
use crate::engine::Collaborators;
use crate::error::{EngineError, EngineResult, OperationFailure};
use crate::fsops::{clear_directory, MirrorOutcome, MirrorRequest};
use crate::oplog::{OperationLog, ProgressSink, Reporter};
use crate::rollback::{RollbackLedger, RollbackReport, SetAside};

/// Inputs of one restore
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Package folder or `.zip`
    pub package: PathBuf,
    /// Data directory to restore into
    pub target: PathBuf,
    /// Import the package's configuration export
    pub restore_config: bool,
    /// Roll back automatically on failure
    pub enable_rollback: bool,
    /// Wall-clock budget of the whole restore
    pub timeout: Duration,
    /// Deadline for the external mirroring tool
    pub mirror_timeout: Duration,
    /// Folder the safety snapshot is created in
    pub snapshot_root: PathBuf,
}

impl RestoreOptions {
    /// Options for restoring `package` with persisted defaults
    pub fn from_settings(package: impl Into<PathBuf>, settings: &Settings) -> Self {
        Self {
            package: package.into(),
            target: settings.profile().data_dir,
            restore_config: settings.include_config,
            enable_rollback: settings.enable_rollback,
            timeout: settings.restore_timeout(),
            mirror_timeout: settings.mirror_timeout(),
            snapshot_root: std::env::temp_dir(),
        }
    }
}

/// Result of a successful restore
#[derive(Debug)]
pub struct RestoreReport {
    /// Copy accounting, if the package carried data
    pub mirror: Option<MirrorOutcome>,
    /// Whether the configuration was imported
    pub config_restored: bool,
    /// Whether the service was running when the operation ended
    pub service_running: bool,
    /// Everything logged
    pub log: OperationLog,
}

/// Drives restores
pub struct RestoreOrchestrator {
    collab: Collaborators,
}

impl RestoreOrchestrator {
    /// Orchestrator over the given collaborators
    pub fn new(collab: Collaborators) -> Self {
        Self { collab }
    }

    /// Run a restore
    pub fn run(
        &self,
        options: &RestoreOptions,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<RestoreReport, OperationFailure> {
        let mut reporter = Reporter::new("restore", sink);
        let _span = reporter.span().clone().entered();
        let deadline = Instant::now() + options.timeout;

        // Step 1: validation, no side effects
        reporter.progress(0.0, "Validating backup");
        if let Err(e) = self.validate(options, &mut reporter) {
            reporter.error(format!("Restore rejected: {}", e));
            return Err(OperationFailure::without_rollback(e, reporter.finish()));
        }

        let mut ledger = match RollbackLedger::new() {
            Ok(ledger) => ledger,
            Err(e) => {
                reporter.error(format!("Restore failed: {}", e));
                return Err(OperationFailure::without_rollback(e, reporter.finish()));
            }
        };
        ledger.set_destination(&options.target);

        // Step 2: safety snapshot
        reporter.progress(0.1, "Taking safety snapshot");
        let snapshot = match SafetySnapshot::take(
            &options.target,
            &self.collab.profile.snapshot_paths,
            &options.snapshot_root,
        ) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                reporter.error(format!("Restore failed: {}", e));
                return Err(OperationFailure::without_rollback(e, reporter.finish()));
            }
        };
        for warning in snapshot.warnings() {
            reporter.warn(warning.clone());
        }
        reporter.info(format!(
            "Safety snapshot of {} file(s) taken at {}",
            snapshot.files(),
            snapshot.path().display()
        ));

        let result = self.execute(options, deadline, snapshot.path(), &mut ledger, &mut reporter);

        // Failure path first, while the service is still down
        let outcome = match result {
            Ok(mirror) => Ok((mirror, snapshot)),
            Err(error) => {
                reporter.error(format!("Restore failed: {}", error));
                Err(self.handle_failure(error, options, &mut ledger, snapshot, &mut reporter))
            }
        };

        // Unconditional: never leave the service down
        let service_running = self.ensure_service_running(&mut reporter);

        match outcome {
            Ok((mirror, snapshot)) => {
                if let Err(e) = snapshot.discard() {
                    reporter.warn(e.to_string());
                }
                for warning in ledger.release_set_asides() {
                    reporter.warn(warning);
                }
                reporter.progress(1.0, "Done");
                reporter.info("Restore completed successfully");
                Ok(RestoreReport {
                    mirror,
                    config_restored: ledger.config_done(),
                    service_running,
                    log: reporter.finish(),
                })
            }
            Err((error, rollback, kept)) => Err(OperationFailure {
                error,
                rollback,
                snapshot: kept,
                log: reporter.finish(),
            }),
        }
    }

    fn validate(&self, options: &RestoreOptions, reporter: &mut Reporter) -> EngineResult<()> {
        let validator = self.collab.validator();
        let kind = validator.check(&options.package)?;
        reporter.info(format!(
            "Backup package validated: {} ({:?})",
            options.package.display(),
            kind
        ));

        if !validator.check_disk_space(&options.package, &options.target) {
            return Err(EngineError::ValidationFailed(format!(
                "Insufficient disk space to restore {} into {}",
                options.package.display(),
                options.target.display()
            )));
        }
        Ok(())
    }

    fn execute(
        &self,
        options: &RestoreOptions,
        deadline: Instant,
        snapshot: &Path,
        ledger: &mut RollbackLedger,
        reporter: &mut Reporter,
    ) -> EngineResult<Option<MirrorOutcome>> {
        let service = self.collab.service.as_ref();
        let check_deadline = || {
            if Instant::now() >= deadline {
                Err(EngineError::OperationTimedOut {
                    budget: options.timeout,
                })
            } else {
                Ok(())
            }
        };

        // Step 3: unpack
        reporter.progress(0.2, "Preparing backup");
        let package_root = if is_zip(&options.package) {
            let dir = ledger.scratch_dir().join("package");
            let count = extract_zip(&options.package, &dir)?;
            reporter.info(format!("Extracted {} file(s) from archive", count));
            dir
        } else {
            options.package.clone()
        };
        let data_source = find_component(&package_root, DATA_DIR);
        let reg_source = find_component(&package_root, REG_DIR).and_then(|dir| first_reg_file(&dir));
        check_deadline()?;

        // Step 4: stop the service
        reporter.progress(0.3, "Stopping service");
        let was_running = service.is_running().unwrap_or_else(|e| {
            reporter.warn(format!("Could not query {}: {}", service.describe(), e));
            true
        });
        if was_running {
            service.stop()?;
            reporter.info(format!("Stopped {}", service.describe()));
        }

        // Step 5: configuration
        if options.restore_config {
            match reg_source {
                Some(reg) => {
                    reporter.progress(0.4, "Restoring configuration");
                    self.restore_config(&reg, ledger, reporter)?;
                    ledger.mark_config_done();
                }
                None => reporter.info("Backup has no configuration export; skipping"),
            }
        }
        check_deadline()?;

        let Some(data_source) = data_source else {
            reporter.info("Backup has no data folder; data left untouched");
            return Ok(None);
        };

        // Step 6: clear the target, holding its contents aside for rollback
        reporter.progress(0.5, "Clearing data directory");
        if options.target.exists() {
            let held = SetAside::take(&options.target, snapshot, &self.collab.profile.snapshot_paths)?;
            if let Some(holding) = held.holding() {
                reporter.info(format!(
                    "Moved {} item(s) of {} aside to {}",
                    held.moved(),
                    held.target().display(),
                    holding.display()
                ));
            }
            if held.left_behind() > 0 {
                reporter.warn(format!(
                    "{} item(s) could not be moved aside; only the safety snapshot covers them",
                    held.left_behind()
                ));
            }
            ledger.record_set_aside(held);
            clear_directory(&options.target, &self.collab.retry)?;
            reporter.info(format!("Cleared {}", options.target.display()));
        } else {
            ledger.ensure_dir(&options.target)?;
        }
        check_deadline()?;

        // Step 7: copy
        reporter.progress(0.6, "Copying data");
        let request = MirrorRequest::new(&data_source, &options.target, options.mirror_timeout)
            .within(deadline, options.timeout)
            .with_log(ledger.scratch_dir().join("restore-copy.log"));
        let outcome = self.collab.copy_strategy().mirror(&request, reporter)?;
        ledger.mark_data_done();
        check_deadline()?;

        // Step 8: verify
        reporter.progress(0.85, "Verifying");
        self.verify(&options.target)?;
        reporter.info("Restored data verified");

        Ok(Some(outcome))
    }

    fn restore_config(&self, reg: &Path, ledger: &mut RollbackLedger, reporter: &mut Reporter) -> EngineResult<()> {
        let store = self.collab.config_store.as_ref();

        let current = ledger.scratch_dir().join("current_config.reg");
        match store.export(&current) {
            Ok(()) => ledger.record_config_replaced(&current),
            Err(e) => reporter.warn(format!(
                "Could not save current configuration, it cannot be rolled back: {}",
                e
            )),
        }

        store.import(reg)?;
        reporter.info(format!("Imported configuration from {}", reg.display()));
        Ok(())
    }

    /// At least one critical artifact must be present with a plausible size
    fn verify(&self, target: &Path) -> EngineResult<()> {
        let artifacts = &self.collab.profile.verification;
        let passed = artifacts.iter().any(|artifact| {
            fs::metadata(target.join(&artifact.path)).is_ok_and(|m| m.is_file() && m.len() > artifact.min_size)
        });
        if passed || artifacts.is_empty() {
            return Ok(());
        }

        let expected: Vec<String> = artifacts
            .iter()
            .map(|a| format!("{} (> {} bytes)", a.path.display(), a.min_size))
            .collect();
        Err(EngineError::VerificationFailed(format!(
            "none of the expected files were restored: {}",
            expected.join(", ")
        )))
    }

    fn handle_failure(
        &self,
        error: EngineError,
        options: &RestoreOptions,
        ledger: &mut RollbackLedger,
        snapshot: SafetySnapshot,
        reporter: &mut Reporter,
    ) -> (EngineError, Option<RollbackReport>, Option<PathBuf>) {
        if error.is_timeout() || !options.enable_rollback {
            for held in ledger.held_paths() {
                reporter.warn(format!("Previous data kept at {}", held.display()));
            }
        }

        if error.is_timeout() {
            let kept = snapshot.keep();
            reporter.warn(format!(
                "No automatic rollback after a timeout; safety snapshot kept at {}",
                kept.display()
            ));
            return (error, None, Some(kept));
        }

        if !options.enable_rollback {
            let kept = snapshot.keep();
            reporter.warn(format!(
                "Rollback disabled; safety snapshot kept at {}",
                kept.display()
            ));
            return (error, None, Some(kept));
        }

        let report = ledger.rollback(&self.collab.rollback_context(), reporter);
        if report.is_clean() {
            if let Err(e) = snapshot.discard() {
                reporter.warn(e.to_string());
            }
            (error, Some(report), None)
        } else {
            let kept = snapshot.keep();
            reporter.warn(format!("Safety snapshot kept at {}", kept.display()));
            (error, Some(report), Some(kept))
        }
    }

    /// Start the service if it is not running; returns whether it runs
    fn ensure_service_running(&self, reporter: &mut Reporter) -> bool {
        let service = self.collab.service.as_ref();
        reporter.progress(0.95, "Starting service");
        if matches!(service.is_running(), Ok(true)) {
            return true;
        }
        match service.start() {
            Ok(()) => {
                reporter.info(format!("Started {}", service.describe()));
                true
            }
            Err(e) => {
                reporter.error(format!("Failed to start {}: {}", service.describe(), e));
                false
            }
        }
    }
}

fn first_reg_file(dir: &Path) -> Option<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("reg"))
        })
        .collect();
    files.sort();
    files.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceProfile;
    use crate::fsops::{MirrorMethod, RetryPolicy};
    use crate::oplog::NullSink;
    use crate::process::ScriptedProcess;
    use crate::test_support::{
        fake_data_dir, preferences_xml, FakeConfigStore, FakeService, FixedFreeSpace, FAKE_REG_CONTENT,
    };
    use tempfile::TempDir;

    const NEW_REG_CONTENT: &str = "REGEDIT4\r\n[new]\r\n";

    struct Fixture {
        temp: TempDir,
        service: Arc<FakeService>,
        store: Arc<FakeConfigStore>,
        free_space: Option<u64>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            fake_data_dir(&temp.path().join("live"));
            fs::create_dir_all(temp.path().join("snapshots")).unwrap();
            Self {
                temp,
                service: Arc::new(FakeService::running()),
                store: Arc::new(FakeConfigStore::new(FAKE_REG_CONTENT)),
                free_space: None,
            }
        }

        fn target(&self) -> PathBuf {
            self.temp.path().join("live")
        }

        /// Package folder whose data carries a `Preferences.xml` of `prefs_len` bytes
        fn package(&self, prefs_len: usize) -> PathBuf {
            let root = self.temp.path().join("Monday 04-03-2024-Backup");
            let reg = root.join(REG_DIR);
            let data = root.join(DATA_DIR);
            fs::create_dir_all(&reg).unwrap();
            fs::create_dir_all(&data).unwrap();
            fs::write(reg.join("Regbackup-Monday.reg"), NEW_REG_CONTENT).unwrap();
            fs::write(data.join("Preferences.xml"), preferences_xml(prefs_len)).unwrap();
            root
        }

        fn orchestrator(&self) -> RestoreOrchestrator {
            RestoreOrchestrator::new(Collaborators {
                service: self.service.clone(),
                config_store: self.store.clone(),
                process: Arc::new(ScriptedProcess::new()),
                free_space: Arc::new(FixedFreeSpace(self.free_space)),
                profile: ServiceProfile::plex().with_data_dir(self.target()),
                retry: RetryPolicy::new(1, Duration::from_millis(1)),
                mirror_tool: None,
            })
        }

        fn options(&self, package: PathBuf) -> RestoreOptions {
            RestoreOptions {
                package,
                target: self.target(),
                restore_config: true,
                enable_rollback: true,
                timeout: Duration::from_secs(60),
                mirror_timeout: Duration::from_secs(5),
                snapshot_root: self.temp.path().join("snapshots"),
            }
        }

        fn snapshots(&self) -> usize {
            fs::read_dir(self.temp.path().join("snapshots")).unwrap().count()
        }

        /// Holding folders left next to the live directory
        fn held(&self) -> Vec<PathBuf> {
            fs::read_dir(self.temp.path())
                .unwrap()
                .map(|entry| entry.unwrap().path())
                .filter(|path| {
                    path.file_name()
                        .unwrap()
                        .to_string_lossy()
                        .starts_with(".live.restore-hold-")
                })
                .collect()
        }

        fn cache_survived(&self) -> bool {
            fs::read_to_string(self.target().join("Cache").join("thumb.tmp")).is_ok_and(|c| c == "cache")
        }
    }

    #[test]
    fn test_restore_replaces_data_and_config() {
        let fx = Fixture::new();
        let options = fx.options(fx.package(2048));

        let report = fx.orchestrator().run(&options, Arc::new(NullSink)).unwrap();

        assert_eq!(
            fs::metadata(fx.target().join("Preferences.xml")).unwrap().len(),
            2048
        );
        assert!(!fx.target().join("Cache").exists());
        assert_eq!(fx.store.content(), NEW_REG_CONTENT);
        assert!(report.config_restored);
        assert!(report.service_running);
        assert_eq!(report.mirror.unwrap().method, MirrorMethod::Fallback);
        assert_eq!(fx.service.events(), vec!["stop", "start"]);
        assert_eq!(fx.snapshots(), 0);
        assert!(fx.held().is_empty());
    }

    #[test]
    fn test_verification_failure_rolls_back() {
        let fx = Fixture::new();
        let options = fx.options(fx.package(50));

        let failure = fx.orchestrator().run(&options, Arc::new(NullSink)).unwrap_err();

        assert!(matches!(failure.error, EngineError::VerificationFailed(_)));
        assert!(failure.fully_reverted());
        assert!(failure.snapshot.is_none());
        assert_eq!(
            fs::metadata(fx.target().join("Preferences.xml")).unwrap().len(),
            1024
        );
        assert!(fx
            .target()
            .join("Plug-in Support/Databases/com.plexapp.plugins.library.db")
            .exists());
        assert_eq!(fx.store.content(), FAKE_REG_CONTENT);
        assert!(fx.service.is_up());
        assert_eq!(fx.snapshots(), 0);
        assert!(fx.cache_survived());
        assert!(fx.held().is_empty());
    }

    #[test]
    fn test_rollback_disabled_keeps_snapshot() {
        let fx = Fixture::new();
        let mut options = fx.options(fx.package(50));
        options.enable_rollback = false;

        let failure = fx.orchestrator().run(&options, Arc::new(NullSink)).unwrap_err();

        assert!(failure.rollback.is_none());
        let kept = failure.snapshot.clone().unwrap();
        assert_eq!(
            fs::metadata(kept.join("Preferences.xml")).unwrap().len(),
            1024
        );
        assert_eq!(
            fs::metadata(fx.target().join("Preferences.xml")).unwrap().len(),
            50
        );
        assert!(failure.describe().contains("No automatic rollback"));
        assert!(fx.service.is_up());

        let held = fx.held();
        assert_eq!(held.len(), 1);
        assert!(held[0].join("Cache").join("thumb.tmp").exists());
        assert!(failure
            .log
            .entries()
            .iter()
            .any(|e| e.message.contains("Previous data kept at")));
    }

    #[test]
    fn test_stop_failure_leaves_live_data_untouched() {
        let mut fx = Fixture::new();
        fx.service = Arc::new(FakeService::running().failing_stop());
        let options = fx.options(fx.package(2048));

        let failure = fx.orchestrator().run(&options, Arc::new(NullSink)).unwrap_err();

        assert!(matches!(failure.error, EngineError::ServiceControl(_)));
        assert!(failure.fully_reverted());
        assert!(fx.cache_survived());
        assert_eq!(
            fs::metadata(fx.target().join("Preferences.xml")).unwrap().len(),
            1024
        );
        assert_eq!(fx.store.content(), FAKE_REG_CONTENT);
        assert!(fx.held().is_empty());
        assert_eq!(fx.snapshots(), 0);
    }

    #[test]
    fn test_config_import_failure_leaves_live_data_untouched() {
        let mut fx = Fixture::new();
        fx.store = Arc::new(FakeConfigStore::new(FAKE_REG_CONTENT).failing_import());
        let options = fx.options(fx.package(2048));

        let failure = fx.orchestrator().run(&options, Arc::new(NullSink)).unwrap_err();

        assert!(matches!(failure.error, EngineError::ExternalToolFailed { .. }));
        // Re-importing the saved configuration fails the same way
        assert!(!failure.fully_reverted());
        assert!(failure.snapshot.as_ref().unwrap().exists());
        assert!(fx.cache_survived());
        assert_eq!(
            fs::metadata(fx.target().join("Preferences.xml")).unwrap().len(),
            1024
        );
        assert!(fx.held().is_empty());
        assert!(fx.service.is_up());
    }

    #[test]
    fn test_missing_package_is_rejected_without_side_effects() {
        let fx = Fixture::new();
        let options = fx.options(fx.temp.path().join("nowhere"));

        let failure = fx.orchestrator().run(&options, Arc::new(NullSink)).unwrap_err();

        assert!(failure.error.is_validation());
        assert!(fx.service.events().is_empty());
        assert_eq!(fx.snapshots(), 0);
        assert_eq!(fx.store.content(), FAKE_REG_CONTENT);
    }

    #[test]
    fn test_insufficient_space_is_rejected() {
        let mut fx = Fixture::new();
        fx.free_space = Some(10);
        let options = fx.options(fx.package(2048));

        let failure = fx.orchestrator().run(&options, Arc::new(NullSink)).unwrap_err();

        assert!(failure.error.is_validation());
        assert!(failure.error.to_string().contains("disk space"));
        assert!(fx.service.events().is_empty());
    }

    #[test]
    fn test_timeout_keeps_snapshot_without_rollback() {
        let fx = Fixture::new();
        let mut options = fx.options(fx.package(2048));
        options.timeout = Duration::ZERO;

        let failure = fx.orchestrator().run(&options, Arc::new(NullSink)).unwrap_err();

        assert!(failure.error.is_timeout());
        assert!(failure.rollback.is_none());
        assert!(failure.snapshot.as_ref().unwrap().exists());
        assert!(fx.service.is_up());
    }

    #[test]
    fn test_config_only_package_leaves_data_alone() {
        let fx = Fixture::new();
        let root = fx.temp.path().join("reg-only");
        fs::create_dir_all(root.join(REG_DIR)).unwrap();
        fs::write(root.join(REG_DIR).join("Regbackup-Friday.reg"), NEW_REG_CONTENT).unwrap();

        let report = fx.orchestrator().run(&fx.options(root), Arc::new(NullSink)).unwrap();

        assert!(report.mirror.is_none());
        assert_eq!(fx.store.content(), NEW_REG_CONTENT);
        assert!(fx.target().join("Cache").join("thumb.tmp").exists());
    }
}
