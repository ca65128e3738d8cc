//! Running operations off the caller's thread
//!
//! An `Engine` owns the collaborators and runs at most one operation at a
//! time on a dedicated worker thread. Progress and log entries arrive on the
//! handle's channel; the result comes back from `OperationHandle::wait`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver};
use tracing::debug;

use crate::backup::{
    BackupOptions, BackupOrchestrator, BackupReport, ConfigStore, PreferencesFileStore, RegistryStore,
};
use crate::config::{ConfigBackend, ServiceProfile, Settings};
use crate::error::{EngineError, EngineResult, OperationFailure};
use crate::fsops::{CopyStrategy, MirrorTool, RetryPolicy};
use crate::oplog::{ChannelSink, ProgressEvent, ProgressSink};
use crate::process::{ExternalProcess, SystemProcess};
use crate::remote::{RemoteRestoreOptions, RemoteRestorePipeline, RemoteRestoreReport, RemoteTransport};
use crate::restore::{RestoreOptions, RestoreOrchestrator, RestoreReport};
use crate::rollback::RollbackContext;
use crate::service::{LocalServiceController, ServiceController, SystemdServiceController};
use crate::validate::{FreeSpaceProbe, IntegrityValidator, SysinfoFreeSpace};

/// Everything an orchestrator talks to
#[derive(Clone)]
pub struct Collaborators {
    /// The managed service
    pub service: Arc<dyn ServiceController>,
    /// Configuration export/import backend
    pub config_store: Arc<dyn ConfigStore>,
    /// External program runner
    pub process: Arc<dyn ExternalProcess>,
    /// Destination volume free space
    pub free_space: Arc<dyn FreeSpaceProbe>,
    /// The managed application
    pub profile: ServiceProfile,
    /// Retry policy for clearing locked directories
    pub retry: RetryPolicy,
    /// External mirroring tool; `None` always uses the per-file copy
    pub mirror_tool: Option<MirrorTool>,
}

impl Collaborators {
    /// Collaborators backed by the operating system
    pub fn system(settings: &Settings) -> Self {
        let process: Arc<dyn ExternalProcess> = Arc::new(SystemProcess::new());
        let profile = settings.profile();

        let service: Arc<dyn ServiceController> = match &settings.service_unit {
            Some(unit) => Arc::new(SystemdServiceController::new(unit.clone(), process.clone())),
            None => Arc::new(LocalServiceController::from_profile(&profile)),
        };
        let config_store: Arc<dyn ConfigStore> = match settings.config_backend {
            ConfigBackend::Registry => {
                Arc::new(RegistryStore::new(profile.registry_key.clone(), process.clone()))
            }
            ConfigBackend::File => {
                Arc::new(PreferencesFileStore::new(profile.data_dir.join("Preferences.xml")))
            }
        };

        Self {
            service,
            config_store,
            process,
            free_space: Arc::new(SysinfoFreeSpace),
            profile,
            retry: settings.retry_policy(),
            mirror_tool: Some(MirrorTool::native()),
        }
    }

    /// Copy strategy using the configured tool
    pub fn copy_strategy(&self) -> CopyStrategy {
        CopyStrategy::new(self.process.clone(), self.mirror_tool)
    }

    /// Package validator for the managed application
    pub fn validator(&self) -> IntegrityValidator {
        IntegrityValidator::from_profile(&self.profile, self.free_space.clone())
    }

    /// What a ledger needs to roll back
    pub fn rollback_context(&self) -> RollbackContext<'_> {
        RollbackContext {
            service: self.service.as_ref(),
            config_store: Some(self.config_store.as_ref()),
            retry: self.retry,
        }
    }
}

/// A running operation
pub struct OperationHandle<T> {
    events: Receiver<ProgressEvent>,
    join: JoinHandle<T>,
}

impl<T> OperationHandle<T> {
    /// Log entries and progress updates, in order
    pub fn events(&self) -> &Receiver<ProgressEvent> {
        &self.events
    }

    /// Whether the worker has finished
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Block until the operation ends and return its result
    pub fn wait(self) -> EngineResult<T> {
        self.join
            .join()
            .map_err(|_| EngineError::Io("Operation worker panicked".into()))
    }
}

/// Clears the busy flag when the worker ends, even by panic
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs one backup or restore at a time on a worker thread
pub struct Engine {
    collab: Collaborators,
    transport: Arc<dyn RemoteTransport>,
    busy: Arc<AtomicBool>,
}

impl Engine {
    /// Engine over the given collaborators and remote transport
    pub fn new(collab: Collaborators, transport: Arc<dyn RemoteTransport>) -> Self {
        Self {
            collab,
            transport,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether an operation is in flight
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start a backup
    pub fn backup(
        &self,
        options: BackupOptions,
    ) -> EngineResult<OperationHandle<Result<BackupReport, OperationFailure>>> {
        let orchestrator = BackupOrchestrator::new(self.collab.clone());
        self.spawn("backup", move |sink| orchestrator.run(&options, sink))
    }

    /// Start a local restore
    pub fn restore(
        &self,
        options: RestoreOptions,
    ) -> EngineResult<OperationHandle<Result<RestoreReport, OperationFailure>>> {
        let orchestrator = RestoreOrchestrator::new(self.collab.clone());
        self.spawn("restore", move |sink| orchestrator.run(&options, sink))
    }

    /// Start a restore onto a remote host
    pub fn remote_restore(
        &self,
        options: RemoteRestoreOptions,
    ) -> EngineResult<OperationHandle<Result<RemoteRestoreReport, OperationFailure>>> {
        let pipeline = RemoteRestorePipeline::new(self.transport.clone());
        self.spawn("remote-restore", move |sink| pipeline.run(&options, sink))
    }

    fn spawn<T, F>(&self, name: &str, operation: F) -> EngineResult<OperationHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn ProgressSink>) -> T + Send + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::Busy);
        }
        let guard = BusyGuard(self.busy.clone());

        let (tx, rx) = unbounded();
        let sink: Arc<dyn ProgressSink> = Arc::new(ChannelSink::new(tx));
        debug!("Starting {} worker", name);

        let join = thread::Builder::new()
            .name(format!("pms-{}", name))
            .spawn(move || {
                let _guard = guard;
                operation(sink)
            })
            .map_err(|e| EngineError::Io(format!("Failed to start worker thread: {}", e)))?;

        Ok(OperationHandle { events: rx, join })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        fake_data_dir, FakeConfigStore, FakeService, FixedFreeSpace, ScriptedTransport, FAKE_REG_CONTENT,
    };
    use crate::process::ScriptedProcess;
    use std::time::Duration;
    use tempfile::TempDir;

    fn engine(temp: &TempDir) -> Engine {
        let collab = Collaborators {
            service: Arc::new(FakeService::running()),
            config_store: Arc::new(FakeConfigStore::new(FAKE_REG_CONTENT)),
            process: Arc::new(ScriptedProcess::new()),
            free_space: Arc::new(FixedFreeSpace(None)),
            profile: ServiceProfile::plex().with_data_dir(fake_data_dir(&temp.path().join("data"))),
            retry: RetryPolicy::new(1, Duration::from_millis(1)),
            mirror_tool: None,
        };
        Engine::new(collab, Arc::new(ScriptedTransport::new()))
    }

    fn options(temp: &TempDir) -> BackupOptions {
        BackupOptions {
            backup_root: temp.path().join("backups"),
            include_config: true,
            include_data: true,
            stop_service: true,
            enable_rollback: true,
            mirror_timeout: Duration::from_secs(5),
            date: None,
        }
    }

    #[test]
    fn test_backup_runs_on_worker_and_streams_events() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);

        let handle = engine.backup(options(&temp)).unwrap();
        let events: Vec<ProgressEvent> = handle.events().iter().collect();
        let report = handle.wait().unwrap().unwrap();

        assert!(report.package.exists());
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::Progress { fraction, .. } if *fraction == 1.0)));
        assert!(!engine.is_busy());
    }

    #[test]
    fn test_second_operation_is_rejected_while_busy() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);
        engine.busy.store(true, Ordering::SeqCst);

        let err = engine.backup(options(&temp)).err().unwrap();
        assert!(matches!(err, EngineError::Busy));
    }
}
