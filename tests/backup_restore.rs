//! End-to-end backup and restore against a temporary data directory

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tempfile::TempDir;

use pms_backup::backup::archive::zip_directory;
use pms_backup::backup::{BackupOptions, BackupOrchestrator, ConfigStore};
use pms_backup::config::ServiceProfile;
use pms_backup::engine::{Collaborators, Engine};
use pms_backup::error::EngineError;
use pms_backup::fsops::{list_files, MirrorMethod, MirrorTool, RetryPolicy};
use pms_backup::oplog::{NullSink, ProgressEvent};
use pms_backup::process::{ScriptedProcess, ScriptedResponse};
use pms_backup::restore::{RestoreOptions, RestoreOrchestrator};
use pms_backup::test_support::{
    fake_data_dir, preferences_xml, FakeConfigStore, FakeService, FixedFreeSpace, ScriptedTransport,
    FAKE_REG_CONTENT,
};

const LIVE_REG_CONTENT: &str = "REGEDIT4\r\n[live]\r\n";

fn collaborators(data_dir: &Path, service: Arc<FakeService>, store: Arc<dyn ConfigStore>) -> Collaborators {
    Collaborators {
        service,
        config_store: store,
        // The mirroring tool always fails here, so every copy takes the fallback path
        process: Arc::new(ScriptedProcess::new().on("rsync", ScriptedResponse::failure(23, "partial transfer"))),
        free_space: Arc::new(FixedFreeSpace(Some(u64::MAX))),
        profile: ServiceProfile::plex().with_data_dir(data_dir),
        retry: RetryPolicy::new(2, Duration::from_millis(1)),
        mirror_tool: Some(MirrorTool::Rsync),
    }
}

fn restore_options(temp: &TempDir, package: PathBuf, target: &Path) -> RestoreOptions {
    let snapshots = temp.path().join("snapshots");
    fs::create_dir_all(&snapshots).unwrap();
    RestoreOptions {
        package,
        target: target.to_path_buf(),
        restore_config: true,
        enable_rollback: true,
        timeout: Duration::from_secs(120),
        mirror_timeout: Duration::from_secs(10),
        snapshot_root: snapshots,
    }
}

/// Back up a fresh data directory and return (data dir, package)
fn make_backup(temp: &TempDir) -> (PathBuf, PathBuf) {
    let data = fake_data_dir(&temp.path().join("data"));
    let service = Arc::new(FakeService::running());
    let store = Arc::new(FakeConfigStore::new(FAKE_REG_CONTENT));

    let report = BackupOrchestrator::new(collaborators(&data, service.clone(), store))
        .run(
            &BackupOptions {
                backup_root: temp.path().join("backups"),
                include_config: true,
                include_data: true,
                stop_service: true,
                enable_rollback: true,
                mirror_timeout: Duration::from_secs(10),
                date: NaiveDate::from_ymd_opt(2024, 6, 7),
            },
            Arc::new(NullSink),
        )
        .unwrap();

    assert_eq!(report.mirror.unwrap().method, MirrorMethod::Fallback);
    assert!(service.is_up());
    (data, report.package)
}

#[test]
fn backup_then_restore_brings_back_data_and_config() {
    let temp = TempDir::new().unwrap();
    let (data, package) = make_backup(&temp);
    assert!(package.ends_with("Friday 07-06-2024-Backup"));

    // Diverge from the backup
    fs::write(data.join("Preferences.xml"), preferences_xml(300)).unwrap();
    fs::write(data.join("stray.txt"), "not in the backup").unwrap();

    let service = Arc::new(FakeService::running());
    let store = Arc::new(FakeConfigStore::new(LIVE_REG_CONTENT));
    let report = RestoreOrchestrator::new(collaborators(&data, service.clone(), store.clone()))
        .run(&restore_options(&temp, package, &data), Arc::new(NullSink))
        .unwrap();

    assert_eq!(fs::metadata(data.join("Preferences.xml")).unwrap().len(), 1024);
    assert!(!data.join("stray.txt").exists());
    assert_eq!(store.content(), FAKE_REG_CONTENT);
    assert!(report.config_restored);
    assert!(report.service_running);
    assert_eq!(service.events(), vec!["stop", "start"]);
}

#[test]
fn restore_onto_empty_target_reproduces_files_byte_for_byte() {
    let temp = TempDir::new().unwrap();
    let (data, package) = make_backup(&temp);
    let target = temp.path().join("fresh").join("Plex Media Server");
    let database = Path::new("Plug-in Support")
        .join("Databases")
        .join("com.plexapp.plugins.library.db");

    let service = Arc::new(FakeService::running());
    let store = Arc::new(FakeConfigStore::new(LIVE_REG_CONTENT));
    let report = RestoreOrchestrator::new(collaborators(&target, service.clone(), store.clone()))
        .run(&restore_options(&temp, package, &target), Arc::new(NullSink))
        .unwrap();

    assert_eq!(
        fs::read(target.join("Preferences.xml")).unwrap(),
        fs::read(data.join("Preferences.xml")).unwrap()
    );
    assert_eq!(
        fs::read(target.join(&database)).unwrap(),
        fs::read(data.join(&database)).unwrap()
    );
    assert!(!target.join("Cache").exists());
    assert_eq!(store.content(), FAKE_REG_CONTENT);
    assert!(report.service_running);
    assert!(service.is_up());
    assert_eq!(service.events(), vec!["stop", "start"]);
}

#[test]
fn restore_from_zip_package() {
    let temp = TempDir::new().unwrap();
    let (data, package) = make_backup(&temp);
    let archive = temp.path().join("backup.zip");
    zip_directory(&package, &archive).unwrap();
    fs::remove_file(data.join("Preferences.xml")).unwrap();

    let store = Arc::new(FakeConfigStore::new(LIVE_REG_CONTENT));
    RestoreOrchestrator::new(collaborators(&data, Arc::new(FakeService::stopped()), store.clone()))
        .run(&restore_options(&temp, archive, &data), Arc::new(NullSink))
        .unwrap();

    assert_eq!(fs::metadata(data.join("Preferences.xml")).unwrap().len(), 1024);
    assert_eq!(store.content(), FAKE_REG_CONTENT);
}

#[test]
fn failed_verification_is_rolled_back_through_the_engine() {
    let temp = TempDir::new().unwrap();
    let data = fake_data_dir(&temp.path().join("data"));

    // A package whose data is too small to pass verification
    let package = temp.path().join("Monday 03-06-2024-Backup");
    fs::create_dir_all(package.join("RegBackup")).unwrap();
    fs::create_dir_all(package.join("FileBackup")).unwrap();
    fs::write(package.join("RegBackup").join("Regbackup-Monday.reg"), FAKE_REG_CONTENT).unwrap();
    fs::write(package.join("FileBackup").join("Preferences.xml"), preferences_xml(40)).unwrap();

    let before: Vec<(PathBuf, Vec<u8>)> = list_files(&data)
        .unwrap()
        .into_iter()
        .map(|file| {
            let bytes = fs::read(data.join(&file)).unwrap();
            (file, bytes)
        })
        .collect();
    assert!(before.iter().any(|(file, _)| file.starts_with("Cache")));

    let service = Arc::new(FakeService::running());
    let store = Arc::new(FakeConfigStore::new(LIVE_REG_CONTENT));
    let engine = Engine::new(
        collaborators(&data, service.clone(), store.clone()),
        Arc::new(ScriptedTransport::new()),
    );

    let handle = engine
        .restore(restore_options(&temp, package, &data))
        .unwrap();
    let events: Vec<ProgressEvent> = handle.events().iter().collect();
    let failure = handle.wait().unwrap().unwrap_err();

    assert!(matches!(failure.error, EngineError::VerificationFailed(_)));
    assert!(failure.fully_reverted());
    assert!(failure.describe().contains("all changes were reverted"));
    let after: Vec<(PathBuf, Vec<u8>)> = list_files(&data)
        .unwrap()
        .into_iter()
        .map(|file| {
            let bytes = fs::read(data.join(&file)).unwrap();
            (file, bytes)
        })
        .collect();
    assert_eq!(after, before);
    assert!(failure.snapshot.is_none());
    assert_eq!(fs::read_dir(temp.path().join("snapshots")).unwrap().count(), 0);
    assert_eq!(store.content(), LIVE_REG_CONTENT);
    assert!(service.is_up());
    assert!(events.iter().any(|e| matches!(e, ProgressEvent::Entry(_))));
    assert!(!engine.is_busy());
}
