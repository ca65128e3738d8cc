//! Restore onto a remote Linux host over SSH
//!
//! Six stages, each logged and mapped to a progress fraction:
//!
//! 1. package the backup as a single `.zip` (0.15)
//! 2. connect and create a timestamped scratch directory (0.25)
//! 3. upload the package (0.25 to 0.50)
//! 4. stop the remote service, if managed (0.65)
//! 5. extract, snapshot the current data, clear, copy, fix ownership (0.85)
//! 6. start the service and remove the scratch directory (1.0)
//!
//! Stage 6 runs whatever happened after the scratch directory exists. If the
//! remote data was already touched when a stage failed, the scratch
//! directory is kept because it holds the only copy of the previous data.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Local;
use tempfile::TempDir;

use super::secret::SecretString;
use super::target::RemoteTarget;
use super::transport::{shell_quote, CommandOutput, RemoteSession, RemoteTransport};
use crate::backup::archive::{find_component, is_zip, list_entries, zip_directory};
use crate::backup::layout::DATA_DIR;
use crate::config::ServiceProfile;
use crate::error::{EngineError, EngineResult, OperationFailure};
use crate::oplog::{OperationLog, ProgressSink, Reporter};
use crate::validate::{IntegrityValidator, SysinfoFreeSpace};

/// Deadline for every remote command
pub const REMOTE_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Name of the uploaded package inside the scratch directory
const REMOTE_PACKAGE: &str = "backup.zip";

/// Inputs of one remote restore
#[derive(Debug, Clone)]
pub struct RemoteRestoreOptions {
    /// Package folder or `.zip`
    pub package: PathBuf,
    /// Host and credentials
    pub target: RemoteTarget,
    /// Files of which at least one must be in the package's data folder
    pub critical_files: Vec<PathBuf>,
    /// Service names probed on the host, after the target's own
    pub service_candidates: Vec<String>,
    /// Accounts probed for ownership of the restored data
    pub account_candidates: Vec<String>,
    /// Deadline for each remote command
    pub command_timeout: Duration,
}

impl RemoteRestoreOptions {
    /// Options for restoring `package` onto `target` for `profile`'s application
    pub fn new(package: impl Into<PathBuf>, target: RemoteTarget, profile: &ServiceProfile) -> Self {
        Self {
            package: package.into(),
            target,
            critical_files: profile.package_critical_files.clone(),
            service_candidates: profile.remote_service_candidates.clone(),
            account_candidates: profile.remote_account_candidates.clone(),
            command_timeout: REMOTE_COMMAND_TIMEOUT,
        }
    }
}

/// Result of a successful remote restore
#[derive(Debug)]
pub struct RemoteRestoreReport {
    /// Scratch directory used on the host (already removed)
    pub scratch_dir: String,
    /// Size of the uploaded package
    pub uploaded_bytes: u64,
    /// Service that was stopped and started, if managed
    pub service: Option<String>,
    /// Account the restored data was handed to
    pub owner: String,
    /// Everything logged
    pub log: OperationLog,
}

/// What the stages have done so far, for the final stage and the report
#[derive(Debug, Default)]
struct RemoteState {
    scratch: Option<String>,
    stamp: String,
    uploaded_bytes: u64,
    service: Option<String>,
    owner: Option<String>,
    target_touched: bool,
    kept_snapshot: Option<String>,
}

/// Remote command runner with the failure contract and privilege escalation
struct Shell<'a> {
    session: Box<dyn RemoteSession>,
    timeout: Duration,
    sudo_password: Option<&'a SecretString>,
}

impl Shell<'_> {
    /// Run `command`; a non-zero exit is fatal unless `allow_failure`, in
    /// which case it is logged as a warning
    fn run(
        &mut self,
        reporter: &mut Reporter,
        context: &str,
        command: &str,
        allow_failure: bool,
    ) -> EngineResult<CommandOutput> {
        tracing::debug!(context, "remote command");
        let output = self.session.execute(command, self.timeout)?;
        if output.success() {
            return Ok(output);
        }
        if allow_failure {
            reporter.warn(format!(
                "{} failed (exit {}): {}",
                context,
                output.status,
                output.stderr.trim()
            ));
            Ok(output)
        } else {
            Err(EngineError::RemoteCommandFailed {
                context: context.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Run `command` as root with the authentication credential
    fn sudo(
        &mut self,
        reporter: &mut Reporter,
        context: &str,
        command: &str,
        allow_failure: bool,
    ) -> EngineResult<CommandOutput> {
        let wrapped = self.escalate(command);
        self.run(reporter, context, &wrapped, allow_failure)
    }

    /// Run `command` quietly and report whether it succeeded
    fn probe(&mut self, command: &str) -> bool {
        self.session
            .execute(command, self.timeout)
            .is_ok_and(|output| output.success())
    }

    fn escalate(&self, command: &str) -> String {
        match self.sudo_password {
            Some(password) => format!(
                "printf '%s\\n' {} | sudo -S -p '' sh -c {}",
                shell_quote(password.expose()),
                shell_quote(command)
            ),
            None => format!("sudo -n sh -c {}", shell_quote(command)),
        }
    }
}

/// Replays a restore on a remote host
pub struct RemoteRestorePipeline {
    transport: Arc<dyn RemoteTransport>,
}

impl RemoteRestorePipeline {
    /// Pipeline over `transport`
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self {
        Self { transport }
    }

    /// Run a remote restore
    pub fn run(
        &self,
        options: &RemoteRestoreOptions,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<RemoteRestoreReport, OperationFailure> {
        let mut reporter = Reporter::new("remote-restore", sink);
        let _span = reporter.span().clone().entered();

        reporter.progress(0.0, "Validating backup");
        if let Err(e) = validate(options) {
            reporter.error(format!("Remote restore rejected: {}", e));
            return Err(OperationFailure::without_rollback(e, reporter.finish()));
        }
        reporter.info(format!(
            "Restoring {} to {} on {}",
            options.package.display(),
            options.target.data_path,
            options.target.address()
        ));

        let mut state = RemoteState::default();
        match self.execute(options, &mut state, &mut reporter) {
            Ok(()) => {
                reporter.progress(1.0, "Done");
                reporter.info("Remote restore completed successfully");
                Ok(RemoteRestoreReport {
                    scratch_dir: state.scratch.unwrap_or_default(),
                    uploaded_bytes: state.uploaded_bytes,
                    service: state.service,
                    owner: state.owner.unwrap_or_else(|| options.target.user.clone()),
                    log: reporter.finish(),
                })
            }
            Err(error) => {
                reporter.error(format!("Remote restore failed: {}", error));
                Err(OperationFailure {
                    error,
                    rollback: None,
                    snapshot: state
                        .kept_snapshot
                        .map(|path| PathBuf::from(format!("{}:{}", options.target.host, path))),
                    log: reporter.finish(),
                })
            }
        }
    }

    fn execute(
        &self,
        options: &RemoteRestoreOptions,
        state: &mut RemoteState,
        reporter: &mut Reporter,
    ) -> EngineResult<()> {
        // Stage 1
        reporter.progress(0.15, "Packaging backup");
        let (_workdir, archive) = package_for_transfer(&options.package, reporter)?;

        // Stage 2
        reporter.progress(0.2, "Connecting");
        let session = self.transport.connect(&options.target)?;
        reporter.info(format!("Connected to {}", options.target.address()));
        let mut shell = Shell {
            session,
            timeout: options.command_timeout,
            sudo_password: options.target.credential.sudo_password(),
        };

        state.stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let scratch = format!(
            "{}/{}",
            options.target.scratch_root.trim_end_matches('/'),
            state.stamp
        );
        shell.run(
            reporter,
            "create remote scratch directory",
            &format!("mkdir -p {}", shell_quote(&scratch)),
            false,
        )?;
        state.scratch = Some(scratch.clone());
        reporter.progress(0.25, "Remote scratch directory ready");

        let result = self.restore_stages(&mut shell, options, &archive, &scratch, state, reporter);

        // Stage 6, whatever happened
        self.finish(&mut shell, &scratch, result.is_ok(), state, reporter);
        result
    }

    fn restore_stages(
        &self,
        shell: &mut Shell<'_>,
        options: &RemoteRestoreOptions,
        archive: &Path,
        scratch: &str,
        state: &mut RemoteState,
        reporter: &mut Reporter,
    ) -> EngineResult<()> {
        let target = &options.target;

        // Stage 3
        let remote_archive = format!("{}/{}", scratch, REMOTE_PACKAGE);
        {
            let progress_reporter = &*reporter;
            let mut on_progress = |sent: u64, total: u64| {
                let fraction = if total == 0 {
                    1.0
                } else {
                    sent as f32 / total as f32
                };
                progress_reporter.progress(0.25 + 0.25 * fraction, "Uploading backup");
            };
            shell.session.upload(archive, &remote_archive, &mut on_progress)?;
        }
        state.uploaded_bytes = std::fs::metadata(archive).map(|m| m.len()).unwrap_or(0);
        reporter.info(format!(
            "Uploaded {} byte(s) to {}",
            state.uploaded_bytes, remote_archive
        ));
        reporter.progress(0.5, "Upload complete");

        // Stage 4
        if target.manage_service {
            reporter.progress(0.65, "Stopping remote service");
            let service = detect_service(shell, options);
            reporter.info(format!("Remote service: {}", service));
            let stop = shell.sudo(
                reporter,
                "Stop remote service",
                &format!("systemctl stop {}", shell_quote(&service)),
                true,
            )?;
            if stop.success() {
                reporter.info(format!("Stopped {}", service));
            }
            state.service = Some(service);
            if !target.settle_delay.is_zero() {
                thread::sleep(target.settle_delay);
            }
        }

        // Stage 5
        reporter.progress(0.7, "Extracting backup");
        let extracted = format!("{}/extracted", scratch);
        shell.run(
            reporter,
            "extract backup",
            &format!(
                "mkdir -p {dir} && cd {dir} && unzip -o -q ../{archive}",
                dir = shell_quote(&extracted),
                archive = REMOTE_PACKAGE
            ),
            false,
        )?;
        let found = shell.run(
            reporter,
            "locate data folder",
            &format!(
                "find {} -type d -name {} | head -n 1",
                shell_quote(&extracted),
                DATA_DIR
            ),
            false,
        )?;
        let source = found.stdout.trim().to_string();
        if source.is_empty() {
            return Err(EngineError::RemoteCommandFailed {
                context: "locate data folder".into(),
                status: 1,
                stderr: format!("no {} folder in the extracted backup", DATA_DIR),
            });
        }
        reporter.info("Backup extracted");

        let data = shell_quote(&target.data_path);
        let snapshot = format!("{}/current_backup_{}", scratch, state.stamp);
        shell.sudo(
            reporter,
            "Snapshot current remote data",
            &format!(
                "if [ -d {data} ]; then cp -a {data} {snap}; fi",
                data = data,
                snap = shell_quote(&snapshot)
            ),
            true,
        )?;
        reporter.info(format!("Current remote data saved to {}", snapshot));

        state.target_touched = true;
        state.kept_snapshot = Some(snapshot);
        shell.sudo(
            reporter,
            "clear remote data directory",
            &format!("mkdir -p {data} && find {data} -mindepth 1 -delete", data = data),
            false,
        )?;
        reporter.info(format!("Cleared {}", target.data_path));

        reporter.progress(0.8, "Copying data");
        shell.sudo(
            reporter,
            "copy restored data",
            &format!("cp -a {}/. {}/", shell_quote(&source), data),
            false,
        )?;
        reporter.info(format!("Restored data into {}", target.data_path));

        let owner = options
            .account_candidates
            .iter()
            .find(|account| shell.probe(&format!("id -u {}", shell_quote(account))))
            .cloned();
        let owner = match owner {
            Some(account) => account,
            None => {
                reporter.warn(format!(
                    "No service account found among {}; assigning data to {}",
                    options.account_candidates.join(", "),
                    target.user
                ));
                target.user.clone()
            }
        };
        let chown = shell.sudo(
            reporter,
            "Set ownership",
            &format!(
                "chown -R {} {}",
                shell_quote(&format!("{0}:{0}", owner)),
                data
            ),
            true,
        )?;
        if chown.success() {
            reporter.info(format!("Ownership set to {}", owner));
        }
        state.owner = Some(owner);
        reporter.progress(0.85, "Data restored");
        Ok(())
    }

    fn finish(
        &self,
        shell: &mut Shell<'_>,
        scratch: &str,
        succeeded: bool,
        state: &mut RemoteState,
        reporter: &mut Reporter,
    ) {
        reporter.progress(0.9, "Starting remote service");
        if let Some(service) = &state.service {
            // Both commands allow failure, so neither can return Err from a status
            match shell.sudo(
                reporter,
                "Start remote service",
                &format!("systemctl start {}", shell_quote(service)),
                true,
            ) {
                Ok(out) if out.success() => reporter.info(format!("Started {}", service)),
                Ok(_) => {}
                Err(e) => reporter.warn(format!("Could not start {}: {}", service, e)),
            }
        }

        if !succeeded && state.target_touched {
            reporter.warn(format!(
                "Remote scratch directory kept for manual recovery: {}",
                scratch
            ));
            return;
        }
        state.kept_snapshot = None;
        match shell.sudo(
            reporter,
            "Remove remote scratch directory",
            &format!("rm -rf {}", shell_quote(scratch)),
            true,
        ) {
            Ok(out) if out.success() => reporter.info("Remote temporary files cleaned up"),
            Ok(_) => {}
            Err(e) => reporter.warn(format!("Could not remove {}: {}", scratch, e)),
        }
    }
}

/// Rejects what can be rejected before connecting
fn validate(options: &RemoteRestoreOptions) -> EngineResult<()> {
    let target = &options.target;
    if target.host.trim().is_empty() || target.user.trim().is_empty() {
        return Err(EngineError::ValidationFailed(
            "Remote host and user are required".into(),
        ));
    }
    let data_path = target.data_path.trim_end_matches('/');
    if !data_path.starts_with('/') || data_path.is_empty() {
        return Err(EngineError::ValidationFailed(format!(
            "Remote data path must be an absolute path below /: '{}'",
            target.data_path
        )));
    }
    if !target.scratch_root.starts_with('/') || target.scratch_root.trim_end_matches('/').is_empty() {
        return Err(EngineError::ValidationFailed(format!(
            "Remote scratch root must be an absolute path below /: '{}'",
            target.scratch_root
        )));
    }

    let validator = IntegrityValidator::new(options.critical_files.clone(), Arc::new(SysinfoFreeSpace));
    validator.check(&options.package)?;
    if !has_data_folder(&options.package)? {
        return Err(EngineError::ValidationFailed(format!(
            "{} has no {} folder to restore",
            options.package.display(),
            DATA_DIR
        )));
    }
    Ok(())
}

fn has_data_folder(package: &Path) -> EngineResult<bool> {
    if is_zip(package) {
        let entries = list_entries(package)?;
        Ok(entries
            .iter()
            .any(|entry| entry.name.split('/').any(|part| part == DATA_DIR)))
    } else {
        Ok(find_component(package, DATA_DIR).is_some())
    }
}

/// The package as a single archive, compressing a folder into a temporary one
fn package_for_transfer(package: &Path, reporter: &mut Reporter) -> EngineResult<(Option<TempDir>, PathBuf)> {
    if is_zip(package) {
        reporter.info("Backup is already an archive");
        return Ok((None, package.to_path_buf()));
    }
    let workdir = tempfile::Builder::new()
        .prefix("pms-remote-")
        .tempdir()
        .map_err(|e| EngineError::Io(format!("Failed to create temporary directory: {}", e)))?;
    let archive = workdir.path().join(REMOTE_PACKAGE);
    let files = zip_directory(package, &archive)?;
    reporter.info(format!("Compressed {} file(s) for transfer", files));
    Ok((Some(workdir), archive))
}

fn detect_service(shell: &mut Shell<'_>, options: &RemoteRestoreOptions) -> String {
    let configured = &options.target.service_name;
    let mut candidates = vec![configured.clone()];
    for candidate in &options.service_candidates {
        if !candidates.contains(candidate) {
            candidates.push(candidate.clone());
        }
    }

    for candidate in &candidates {
        let name = shell_quote(candidate);
        let probe = format!(
            "systemctl is-active --quiet {name} || systemctl is-enabled --quiet {name}",
            name = name
        );
        if shell.probe(&probe) {
            return candidate.clone();
        }
    }
    configured.clone()
}
