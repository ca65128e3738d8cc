//! Transport over the system OpenSSH client
//!
//! Commands run as `ssh user@host <command>`. Password credentials (and key
//! passphrases) are handed to `sshpass` through the `SSHPASS` environment
//! variable, never on the command line. Uploads stream the file into
//! `cat > <remote>` on the host so progress can be reported per chunk.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use super::secret::SecretString;
use super::target::{Credential, RemoteTarget};
use super::transport::{shell_quote, CommandOutput, RemoteSession, RemoteTransport};
use crate::error::{EngineError, EngineResult};
use crate::process::{ExternalProcess, Invocation, SystemProcess};

/// Exit status ssh reserves for its own failures
const SSH_ERROR_STATUS: i32 = 255;

/// Connection attempts give up after this long
const CONNECT_TIMEOUT_SECS: u64 = 15;

const UPLOAD_CHUNK: usize = 64 * 1024;

/// `RemoteTransport` backed by `ssh` (and `sshpass` for secrets)
pub struct OpenSshTransport {
    process: Arc<dyn ExternalProcess>,
}

impl OpenSshTransport {
    /// Transport running commands through `process`
    pub fn new(process: Arc<dyn ExternalProcess>) -> Self {
        Self { process }
    }

    /// Transport over the real system client
    pub fn system() -> Self {
        Self::new(Arc::new(SystemProcess::new()))
    }

    /// Client programs the credential needs that are not installed
    pub fn check_available(&self, credential: &Credential) -> Vec<String> {
        let mut required = vec!["ssh"];
        if secret_of(credential).is_some() {
            required.push("sshpass");
        }
        required
            .into_iter()
            .filter(|program| !self.process.is_available(program, "-V"))
            .map(str::to_string)
            .collect()
    }

    /// Connect and run a no-op command
    pub fn test_connection(&self, target: &RemoteTarget) -> EngineResult<()> {
        let mut session = self.connect(target)?;
        let output = session.execute("true", Duration::from_secs(CONNECT_TIMEOUT_SECS * 2))?;
        if output.success() {
            info!(target = %target.address(), "Connection test succeeded");
            Ok(())
        } else {
            Err(EngineError::Transport(format!(
                "Connection test to {} failed: {}",
                target.address(),
                output.stderr.trim()
            )))
        }
    }
}

impl RemoteTransport for OpenSshTransport {
    fn connect(&self, target: &RemoteTarget) -> EngineResult<Box<dyn RemoteSession>> {
        let mut session = OpenSshSession {
            process: self.process.clone(),
            target: target.clone(),
        };
        // ssh has no separate handshake; a no-op command proves auth works
        let probe = session.execute("true", Duration::from_secs(CONNECT_TIMEOUT_SECS * 2))?;
        if !probe.success() {
            return Err(EngineError::Transport(format!(
                "Failed to connect to {}: {}",
                target.address(),
                probe.stderr.trim()
            )));
        }
        debug!(target = %target.address(), "SSH session ready");
        Ok(Box::new(session))
    }
}

struct OpenSshSession {
    process: Arc<dyn ExternalProcess>,
    target: RemoteTarget,
}

impl RemoteSession for OpenSshSession {
    fn execute(&mut self, command: &str, timeout: Duration) -> EngineResult<CommandOutput> {
        let invocation = ssh_invocation(&self.target, command).timeout(timeout);
        let output = self.process.run(&invocation)?;

        if output.timed_out {
            return Ok(CommandOutput {
                status: -1,
                stdout: output.stdout,
                stderr: format!("Command timed out after {}s", timeout.as_secs()),
            });
        }
        let status = output.exit_code.unwrap_or(-1);
        if status == SSH_ERROR_STATUS {
            return Err(EngineError::Transport(format!(
                "ssh to {} failed: {}",
                self.target.address(),
                output.stderr.trim()
            )));
        }
        Ok(CommandOutput {
            status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn upload(
        &mut self,
        local: &Path,
        remote: &str,
        progress: &mut dyn FnMut(u64, u64),
    ) -> EngineResult<()> {
        let mut file = File::open(local).map_err(|e| {
            EngineError::Transport(format!("Failed to open {}: {}", local.display(), e))
        })?;
        let total = file.metadata()?.len();

        let invocation = ssh_invocation(&self.target, &format!("cat > {}", shell_quote(remote)));
        let mut child = command_for(&invocation)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                EngineError::Transport(format!("Failed to start '{}': {}", invocation.program, e))
            })?;

        let stderr = child.stderr.take();
        let stderr_reader = thread::spawn(move || {
            let mut text = String::new();
            if let Some(mut pipe) = stderr {
                let _ = pipe.read_to_string(&mut text);
            }
            text
        });

        let mut sent = 0u64;
        progress(sent, total);
        if let Some(mut stdin) = child.stdin.take() {
            let mut buf = vec![0u8; UPLOAD_CHUNK];
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                if let Err(e) = stdin.write_all(&buf[..n]) {
                    // The remote end went away; its stderr says why
                    debug!("Upload pipe closed early: {}", e);
                    break;
                }
                sent += n as u64;
                progress(sent, total);
            }
        }

        let status = child.wait()?;
        let stderr = stderr_reader.join().unwrap_or_default();
        if !status.success() || sent != total {
            return Err(EngineError::Transport(format!(
                "Upload to {}:{} failed after {} of {} bytes: {}",
                self.target.host,
                remote,
                sent,
                total,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

fn secret_of(credential: &Credential) -> Option<&SecretString> {
    match credential {
        Credential::Password(password) => Some(password),
        Credential::KeyFile { passphrase, .. } => passphrase.as_ref(),
    }
}

/// `ssh` (wrapped in `sshpass` when a secret is needed) running `command`
fn ssh_invocation(target: &RemoteTarget, command: &str) -> Invocation {
    let port = target.port.to_string();
    let connect_timeout = format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS);
    let mut ssh_args: Vec<String> = [
        "-p",
        port.as_str(),
        "-o",
        "StrictHostKeyChecking=accept-new",
        "-o",
        connect_timeout.as_str(),
        "-o",
        "ServerAliveInterval=15",
        "-o",
        "ServerAliveCountMax=4",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    match &target.credential {
        Credential::Password(_) => {
            for opt in ["PreferredAuthentications=password,keyboard-interactive", "PubkeyAuthentication=no"] {
                ssh_args.push("-o".to_string());
                ssh_args.push(opt.to_string());
            }
        }
        Credential::KeyFile { path, passphrase } => {
            ssh_args.push("-i".to_string());
            ssh_args.push(path.display().to_string());
            ssh_args.push("-o".to_string());
            ssh_args.push("IdentitiesOnly=yes".to_string());
            if passphrase.is_none() {
                ssh_args.push("-o".to_string());
                ssh_args.push("BatchMode=yes".to_string());
            }
        }
    }
    ssh_args.push(target.destination());
    ssh_args.push(command.to_string());

    let mut invocation = match secret_of(&target.credential) {
        Some(secret) => {
            let mut sshpass = Invocation::new("sshpass");
            if matches!(target.credential, Credential::KeyFile { .. }) {
                sshpass = sshpass.args(["-P", "passphrase"]);
            }
            sshpass
                .arg("-e")
                .arg("ssh")
                .env("SSHPASS", secret.expose())
        }
        None => Invocation::new("ssh"),
    };
    invocation = invocation.args(ssh_args);
    if let Some(password) = target.credential.sudo_password() {
        invocation = invocation.secret(shell_quote(password.expose()));
    }
    invocation
}

fn command_for(invocation: &Invocation) -> Command {
    let mut command = Command::new(&invocation.program);
    command.args(&invocation.args);
    for (key, value) in &invocation.env {
        command.env(key, value);
    }
    command
}
