//! Secure transport capability
//!
//! The pipeline only needs three things from a transport: open a session,
//! run a shell command with a deadline, and upload a file with byte-level
//! progress. `OpenSshTransport` provides them with the system OpenSSH client;
//! tests use a scripted transport.

use std::path::Path;
use std::time::Duration;

use super::target::RemoteTarget;
use crate::error::EngineResult;

/// Result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status; `-1` if the command was killed or never reported one
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Check for a zero exit status
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// An open connection to a remote host
pub trait RemoteSession: Send {
    /// Run `command` through the remote shell
    ///
    /// A non-zero exit is not an error at this level; `Err` means the command
    /// could not be run at all.
    fn execute(&mut self, command: &str, timeout: Duration) -> EngineResult<CommandOutput>;

    /// Copy `local` to `remote`, calling `progress(sent, total)` as bytes go out
    fn upload(
        &mut self,
        local: &Path,
        remote: &str,
        progress: &mut dyn FnMut(u64, u64),
    ) -> EngineResult<()>;
}

/// Opens sessions to remote hosts
pub trait RemoteTransport: Send + Sync {
    /// Connect and authenticate
    fn connect(&self, target: &RemoteTarget) -> EngineResult<Box<dyn RemoteSession>>;
}

/// Quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
