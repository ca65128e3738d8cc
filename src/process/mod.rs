//! External process capability
//!
//! Everything the engine delegates to another program (the mirroring tool,
//! registry export/import, `systemctl`, `ssh`) goes through the narrow
//! `ExternalProcess` trait, so orchestration logic can run against the
//! scripted backend in tests and against the operating system in production.
//!
//! - `SystemProcess`: spawns real processes, polls them against a deadline and
//!   kills them on overrun.
//! - `ScriptedProcess`: pure fake that answers from a table of canned
//!   responses and records every invocation.

mod scripted;
mod system;

use std::time::Duration;

use crate::error::EngineResult;

pub use scripted::{ScriptedProcess, ScriptedResponse};
pub use system::SystemProcess;

/// Default timeout for short helper commands
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// A program to run, with its arguments, environment and deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name or path
    pub program: String,
    /// Arguments, passed without shell interpretation
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// How long the process may run before it is terminated
    pub timeout: Duration,
    /// Values masked in `display`
    pub secrets: Vec<String>,
}

impl Invocation {
    /// Create an invocation with the default timeout
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            secrets: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mask `value` wherever it appears in `display`
    pub fn secret(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.secrets.push(value);
        }
        self
    }

    /// Program and arguments as a single display string
    pub fn display(&self) -> String {
        let mut text = self.program.clone();
        for arg in &self.args {
            text.push(' ');
            if arg.contains(' ') {
                text.push('"');
                text.push_str(arg);
                text.push('"');
            } else {
                text.push_str(arg);
            }
        }
        for secret in &self.secrets {
            text = text.replace(secret.as_str(), "****");
        }
        text
    }
}

/// What a finished (or terminated) process produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` if the process was killed or ended by a signal
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Whether the process overran its deadline and was terminated
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Check for a clean zero exit
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Check the exit code against an inclusive range of successful codes
    pub fn exit_in(&self, range: std::ops::RangeInclusive<i32>) -> bool {
        !self.timed_out && self.exit_code.is_some_and(|code| range.contains(&code))
    }
}

/// Capability to run external programs
///
/// Returns `Err` only when the program could not be started at all; a
/// non-zero exit or a timeout is reported through `ProcessOutput`.
pub trait ExternalProcess: Send + Sync {
    /// Run a program to completion or until its deadline
    fn run(&self, invocation: &Invocation) -> EngineResult<ProcessOutput>;

    /// Check whether a program can be started at all
    fn is_available(&self, program: &str, probe_arg: &str) -> bool {
        self.run(
            &Invocation::new(program)
                .arg(probe_arg)
                .timeout(Duration::from_secs(5)),
        )
        .is_ok()
    }
}
