//! Scripted process backend
//!
//! Answers invocations from a table of canned responses instead of touching
//! the operating system. Rules are matched in insertion order on the program
//! name and, optionally, a substring of any argument; unmatched invocations
//! exit 0 with empty output.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use super::{ExternalProcess, Invocation, ProcessOutput};
use crate::error::{EngineError, EngineResult};

/// A canned answer for matching invocations
#[derive(Debug, Clone, Default)]
pub struct ScriptedResponse {
    /// Exit code to report
    pub exit_code: i32,
    /// Standard output to report
    pub stdout: String,
    /// Standard error to report
    pub stderr: String,
    /// Simulated run time; overrunning the invocation's timeout reports a timeout
    pub delay: Duration,
    /// Simulate a program that cannot be started
    pub missing: bool,
}

impl ScriptedResponse {
    /// Exit with the given code
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Default::default()
        }
    }

    /// Exit 0 printing `stdout`
    pub fn output(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Exit non-zero printing `stderr`
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: code,
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    /// Run for `delay` before answering
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// Program not installed
    pub fn not_found() -> Self {
        Self {
            missing: true,
            ..Default::default()
        }
    }
}

struct Rule {
    program: String,
    arg_contains: Option<String>,
    response: ScriptedResponse,
}

/// Fake `ExternalProcess` driven by rules
#[derive(Default)]
pub struct ScriptedProcess {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedProcess {
    /// Create a backend where every program exits 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every invocation of `program` with `response`
    pub fn on(self, program: &str, response: ScriptedResponse) -> Self {
        self.push_rule(program, None, response);
        self
    }

    /// Answer invocations of `program` having an argument containing `needle`
    pub fn on_arg(self, program: &str, needle: &str, response: ScriptedResponse) -> Self {
        self.push_rule(program, Some(needle.to_string()), response);
        self
    }

    fn push_rule(&self, program: &str, arg_contains: Option<String>, response: ScriptedResponse) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                program: program.to_string(),
                arg_contains,
                response,
            });
        }
    }

    /// Every invocation received so far
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Invocations of one program
    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|inv| inv.program == program)
            .collect()
    }

    fn lookup(&self, invocation: &Invocation) -> ScriptedResponse {
        let rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return ScriptedResponse::default(),
        };
        rules
            .iter()
            .find(|rule| {
                rule.program == invocation.program
                    && rule.arg_contains.as_ref().map_or(true, |needle| {
                        invocation.args.iter().any(|a| a.contains(needle.as_str()))
                    })
            })
            .map(|rule| rule.response.clone())
            .unwrap_or_default()
    }
}

impl ExternalProcess for ScriptedProcess {
    fn run(&self, invocation: &Invocation) -> EngineResult<ProcessOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }

        let response = self.lookup(invocation);
        if response.missing {
            return Err(EngineError::Io(format!(
                "Failed to start '{}': program not found",
                invocation.program
            )));
        }

        if response.delay > invocation.timeout {
            thread::sleep(invocation.timeout);
            return Ok(ProcessOutput {
                exit_code: None,
                timed_out: true,
                ..Default::default()
            });
        }
        if !response.delay.is_zero() {
            thread::sleep(response.delay);
        }

        Ok(ProcessOutput {
            exit_code: Some(response.exit_code),
            stdout: response.stdout,
            stderr: response.stderr,
            timed_out: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_match_in_order() {
        let process = ScriptedProcess::new()
            .on_arg("systemctl", "is-active", ScriptedResponse::exit(3))
            .on("systemctl", ScriptedResponse::output("ok"));

        let probe = Invocation::new("systemctl").args(["is-active", "plex"]);
        let stop = Invocation::new("systemctl").args(["stop", "plex"]);

        assert_eq!(process.run(&probe).unwrap().exit_code, Some(3));
        assert_eq!(process.run(&stop).unwrap().stdout, "ok");
        assert_eq!(process.calls_to("systemctl").len(), 2);
    }

    #[test]
    fn test_unmatched_program_succeeds() {
        let process = ScriptedProcess::new();
        assert!(process.run(&Invocation::new("anything")).unwrap().success());
    }

    #[test]
    fn test_overrun_reports_timeout() {
        let process = ScriptedProcess::new()
            .on("robocopy", ScriptedResponse::slow(Duration::from_secs(10)));
        let inv = Invocation::new("robocopy").timeout(Duration::from_millis(20));

        let out = process.run(&inv).unwrap();
        assert!(out.timed_out);
        assert_eq!(out.exit_code, None);
    }

    #[test]
    fn test_missing_program() {
        let process = ScriptedProcess::new().on("sshpass", ScriptedResponse::not_found());
        assert!(process.run(&Invocation::new("sshpass")).is_err());
        assert!(!process.is_available("sshpass", "-V"));
    }
}
