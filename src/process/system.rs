//! Native process backend

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, warn};

use super::{ExternalProcess, Invocation, ProcessOutput};
use crate::error::{EngineError, EngineResult};

/// How often a running child is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long output is still collected after the deadline
///
/// A descendant that inherited the pipes can keep them open after the child
/// itself is gone; its output is abandoned after this grace period.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runs real operating-system processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcess;

impl SystemProcess {
    /// Create the native backend
    pub fn new() -> Self {
        Self
    }
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> Receiver<String> {
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = source {
            let _ = reader.read_to_end(&mut buf);
        }
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

fn collect(output: &Receiver<String>, until: Instant, program: &str, stream: &str) -> String {
    output.recv_deadline(until).unwrap_or_else(|_| {
        warn!(program, stream, "output still held open by a descendant process, abandoned");
        String::new()
    })
}

/// Put the child in its own process group so the whole tree can be killed
#[cfg(unix)]
fn isolate(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_command: &mut Command) {}

#[cfg(unix)]
fn tree_kill_command(pid: u32) -> Option<Command> {
    let mut command = Command::new("kill");
    command.args(["-KILL", "--", &format!("-{}", pid)]);
    Some(command)
}

#[cfg(windows)]
fn tree_kill_command(pid: u32) -> Option<Command> {
    let mut command = Command::new("taskkill");
    command.args(["/T", "/F", "/PID", &pid.to_string()]);
    Some(command)
}

#[cfg(not(any(unix, windows)))]
fn tree_kill_command(_pid: u32) -> Option<Command> {
    None
}

/// Kill the child and everything it started, then reap it
fn kill_tree(child: &mut Child) {
    let killed = tree_kill_command(child.id()).is_some_and(|mut command| {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    });
    if !killed {
        debug!(pid = child.id(), "process tree kill failed, killing the child only");
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn wait_with_deadline(child: &mut Child, deadline: Instant) -> EngineResult<(Option<i32>, bool)> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status.code(), false));
        }
        if Instant::now() >= deadline {
            kill_tree(child);
            return Ok((None, true));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

impl ExternalProcess for SystemProcess {
    fn run(&self, invocation: &Invocation) -> EngineResult<ProcessOutput> {
        debug!(command = %invocation.display(), "spawning process");

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &invocation.env {
            command.env(key, value);
        }
        isolate(&mut command);

        let deadline = Instant::now() + invocation.timeout;
        let mut child = command.spawn().map_err(|e| {
            EngineError::Io(format!("Failed to start '{}': {}", invocation.program, e))
        })?;

        // Drain both pipes concurrently so a chatty child cannot block on a full pipe
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let (exit_code, timed_out) = wait_with_deadline(&mut child, deadline)?;
        if timed_out {
            warn!(
                program = %invocation.program,
                timeout_secs = invocation.timeout.as_secs_f32(),
                "process exceeded its deadline and was terminated"
            );
        }

        let until = deadline.max(Instant::now()) + DRAIN_GRACE;
        Ok(ProcessOutput {
            exit_code,
            stdout: collect(&stdout, until, &invocation.program, "stdout"),
            stderr: collect(&stderr, until, &invocation.program, "stderr"),
            timed_out,
        })
    }
}
