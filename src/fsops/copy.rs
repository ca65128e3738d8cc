//! Mirror copy with a fallback
//!
//! The primary path hands the whole tree to an external mirroring tool
//! (robocopy on Windows, rsync elsewhere) and trusts it all-or-nothing. If
//! the tool is missing, exits with a failure code or overruns its deadline,
//! the tree is copied again file by file, keeping whatever can be copied.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{EngineError, EngineResult};
use crate::oplog::Reporter;
use crate::process::{ExternalProcess, Invocation};

/// Individual file failures logged before switching to a summary
const MAX_REPORTED_FAILURES: usize = 10;

/// External mirroring tools the strategy knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorTool {
    /// `robocopy /MIR`
    Robocopy,
    /// `rsync -a --delete`
    Rsync,
}

impl MirrorTool {
    /// The tool normally present on this platform
    pub fn native() -> Self {
        if cfg!(windows) {
            Self::Robocopy
        } else {
            Self::Rsync
        }
    }

    /// Program name
    pub fn program(&self) -> &'static str {
        match self {
            Self::Robocopy => "robocopy",
            Self::Rsync => "rsync",
        }
    }

    /// Exit codes meaning "done", including informational ones
    pub fn is_success(&self, code: i32) -> bool {
        match self {
            // 0-7 report what was copied/extra/mismatched; 8+ are failures
            Self::Robocopy => (0..=7).contains(&code),
            // 24: some source files vanished during the transfer
            Self::Rsync => code == 0 || code == 24,
        }
    }

    /// Build the command line for a request
    pub fn invocation(&self, request: &MirrorRequest, timeout: Duration) -> Invocation {
        match self {
            Self::Robocopy => {
                let mut inv = Invocation::new(self.program())
                    .arg(request.source.display().to_string())
                    .arg(request.destination.display().to_string())
                    .args(["/MIR", "/R:1", "/W:1"]);
                if !request.excludes.is_empty() {
                    inv = inv.arg("/XD");
                    for exclude in &request.excludes {
                        inv = inv.arg(exclude.display().to_string());
                    }
                }
                if let Some(log) = &request.log_file {
                    inv = inv.arg(format!("/log:{}", log.display()));
                }
                inv.timeout(timeout)
            }
            Self::Rsync => {
                let mut inv = Invocation::new(self.program()).args(["-a", "--delete"]);
                for exclude in &request.excludes {
                    inv = inv.arg(format!("--exclude={}", rsync_pattern(&request.source, exclude)));
                }
                if let Some(log) = &request.log_file {
                    inv = inv.arg(format!("--log-file={}", log.display()));
                }
                // Trailing slash: copy the contents, not the directory itself
                inv.arg(format!("{}/", request.source.display()))
                    .arg(format!("{}/", request.destination.display()))
                    .timeout(timeout)
            }
        }
    }
}

/// Anchored rsync pattern for an excluded directory
fn rsync_pattern(source: &Path, exclude: &Path) -> String {
    let relative = exclude.strip_prefix(source).unwrap_or(exclude);
    let text = relative.to_string_lossy().replace('\\', "/");
    format!("/{}/", text.trim_matches('/'))
}

/// One mirror operation
#[derive(Debug, Clone)]
pub struct MirrorRequest {
    /// Tree to copy
    pub source: PathBuf,
    /// Where the copy ends up
    pub destination: PathBuf,
    /// Absolute paths under `source` to leave out
    pub excludes: Vec<PathBuf>,
    /// Copy log to leave behind
    pub log_file: Option<PathBuf>,
    /// When the external tool is terminated
    pub tool_deadline: Instant,
    /// When the surrounding operation runs out of time
    pub operation_deadline: Option<Instant>,
    /// Budget reported if the operation deadline fires
    pub operation_budget: Duration,
}

impl MirrorRequest {
    /// Request a mirror whose tool may run for `tool_timeout`
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, tool_timeout: Duration) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            excludes: Vec::new(),
            log_file: None,
            tool_deadline: Instant::now() + tool_timeout,
            operation_deadline: None,
            operation_budget: Duration::ZERO,
        }
    }

    /// Leave `paths` out of the copy
    pub fn excluding(mut self, paths: Vec<PathBuf>) -> Self {
        self.excludes = paths;
        self
    }

    /// Write a copy log to `path`
    pub fn with_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Bound the copy by the surrounding operation's deadline
    pub fn within(mut self, deadline: Instant, budget: Duration) -> Self {
        self.operation_deadline = Some(deadline);
        self.operation_budget = budget;
        self
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excludes.iter().any(|excluded| path.starts_with(excluded))
    }

    fn check_operation_deadline(&self) -> EngineResult<()> {
        match self.operation_deadline {
            Some(deadline) if Instant::now() >= deadline => Err(EngineError::OperationTimedOut {
                budget: self.operation_budget,
            }),
            _ => Ok(()),
        }
    }

    /// Time the tool may run: its own deadline, capped by the operation's
    fn tool_timeout(&self) -> Duration {
        let deadline = match self.operation_deadline {
            Some(op) => op.min(self.tool_deadline),
            None => self.tool_deadline,
        };
        deadline.saturating_duration_since(Instant::now())
    }
}

/// Which path produced the copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorMethod {
    /// The external mirroring tool
    Primary,
    /// The item-by-item copy
    Fallback,
}

/// Accounting of a finished mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorOutcome {
    /// Path that produced the copy
    pub method: MirrorMethod,
    /// Files found in the source (after exclusions)
    pub files_found: u64,
    /// Files that ended up in the destination
    pub files_copied: u64,
}

impl MirrorOutcome {
    /// Whether every file found was copied
    pub fn complete(&self) -> bool {
        self.files_copied == self.files_found
    }
}

/// Mirrors directory trees, tool first, per-file fallback second
#[derive(Clone)]
pub struct CopyStrategy {
    process: Arc<dyn ExternalProcess>,
    tool: Option<MirrorTool>,
}

impl CopyStrategy {
    /// Use `tool` through `process`, falling back to per-file copy
    pub fn new(process: Arc<dyn ExternalProcess>, tool: Option<MirrorTool>) -> Self {
        Self { process, tool }
    }

    /// Mirror `request.source` into `request.destination`
    pub fn mirror(&self, request: &MirrorRequest, reporter: &mut Reporter) -> EngineResult<MirrorOutcome> {
        if !request.source.is_dir() {
            return Err(EngineError::CopyFailed(format!(
                "Source directory not found: {}",
                request.source.display()
            )));
        }
        fs::create_dir_all(&request.destination)?;

        if let Some(tool) = self.tool {
            reporter.info(format!(
                "Mirroring {} with {}",
                request.source.display(),
                tool.program()
            ));
            match self.run_tool(tool, request) {
                Ok(()) => {
                    let found = source_files(request)?.len() as u64;
                    reporter.info(format!("{} finished: {} file(s) mirrored", tool.program(), found));
                    return Ok(MirrorOutcome {
                        method: MirrorMethod::Primary,
                        files_found: found,
                        files_copied: found,
                    });
                }
                Err(e) if e.triggers_fallback() => {
                    reporter.warn(format!("{}; falling back to item-by-item copy", e));
                }
                Err(e) => return Err(e),
            }
        }

        request.check_operation_deadline()?;
        self.fallback(request, reporter)
    }

    fn run_tool(&self, tool: MirrorTool, request: &MirrorRequest) -> EngineResult<()> {
        request.check_operation_deadline()?;
        let timeout = request.tool_timeout();
        if timeout.is_zero() {
            return Err(EngineError::tool_failed(tool.program(), "deadline passed before start"));
        }

        let invocation = tool.invocation(request, timeout);
        debug!(command = %invocation.display(), "Running mirror tool");
        let output = self
            .process
            .run(&invocation)
            .map_err(|e| EngineError::tool_failed(tool.program(), e.to_string()))?;

        if output.timed_out {
            request.check_operation_deadline()?;
            return Err(EngineError::tool_failed(
                tool.program(),
                format!("did not finish within {}s", timeout.as_secs()),
            ));
        }

        if let Some(log) = &request.log_file {
            if !log.exists() {
                fs::write(log, format!("{}{}", output.stdout, output.stderr))?;
            }
        }

        match output.exit_code {
            Some(code) if tool.is_success(code) => Ok(()),
            Some(code) => Err(EngineError::tool_failed(tool.program(), format!("exit code {}", code))),
            None => Err(EngineError::tool_failed(tool.program(), "terminated by signal")),
        }
    }

    fn fallback(&self, request: &MirrorRequest, reporter: &mut Reporter) -> EngineResult<MirrorOutcome> {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in WalkDir::new(&request.source)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !request.is_excluded(e.path()))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    reporter.warn(format!("Skipping unreadable entry: {}", e));
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                dirs.push(entry.into_path());
            } else {
                files.push(entry.into_path());
            }
        }

        // Structure first, so a file failure never leaves its siblings homeless
        for dir in &dirs {
            if let Ok(relative) = dir.strip_prefix(&request.source) {
                if let Err(e) = fs::create_dir_all(request.destination.join(relative)) {
                    reporter.warn(format!("Failed to create directory {}: {}", relative.display(), e));
                }
            }
        }

        let found = files.len() as u64;
        let mut copied = 0u64;
        let mut failures = Vec::new();
        for file in &files {
            if let Err(e) = request.check_operation_deadline() {
                write_accounting(request, found, copied, &failures)?;
                return Err(e);
            }
            let Ok(relative) = file.strip_prefix(&request.source) else {
                continue;
            };
            match fs::copy(file, request.destination.join(relative)) {
                Ok(_) => copied += 1,
                Err(e) => {
                    if failures.len() < MAX_REPORTED_FAILURES {
                        reporter.warn(format!("Failed to copy {}: {}", relative.display(), e));
                    }
                    failures.push(format!("{}: {}", relative.display(), e));
                }
            }
        }

        if failures.len() > MAX_REPORTED_FAILURES {
            reporter.warn(format!(
                "{} more file(s) failed to copy",
                failures.len() - MAX_REPORTED_FAILURES
            ));
        }
        write_accounting(request, found, copied, &failures)?;

        if copied == 0 {
            return Err(EngineError::CopyFailed(format!(
                "No files could be copied ({} found)",
                found
            )));
        }

        reporter.info(format!("Fallback copy: {} of {} file(s) copied", copied, found));
        Ok(MirrorOutcome {
            method: MirrorMethod::Fallback,
            files_found: found,
            files_copied: copied,
        })
    }
}

fn source_files(request: &MirrorRequest) -> EngineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(&request.source)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !request.is_excluded(e.path()))
    {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Append the fallback's accounting to the copy log, if one was requested
fn write_accounting(request: &MirrorRequest, found: u64, copied: u64, failures: &[String]) -> EngineResult<()> {
    let Some(log) = &request.log_file else {
        return Ok(());
    };
    if let Some(parent) = log.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(log)?;
    writeln!(file, "Fallback copy {} -> {}", request.source.display(), request.destination.display())?;
    writeln!(file, "Files found:  {}", found)?;
    writeln!(file, "Files copied: {}", copied)?;
    for failure in failures {
        writeln!(file, "FAILED {}", failure)?;
    }
    Ok(())
}
