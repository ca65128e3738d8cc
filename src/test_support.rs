//! Fakes for exercising orchestrators without a real service, registry,
//! volume or SSH server
//!
//! Compiled for the unit tests, and for the integration tests under `tests/`
//! through the `test-support` feature.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backup::ConfigStore;
use crate::error::{EngineError, EngineResult};
use crate::remote::{CommandOutput, RemoteSession, RemoteTarget, RemoteTransport};
use crate::service::ServiceController;
use crate::validate::FreeSpaceProbe;

/// Ten bytes of configuration export
pub const FAKE_REG_CONTENT: &str = "REGEDIT4\r\n";

/// In-memory service with a running flag
#[derive(Debug, Default)]
pub struct FakeService {
    running: AtomicBool,
    fail_stop: AtomicBool,
    fail_start: AtomicBool,
    events: Mutex<Vec<String>>,
}

impl FakeService {
    /// A service that is up
    pub fn running() -> Self {
        let service = Self::default();
        service.running.store(true, Ordering::SeqCst);
        service
    }

    /// A service that is down
    pub fn stopped() -> Self {
        Self::default()
    }

    /// Make `start` fail
    pub fn failing_start(self) -> Self {
        self.fail_start.store(true, Ordering::SeqCst);
        self
    }

    /// Make `stop` fail
    pub fn failing_stop(self) -> Self {
        self.fail_stop.store(true, Ordering::SeqCst);
        self
    }

    /// Current running flag
    pub fn is_up(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// `stop`/`start` calls received, in order
    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn note(&self, event: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.to_string());
        }
    }
}

impl ServiceController for FakeService {
    fn describe(&self) -> String {
        "fake service".to_string()
    }

    fn is_running(&self) -> EngineResult<bool> {
        Ok(self.is_up())
    }

    fn stop(&self) -> EngineResult<()> {
        self.note("stop");
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(EngineError::ServiceControl("stop refused".into()));
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn start(&self) -> EngineResult<()> {
        self.note("start");
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(EngineError::ServiceControl("start refused".into()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Configuration held in memory
#[derive(Debug, Default)]
pub struct FakeConfigStore {
    content: Mutex<String>,
    fail_export: AtomicBool,
    fail_import: AtomicBool,
}

impl FakeConfigStore {
    /// Store whose live configuration is `content`
    pub fn new(content: &str) -> Self {
        Self {
            content: Mutex::new(content.to_string()),
            ..Default::default()
        }
    }

    /// Make `export` fail
    pub fn failing_export(self) -> Self {
        self.fail_export.store(true, Ordering::SeqCst);
        self
    }

    /// Make `import` fail
    pub fn failing_import(self) -> Self {
        self.fail_import.store(true, Ordering::SeqCst);
        self
    }

    /// Current live configuration
    pub fn content(&self) -> String {
        self.content.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl ConfigStore for FakeConfigStore {
    fn describe(&self) -> String {
        "fake registry".to_string()
    }

    fn export(&self, dest: &Path) -> EngineResult<()> {
        if self.fail_export.load(Ordering::SeqCst) {
            return Err(EngineError::tool_failed("reg", "export failed, exit code 1"));
        }
        fs::write(dest, self.content())?;
        Ok(())
    }

    fn import(&self, source: &Path) -> EngineResult<()> {
        if self.fail_import.load(Ordering::SeqCst) {
            return Err(EngineError::tool_failed("reg", "import failed, exit code 1"));
        }
        let text = fs::read_to_string(source)?;
        if let Ok(mut content) = self.content.lock() {
            *content = text;
        }
        Ok(())
    }
}

/// Free-space probe answering a fixed value, or failing when `None`
#[derive(Debug, Clone, Copy)]
pub struct FixedFreeSpace(pub Option<u64>);

impl FreeSpaceProbe for FixedFreeSpace {
    fn available_space(&self, _path: &Path) -> EngineResult<u64> {
        self.0
            .ok_or_else(|| EngineError::Io("volume not found".into()))
    }
}

/// Populate `dir` like a media server data directory
///
/// Contains a 1 KiB `Preferences.xml`, a library database, and a cache
/// folder that backups leave out.
pub fn fake_data_dir(dir: &Path) -> PathBuf {
    let databases = dir.join("Plug-in Support").join("Databases");
    fs::create_dir_all(&databases).ok();
    fs::create_dir_all(dir.join("Cache")).ok();
    fs::write(dir.join("Preferences.xml"), preferences_xml(1024)).ok();
    fs::write(
        databases.join("com.plexapp.plugins.library.db"),
        vec![0x53u8; 4096],
    )
    .ok();
    fs::write(dir.join("Cache").join("thumb.tmp"), "cache").ok();
    dir.to_path_buf()
}

/// A `Preferences.xml` body of exactly `len` bytes
pub fn preferences_xml(len: usize) -> String {
    let head = "<Preferences ";
    let tail = "/>";
    let pad = len.saturating_sub(head.len() + tail.len());
    format!("{}{}{}", head, " ".repeat(pad), tail)
}

#[derive(Debug, Clone)]
struct TransportRule {
    needle: String,
    output: CommandOutput,
}

/// Remote transport answering commands from canned rules
///
/// Commands are matched on a substring, first rule wins; unmatched commands
/// exit 0 with no output. Every command and upload is recorded.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    rules: Vec<TransportRule>,
    fail_connect: bool,
    commands: Arc<Mutex<Vec<String>>>,
    uploads: Arc<Mutex<Vec<(String, u64)>>>,
}

impl ScriptedTransport {
    /// Transport where everything succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `needle` exit with `status` and print `stderr`
    pub fn fail_on(mut self, needle: &str, status: i32, stderr: &str) -> Self {
        self.rules.push(TransportRule {
            needle: needle.to_string(),
            output: CommandOutput {
                status,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        });
        self
    }

    /// Commands containing `needle` succeed printing `stdout`
    pub fn reply(mut self, needle: &str, stdout: &str) -> Self {
        self.rules.push(TransportRule {
            needle: needle.to_string(),
            output: CommandOutput {
                status: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        });
        self
    }

    /// Refuse to connect
    pub fn unreachable(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Commands executed so far
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Uploads performed so far: remote path and byte count
    pub fn uploads(&self) -> Vec<(String, u64)> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

impl RemoteTransport for ScriptedTransport {
    fn connect(&self, target: &RemoteTarget) -> EngineResult<Box<dyn RemoteSession>> {
        if self.fail_connect {
            return Err(EngineError::Transport(format!(
                "Connection to {} refused",
                target.address()
            )));
        }
        Ok(Box::new(ScriptedSession {
            transport: self.clone(),
        }))
    }
}

struct ScriptedSession {
    transport: ScriptedTransport,
}

impl RemoteSession for ScriptedSession {
    fn execute(&mut self, command: &str, _timeout: Duration) -> EngineResult<CommandOutput> {
        if let Ok(mut commands) = self.transport.commands.lock() {
            commands.push(command.to_string());
        }
        Ok(self
            .transport
            .rules
            .iter()
            .find(|rule| command.contains(&rule.needle))
            .map(|rule| rule.output.clone())
            .unwrap_or_default())
    }

    fn upload(&mut self, local: &Path, remote: &str, progress: &mut dyn FnMut(u64, u64)) -> EngineResult<()> {
        let total = fs::metadata(local)?.len();
        let half = total / 2;
        progress(half, total);
        progress(total, total);
        if let Ok(mut uploads) = self.transport.uploads.lock() {
            uploads.push((remote.to_string(), total));
        }
        Ok(())
    }
}
