//! Service control through the local process table

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use sysinfo::{ProcessExt, System, SystemExt};
use tracing::{debug, info, warn};

use super::ServiceController;
use crate::config::ServiceProfile;
use crate::error::{EngineError, EngineResult};

/// How long to wait for killed processes to go away
const STOP_WAIT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Controls a desktop-style service: processes matched by name, started
/// from the first executable that exists
pub struct LocalServiceController {
    name: String,
    process_names: Vec<String>,
    executables: Vec<PathBuf>,
}

impl LocalServiceController {
    /// Controller for the processes described by `profile`
    pub fn from_profile(profile: &ServiceProfile) -> Self {
        Self {
            name: profile.name.clone(),
            process_names: profile.process_names.clone(),
            executables: profile.executable_paths.clone(),
        }
    }

    fn matches(&self, process_name: &str) -> bool {
        self.process_names.iter().any(|name| {
            process_name == name
                || process_name
                    .strip_suffix(".exe")
                    .is_some_and(|stem| stem == name)
        })
    }

    fn running_count(&self, system: &mut System) -> usize {
        system.refresh_processes();
        system
            .processes()
            .values()
            .filter(|p| self.matches(p.name()))
            .count()
    }
}

impl ServiceController for LocalServiceController {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn is_running(&self) -> EngineResult<bool> {
        let mut system = System::new();
        Ok(self.running_count(&mut system) > 0)
    }

    fn stop(&self) -> EngineResult<()> {
        let mut system = System::new();
        system.refresh_processes();

        let mut signalled = 0;
        for process in system.processes().values().filter(|p| self.matches(p.name())) {
            debug!(pid = %process.pid(), "Killing {}", process.name());
            if process.kill() {
                signalled += 1;
            }
        }
        if signalled == 0 {
            debug!("{} is not running", self.name);
            return Ok(());
        }

        let started = Instant::now();
        while started.elapsed() < STOP_WAIT {
            if self.running_count(&mut system) == 0 {
                info!("{} stopped", self.name);
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }

        // Lingering handles are handled by the retrying directory clear
        warn!("{} still running {}s after stop", self.name, STOP_WAIT.as_secs());
        Ok(())
    }

    fn start(&self) -> EngineResult<()> {
        if self.is_running()? {
            debug!("{} already running", self.name);
            return Ok(());
        }

        let executable = self
            .executables
            .iter()
            .find(|path| path.exists())
            .ok_or_else(|| {
                EngineError::ServiceControl(format!("No executable found for {}", self.name))
            })?;

        Command::new(executable)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                EngineError::ServiceControl(format!(
                    "Failed to start {}: {}",
                    executable.display(),
                    e
                ))
            })?;

        info!("Started {}", executable.display());
        Ok(())
    }
}
