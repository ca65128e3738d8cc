//! Service control through systemctl

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::ServiceController;
use crate::error::{EngineError, EngineResult};
use crate::process::{ExternalProcess, Invocation};

const SYSTEMCTL_TIMEOUT: Duration = Duration::from_secs(30);

/// Controls a systemd unit on the local host
pub struct SystemdServiceController {
    unit: String,
    process: Arc<dyn ExternalProcess>,
}

impl SystemdServiceController {
    /// Controller for `unit`
    pub fn new(unit: impl Into<String>, process: Arc<dyn ExternalProcess>) -> Self {
        Self {
            unit: unit.into(),
            process,
        }
    }

    fn systemctl(&self, verb: &str) -> EngineResult<crate::process::ProcessOutput> {
        let invocation = Invocation::new("systemctl")
            .args([verb, self.unit.as_str()])
            .timeout(SYSTEMCTL_TIMEOUT);
        debug!(command = %invocation.display(), "Running systemctl");
        self.process
            .run(&invocation)
            .map_err(|e| EngineError::ServiceControl(format!("Failed to run systemctl: {}", e)))
    }

    fn change_state(&self, verb: &str) -> EngineResult<()> {
        let output = self.systemctl(verb)?;
        if output.success() {
            Ok(())
        } else {
            Err(EngineError::ServiceControl(format!(
                "systemctl {} {} failed: {}",
                verb,
                self.unit,
                output.stderr.trim()
            )))
        }
    }
}

impl ServiceController for SystemdServiceController {
    fn describe(&self) -> String {
        format!("{}.service", self.unit)
    }

    fn is_running(&self) -> EngineResult<bool> {
        Ok(self.systemctl("is-active")?.success())
    }

    fn stop(&self) -> EngineResult<()> {
        self.change_state("stop")
    }

    fn start(&self) -> EngineResult<()> {
        self.change_state("start")
    }
}
