//! Configuration export and import
//!
//! On Windows the managed application keeps its settings in the registry and
//! the configuration artifact is a `.reg` export. Elsewhere the same role is
//! played by a preferences file, copied verbatim.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::process::{ExternalProcess, Invocation};

const REG_TIMEOUT: Duration = Duration::from_secs(120);

/// Where the managed application's configuration lives
pub trait ConfigStore: Send + Sync {
    /// Human-readable source used in logs
    fn describe(&self) -> String;

    /// Write the current configuration to `dest`
    fn export(&self, dest: &Path) -> EngineResult<()>;

    /// Replace the current configuration with the one in `source`
    fn import(&self, source: &Path) -> EngineResult<()>;
}

/// Registry key exported and imported with `reg.exe`
pub struct RegistryStore {
    key: String,
    process: Arc<dyn ExternalProcess>,
}

impl RegistryStore {
    /// Store for `key`
    pub fn new(key: impl Into<String>, process: Arc<dyn ExternalProcess>) -> Self {
        Self {
            key: key.into(),
            process,
        }
    }

    fn reg(&self, invocation: Invocation, action: &str) -> EngineResult<()> {
        debug!(command = %invocation.display(), "Running reg");
        let output = self.process.run(&invocation.timeout(REG_TIMEOUT))?;
        if output.success() {
            return Ok(());
        }
        let reason = if output.timed_out {
            "timed out".to_string()
        } else {
            format!(
                "exit code {}: {}",
                output.exit_code.unwrap_or(-1),
                output.stderr.trim()
            )
        };
        Err(EngineError::tool_failed("reg", format!("{} failed, {}", action, reason)))
    }
}

impl ConfigStore for RegistryStore {
    fn describe(&self) -> String {
        self.key.clone()
    }

    fn export(&self, dest: &Path) -> EngineResult<()> {
        let invocation = Invocation::new("reg")
            .arg("export")
            .arg(self.key.as_str())
            .arg(dest.display().to_string())
            .arg("/y");
        self.reg(invocation, "export")?;
        if !dest.exists() {
            return Err(EngineError::tool_failed("reg", "export produced no file"));
        }
        Ok(())
    }

    fn import(&self, source: &Path) -> EngineResult<()> {
        let invocation = Invocation::new("reg")
            .arg("import")
            .arg(source.display().to_string());
        self.reg(invocation, "import")
    }
}

/// Configuration kept in a single file
pub struct PreferencesFileStore {
    file: PathBuf,
}

impl PreferencesFileStore {
    /// Store backed by `file`
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }
}

impl ConfigStore for PreferencesFileStore {
    fn describe(&self) -> String {
        self.file.display().to_string()
    }

    fn export(&self, dest: &Path) -> EngineResult<()> {
        if !self.file.is_file() {
            return Err(EngineError::Config(format!(
                "Preferences file not found: {}",
                self.file.display()
            )));
        }
        fs::copy(&self.file, dest).map_err(|e| {
            EngineError::Io(format!("Failed to export {}: {}", self.file.display(), e))
        })?;
        Ok(())
    }

    fn import(&self, source: &Path) -> EngineResult<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, &self.file).map_err(|e| {
            EngineError::Io(format!("Failed to import {}: {}", source.display(), e))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ScriptedProcess, ScriptedResponse};
    use tempfile::TempDir;

    #[test]
    fn test_registry_export_command() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("Regbackup-Monday.reg");
        fs::write(&dest, "Windows Registry Editor Version 5.00").unwrap();

        let process = Arc::new(ScriptedProcess::new());
        let store = RegistryStore::new(r"HKEY_CURRENT_USER\Software\Plex, Inc.", process.clone());
        store.export(&dest).unwrap();

        let call = &process.calls_to("reg")[0];
        assert_eq!(call.args[0], "export");
        assert_eq!(call.args[1], r"HKEY_CURRENT_USER\Software\Plex, Inc.");
        assert_eq!(call.args[3], "/y");
    }

    #[test]
    fn test_registry_import_failure() {
        let process = Arc::new(ScriptedProcess::new().on_arg(
            "reg",
            "import",
            ScriptedResponse::failure(1, "ERROR: Error accessing the registry."),
        ));
        let store = RegistryStore::new("HKCU\\Software\\Plex, Inc.", process);

        let err = store.import(Path::new("C:\\backup.reg")).unwrap_err();
        assert!(err.to_string().contains("Error accessing the registry"));
    }

    #[test]
    fn test_preferences_file_round_trip() {
        let temp = TempDir::new().unwrap();
        let live = temp.path().join("data").join("Preferences.xml");
        fs::create_dir_all(live.parent().unwrap()).unwrap();
        fs::write(&live, "<Preferences a=\"1\"/>").unwrap();

        let store = PreferencesFileStore::new(&live);
        let exported = temp.path().join("export.reg");
        store.export(&exported).unwrap();

        fs::write(&live, "changed").unwrap();
        store.import(&exported).unwrap();
        assert_eq!(fs::read_to_string(&live).unwrap(), "<Preferences a=\"1\"/>");
    }

    #[test]
    fn test_preferences_export_without_file() {
        let temp = TempDir::new().unwrap();
        let store = PreferencesFileStore::new(temp.path().join("missing.xml"));
        assert!(store.export(&temp.path().join("out.reg")).is_err());
    }
}
