//! Config CLI command

use crate::config::{EnginePaths, Settings};
use crate::error::EngineResult;

/// Handle `config`: show paths and persisted defaults
pub fn handle_config_command(paths: &EnginePaths, settings: &Settings) -> EngineResult<()> {
    let profile = settings.profile();

    println!("pms-backup Configuration");
    println!("========================");
    println!("Config directory: {}", paths.base_dir().display());
    println!("Settings file:    {}", paths.settings_file().display());
    println!("Backup root:      {}", settings.backup_root(paths).display());
    println!("Data directory:   {}", profile.data_dir.display());
    println!();
    println!("Settings:");
    println!("  Include configuration: {}", settings.include_config);
    println!("  Include data:          {}", settings.include_data);
    println!("  Stop service:          {}", settings.stop_service);
    println!("  Rollback on failure:   {}", settings.enable_rollback);
    println!("  Configuration backend: {:?}", settings.config_backend);
    if let Some(unit) = &settings.service_unit {
        println!("  Service unit:          {}", unit);
    }
    println!(
        "  Retry:                 {} attempt(s), {} ms base delay",
        settings.retry.attempts, settings.retry.base_delay_ms
    );
    println!("  Mirror timeout:        {}s", settings.mirror_timeout_secs);
    println!("  Restore timeout:       {}s", settings.restore_timeout_secs);
    println!();
    println!("Remote defaults:");
    println!("  Port:         {}", settings.remote.port);
    println!("  Data path:    {}", settings.remote.data_path);
    println!("  Scratch root: {}", settings.remote.scratch_root);
    println!("  Service:      {}", settings.remote.service_name);
    Ok(())
}
