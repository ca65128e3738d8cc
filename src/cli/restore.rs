//! Restore CLI commands

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use super::{follow, format_size, print_summary, report_failure, system_engine};
use crate::backup::BackupPackage;
use crate::config::Settings;
use crate::error::EngineResult;
use crate::restore::{recover_from_snapshot, RestoreOptions};

/// Arguments of `restore`
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Backup folder or .zip
    pub package: PathBuf,

    /// Data directory to restore into (defaults to the configured one)
    #[arg(short, long)]
    pub target: Option<PathBuf>,

    /// Leave the current configuration in place
    #[arg(long)]
    pub no_config: bool,

    /// Keep the safety snapshot instead of rolling back on failure
    #[arg(long)]
    pub no_rollback: bool,

    /// Time budget of the whole restore, in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments of `recover`
#[derive(Args, Debug)]
pub struct RecoverArgs {
    /// Safety snapshot folder kept by a failed restore
    pub snapshot: PathBuf,

    /// Data directory to put it back into (defaults to the configured one)
    #[arg(short, long)]
    pub target: Option<PathBuf>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub force: bool,
}

/// Handle `restore`
pub fn handle_restore_command(settings: &Settings, args: RestoreArgs) -> EngineResult<()> {
    let package = BackupPackage::open(&args.package)?;
    let mut options = RestoreOptions::from_settings(&args.package, settings);
    if let Some(target) = args.target {
        options.target = target;
    }
    options.restore_config &= !args.no_config;
    options.enable_rollback &= !args.no_rollback;
    if let Some(secs) = args.timeout {
        options.timeout = Duration::from_secs(secs);
    }

    println!("Backup Information");
    println!("==================");
    println!("Name: {}", package.name);
    println!("Created: {}", package.created.format("%Y-%m-%d %H:%M:%S"));
    println!("Size: {}", format_size(package.size));
    println!("Target: {}", options.target.display());
    println!();

    if !args.force {
        println!("WARNING: This will stop the service and overwrite ALL current data!");
        println!("To proceed, run again with --force flag:");
        println!("  pms-backup restore \"{}\" --force", args.package.display());
        return Ok(());
    }

    let engine = system_engine(settings);
    match follow(engine.restore(options)?)? {
        Ok(report) => {
            println!();
            println!("Restore complete!");
            if let Some(mirror) = &report.mirror {
                println!("Files restored: {} of {}", mirror.files_copied, mirror.files_found);
            }
            if !report.service_running {
                println!("Note: the service could not be started; start it manually.");
            }
            print_summary(&report.log);
            Ok(())
        }
        Err(failure) => Err(report_failure(failure)),
    }
}

/// Handle `recover`
pub fn handle_recover_command(settings: &Settings, args: RecoverArgs) -> EngineResult<()> {
    let target = args.target.unwrap_or_else(|| settings.profile().data_dir);

    if !args.force {
        println!("This will replace the contents of {}", target.display());
        println!("with the safety snapshot at {}.", args.snapshot.display());
        println!("Stop the service first. To proceed, run again with --force flag:");
        println!("  pms-backup recover \"{}\" --force", args.snapshot.display());
        return Ok(());
    }

    let files = recover_from_snapshot(&args.snapshot, &target, &settings.retry_policy())?;
    println!("Recovered {} file(s) into {}", files, target.display());
    Ok(())
}
