//! Backup CLI commands
//!
//! Creating, listing and renaming backup packages.

use clap::Args;
use std::fs;
use std::path::PathBuf;

use super::{follow, format_size, print_summary, report_failure, system_engine};
use crate::backup::{BackupOptions, BackupPackage};
use crate::config::{EnginePaths, Settings};
use crate::error::EngineResult;

/// Arguments of `backup`
#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Folder to create the backup in (defaults to the configured backup root)
    #[arg(short, long)]
    pub dest: Option<PathBuf>,

    /// Skip the configuration export
    #[arg(long)]
    pub no_config: bool,

    /// Skip the data directory
    #[arg(long)]
    pub no_data: bool,

    /// Leave the service running during the copy
    #[arg(long)]
    pub no_stop: bool,

    /// Leave partial output behind on failure instead of rolling back
    #[arg(long)]
    pub no_rollback: bool,
}

/// Arguments of `list`
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Folder to look in (defaults to the configured backup root)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Show detailed information
    #[arg(short, long)]
    pub verbose: bool,
}

/// Arguments of `rename`
#[derive(Args, Debug)]
pub struct RenameArgs {
    /// Backup folder or .zip
    pub package: PathBuf,

    /// New name, without extension
    pub name: String,
}

/// Handle `backup`
pub fn handle_backup_command(paths: &EnginePaths, settings: &Settings, args: BackupArgs) -> EngineResult<()> {
    let mut options = BackupOptions::from_settings(settings, paths);
    if let Some(dest) = args.dest {
        options.backup_root = dest;
    }
    options.include_config &= !args.no_config;
    options.include_data &= !args.no_data;
    options.stop_service &= !args.no_stop;
    options.enable_rollback &= !args.no_rollback;

    println!("Creating backup in {}...", options.backup_root.display());
    let engine = system_engine(settings);
    match follow(engine.backup(options)?)? {
        Ok(report) => {
            println!();
            println!("Backup created: {}", report.package.display());
            if let Some(mirror) = &report.mirror {
                println!(
                    "Files copied: {} of {} ({:?})",
                    mirror.files_copied, mirror.files_found, mirror.method
                );
            }
            print_summary(&report.log);
            Ok(())
        }
        Err(failure) => Err(report_failure(failure)),
    }
}

/// Handle `list`
pub fn handle_list_command(paths: &EnginePaths, settings: &Settings, args: ListArgs) -> EngineResult<()> {
    let root = args.dir.unwrap_or_else(|| settings.backup_root(paths));
    let mut packages: Vec<BackupPackage> = match fs::read_dir(&root) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .filter_map(|entry| BackupPackage::open(&entry.path()).ok())
            .collect(),
        Err(_) => Vec::new(),
    };

    if packages.is_empty() {
        println!("No backups found in {}.", root.display());
        println!("Create one with: pms-backup backup");
        return Ok(());
    }
    packages.sort_by(|a, b| b.created.cmp(&a.created));

    println!("Available Backups");
    println!("=================");
    println!();

    for (i, package) in packages.iter().enumerate() {
        let kind = if package.compressed { " [zip]" } else { "" };
        if args.verbose {
            println!(
                "{}. {}{}\n   Created: {}\n   Size: {}\n   Path: {}\n",
                i + 1,
                package.name,
                kind,
                package.created.format("%Y-%m-%d %H:%M:%S"),
                format_size(package.size),
                package.path.display(),
            );
        } else {
            println!(
                "  {}. {} ({}){}",
                i + 1,
                package.name,
                format_size(package.size),
                kind,
            );
        }
    }

    println!();
    println!("Total: {} backup(s)", packages.len());
    Ok(())
}

/// Handle `rename`
pub fn handle_rename_command(args: RenameArgs) -> EngineResult<()> {
    let mut package = BackupPackage::open(&args.package)?;
    let old = package.name.clone();
    package.rename(&args.name)?;
    println!("Renamed '{}' to '{}'", old, package.name);
    println!("Location: {}", package.path.display());
    Ok(())
}
