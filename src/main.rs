use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pms_backup::cli::{
    handle_backup_command, handle_config_command, handle_list_command, handle_recover_command,
    handle_remote_command, handle_rename_command, handle_restore_command, handle_validate_command,
    BackupArgs, ListArgs, RecoverArgs, RemoteArgs, RenameArgs, RestoreArgs, ValidateArgs,
};
use pms_backup::config::{EnginePaths, Settings};

#[derive(Parser)]
#[command(
    name = "pms-backup",
    author = "Kaylee Beyene",
    version,
    about = "Backup and restore for a media server's data and configuration",
    long_about = "pms-backup stops the media server, copies its data directory and \
                  configuration into a dated backup, and restores such backups locally \
                  or onto a remote Linux host over SSH. Failed operations are rolled \
                  back automatically."
)]
struct Cli {
    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a backup of the data directory and configuration
    Backup(BackupArgs),

    /// Restore a backup into the local data directory
    Restore(RestoreArgs),

    /// Restore a backup onto a remote Linux host over SSH
    RemoteRestore(RemoteArgs),

    /// Check that a backup is complete enough to restore
    Validate(ValidateArgs),

    /// List backups in the backup folder
    #[command(alias = "ls")]
    List(ListArgs),

    /// Rename a backup
    Rename(RenameArgs),

    /// Put back a safety snapshot kept by a failed restore
    Recover(RecoverArgs),

    /// Write the default settings file
    Init,

    /// Show current configuration and paths
    Config,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "pms_backup=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Initialize paths and settings
    let paths = EnginePaths::new()?;
    let settings = Settings::load_or_create(&paths)?;

    match cli.command {
        Some(Commands::Backup(args)) => handle_backup_command(&paths, &settings, args)?,
        Some(Commands::Restore(args)) => handle_restore_command(&settings, args)?,
        Some(Commands::RemoteRestore(args)) => handle_remote_command(&settings, args)?,
        Some(Commands::Validate(args)) => handle_validate_command(&settings, args)?,
        Some(Commands::List(args)) => handle_list_command(&paths, &settings, args)?,
        Some(Commands::Rename(args)) => handle_rename_command(args)?,
        Some(Commands::Recover(args)) => handle_recover_command(&settings, args)?,
        Some(Commands::Init) => {
            settings.save(&paths)?;
            println!("Settings written to {}", paths.settings_file().display());
        }
        Some(Commands::Config) => handle_config_command(&paths, &settings)?,
        None => {
            println!("pms-backup - media server backup and restore");
            println!();
            println!("Run 'pms-backup --help' for usage information.");
        }
    }

    Ok(())
}
