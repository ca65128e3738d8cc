//! Remote restore CLI command

use clap::Args;
use std::path::PathBuf;

use super::{follow, print_summary, report_failure, system_engine};
use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use crate::remote::{Credential, OpenSshTransport, RemoteRestoreOptions, RemoteTarget, SecretString};

/// Arguments of `remote-restore`
#[derive(Args, Debug)]
pub struct RemoteArgs {
    /// Backup folder or .zip
    pub package: PathBuf,

    /// Remote host name or address
    #[arg(long)]
    pub host: String,

    /// SSH port (defaults to the configured one)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Login user
    #[arg(short, long)]
    pub user: String,

    /// Private key file; without it a password is used
    #[arg(short, long)]
    pub key: Option<PathBuf>,

    /// Prompt for the private key's passphrase
    #[arg(long, requires = "key")]
    pub passphrase: bool,

    /// Data directory on the remote host (defaults to the configured one)
    #[arg(long)]
    pub remote_path: Option<String>,

    /// Do not stop and start the remote service
    #[arg(long)]
    pub no_service: bool,

    /// Only check the client tools and the connection
    #[arg(long)]
    pub check: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub force: bool,
}

/// Handle `remote-restore`
pub fn handle_remote_command(settings: &Settings, args: RemoteArgs) -> EngineResult<()> {
    if !args.check && !args.force {
        println!(
            "This will overwrite the data in {} on {}.",
            args.remote_path.as_deref().unwrap_or(&settings.remote.data_path),
            args.host
        );
        println!("To proceed, run again with --force flag (or --check to test the connection):");
        println!(
            "  pms-backup remote-restore \"{}\" --host {} --user {} --force",
            args.package.display(),
            args.host,
            args.user
        );
        return Ok(());
    }

    let credential = credential_for(&args)?;
    let transport = OpenSshTransport::system();
    let missing = transport.check_available(&credential);
    if !missing.is_empty() {
        return Err(EngineError::ValidationFailed(format!(
            "Missing SSH client tools: {}",
            missing.join(", ")
        )));
    }

    let mut target = RemoteTarget::new(&args.host, &args.user, credential, &settings.remote);
    if let Some(port) = args.port {
        target.port = port;
    }
    if let Some(path) = &args.remote_path {
        target.data_path = path.clone();
    }
    target.manage_service &= !args.no_service;

    if args.check {
        println!("Testing SSH connection to {}...", target.address());
        transport.test_connection(&target)?;
        println!("SSH connection successful!");
        return Ok(());
    }

    let options = RemoteRestoreOptions::new(&args.package, target, &settings.profile());
    let engine = system_engine(settings);
    match follow(engine.remote_restore(options)?)? {
        Ok(report) => {
            println!();
            println!("Remote restore complete!");
            println!("Data owner: {}", report.owner);
            print_summary(&report.log);
            Ok(())
        }
        Err(failure) => Err(report_failure(failure)),
    }
}

fn credential_for(args: &RemoteArgs) -> EngineResult<Credential> {
    match &args.key {
        Some(path) => {
            let passphrase = if args.passphrase {
                Some(prompt("Key passphrase: ")?)
            } else {
                None
            };
            Ok(Credential::KeyFile {
                path: path.clone(),
                passphrase,
            })
        }
        None => {
            let secret = match std::env::var("PMS_SSH_PASSWORD") {
                Ok(value) if !value.is_empty() => SecretString::new(value),
                _ => prompt(&format!("Password for {}@{}: ", args.user, args.host))?,
            };
            Ok(Credential::Password(secret))
        }
    }
}

fn prompt(label: &str) -> EngineResult<SecretString> {
    let value = rpassword::prompt_password(label)
        .map_err(|e| EngineError::Io(format!("Failed to read password: {}", e)))?;
    if value.is_empty() {
        return Err(EngineError::ValidationFailed("Empty password".into()));
    }
    Ok(SecretString::new(value))
}
