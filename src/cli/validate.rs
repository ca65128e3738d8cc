//! Validate CLI command

use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use super::format_size;
use crate::backup::archive::{is_zip, list_entries};
use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use crate::validate::{IntegrityValidator, SysinfoFreeSpace};

/// Arguments of `validate`
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Backup folder or .zip
    pub package: PathBuf,

    /// Also check free space for restoring into this directory
    #[arg(short, long)]
    pub target: Option<PathBuf>,
}

/// Handle `validate`
pub fn handle_validate_command(settings: &Settings, args: ValidateArgs) -> EngineResult<()> {
    let validator = IntegrityValidator::from_profile(&settings.profile(), Arc::new(SysinfoFreeSpace));
    let kind = validator.check(&args.package)?;

    println!("Backup: {}", args.package.display());
    println!("Kind: {:?}", kind);
    if is_zip(&args.package) {
        let entries = list_entries(&args.package)?;
        println!("Entries: {}", entries.iter().filter(|e| !e.is_dir).count());
    }

    if let Some(target) = args.target {
        let required = validator.required_space(&args.package)?;
        println!("Space needed: {}", format_size(required));
        if !validator.check_disk_space(&args.package, &target) {
            return Err(EngineError::ValidationFailed(format!(
                "Insufficient disk space in {}",
                target.display()
            )));
        }
        println!("Disk space: OK");
    }

    println!("Status: valid");
    Ok(())
}
