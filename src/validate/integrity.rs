//! Structural validation of backup packages and the disk-space estimate

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::free_space::FreeSpaceProbe;
use crate::backup::archive::{find_component, is_zip, list_entries};
use crate::backup::layout::{DATA_DIR, REG_DIR};
use crate::config::ServiceProfile;
use crate::error::{EngineError, EngineResult};
use crate::fsops::dir_size;

/// Assumed ratio of uncompressed to compressed size for archive packages
pub const ARCHIVE_EXPANSION_FACTOR: u64 = 3;
/// Free space required as a multiple of the package's data size
pub const SPACE_SAFETY_FACTOR: u64 = 2;

/// Shape of a valid package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    /// A package folder
    Directory,
    /// A `.zip` of a package folder
    Archive,
}

/// Checks packages before a restore is allowed to start
pub struct IntegrityValidator {
    critical_files: Vec<PathBuf>,
    free_space: Arc<dyn FreeSpaceProbe>,
}

impl IntegrityValidator {
    /// Validator requiring one of `critical_files` (relative to the data folder)
    pub fn new(critical_files: Vec<PathBuf>, free_space: Arc<dyn FreeSpaceProbe>) -> Self {
        Self {
            critical_files,
            free_space,
        }
    }

    /// Validator using the critical files of `profile`
    pub fn from_profile(profile: &ServiceProfile, free_space: Arc<dyn FreeSpaceProbe>) -> Self {
        Self::new(profile.package_critical_files.clone(), free_space)
    }

    /// Whether `package` is structurally plausible
    pub fn validate(&self, package: &Path) -> bool {
        match self.check(package) {
            Ok(_) => true,
            Err(e) => {
                debug!(package = %package.display(), "{}", e);
                false
            }
        }
    }

    /// Like `validate`, with the reason for rejection
    pub fn check(&self, package: &Path) -> EngineResult<PackageKind> {
        if package.is_dir() {
            self.check_directory(package)?;
            Ok(PackageKind::Directory)
        } else if is_zip(package) {
            self.check_archive(package)?;
            Ok(PackageKind::Archive)
        } else if package.exists() {
            Err(invalid(format!(
                "{} is neither a backup folder nor a .zip archive",
                package.display()
            )))
        } else {
            Err(invalid(format!("Backup not found: {}", package.display())))
        }
    }

    fn check_directory(&self, package: &Path) -> EngineResult<()> {
        let has_reg = find_component(package, REG_DIR).is_some_and(|dir| contains_reg_file(&dir));
        let data_dir = find_component(package, DATA_DIR).filter(|dir| !is_empty_dir(dir));

        let Some(data_dir) = data_dir else {
            if has_reg {
                return Ok(());
            }
            return Err(invalid(format!(
                "{} contains neither {} nor {}",
                package.display(),
                REG_DIR,
                DATA_DIR
            )));
        };

        let has_critical = self.critical_files.iter().any(|file| {
            fs::metadata(data_dir.join(file)).is_ok_and(|m| m.is_file() && m.len() > 0)
        });
        if has_critical {
            Ok(())
        } else {
            Err(invalid(format!(
                "{} has no critical data file with content",
                data_dir.display()
            )))
        }
    }

    fn check_archive(&self, package: &Path) -> EngineResult<()> {
        let entries = list_entries(package)
            .map_err(|e| invalid(format!("{} is not a readable archive: {}", package.display(), e)))?;
        if entries.is_empty() {
            return Err(invalid(format!("{} is an empty archive", package.display())));
        }

        let reg_marker = format!("{}/", REG_DIR);
        let data_marker = format!("{}/", DATA_DIR);

        let has_reg = entries
            .iter()
            .any(|e| !e.is_dir && e.name.contains(&reg_marker) && e.name.to_lowercase().ends_with(".reg"));
        let has_data = entries.iter().any(|e| {
            e.name
                .split_once(&data_marker)
                .is_some_and(|(_, rest)| !rest.is_empty())
        });

        if !has_data {
            if has_reg {
                return Ok(());
            }
            return Err(invalid(format!(
                "{} contains neither {} nor {}",
                package.display(),
                REG_DIR,
                DATA_DIR
            )));
        }

        let critical: Vec<String> = self
            .critical_files
            .iter()
            .map(|file| format!("{}{}", data_marker, entry_path(file)))
            .collect();
        let has_critical = entries
            .iter()
            .any(|e| !e.is_dir && e.size > 0 && critical.iter().any(|c| e.name.ends_with(c.as_str())));
        if has_critical {
            Ok(())
        } else {
            Err(invalid(format!(
                "{} has no critical data file with content",
                package.display()
            )))
        }
    }

    /// Free space needed to restore `package`
    pub fn required_space(&self, package: &Path) -> EngineResult<u64> {
        let data_size = if is_zip(package) {
            fs::metadata(package)?.len() * ARCHIVE_EXPANSION_FACTOR
        } else if package.is_dir() {
            dir_size(package)?
        } else {
            return Err(EngineError::Io(format!("Backup not found: {}", package.display())));
        };
        Ok(data_size * SPACE_SAFETY_FACTOR)
    }

    /// Whether the volume holding `destination` has room for `package`
    ///
    /// Fails open: if either size cannot be measured the answer is `true`.
    pub fn check_disk_space(&self, package: &Path, destination: &Path) -> bool {
        let required = match self.required_space(package) {
            Ok(required) => required,
            Err(e) => {
                warn!("Could not measure backup size, skipping disk space check: {}", e);
                return true;
            }
        };
        match self.free_space.available_space(destination) {
            Ok(available) => {
                debug!(required, available, "Disk space check");
                available > required
            }
            Err(e) => {
                warn!("Could not measure free space, skipping disk space check: {}", e);
                true
            }
        }
    }
}

fn invalid(message: String) -> EngineError {
    EngineError::ValidationFailed(message)
}

fn contains_reg_file(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries.filter_map(Result::ok).any(|entry| {
                entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("reg"))
            })
        })
        .unwrap_or(false)
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

fn entry_path(file: &Path) -> String {
    file.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
