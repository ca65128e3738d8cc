//! Backup packages and the backup orchestrator
//!
//! - `layout`: folder and file names inside a package
//! - `package`: describing and renaming existing packages
//! - `archive`: zip packaging
//! - `config_store`: configuration export/import backends
//! - `orchestrator`: the backup operation itself

pub mod archive;
pub mod config_store;
pub mod layout;
mod orchestrator;
pub mod package;

pub use config_store::{ConfigStore, PreferencesFileStore, RegistryStore};
pub use layout::BackupLayout;
pub use orchestrator::{BackupOptions, BackupOrchestrator, BackupReport};
pub use package::BackupPackage;
