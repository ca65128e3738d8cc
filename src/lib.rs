//! pms-backup - backup and restore engine for a media server
//!
//! This library backs up and restores a stateful application's data
//! directory and configuration. Destructive steps (stopping the service,
//! clearing its data, replacing its configuration) are recorded in a
//! rollback ledger so that a failed operation can be reverted, and restores
//! can also be replayed onto a remote Linux host over SSH.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Path resolution, persisted settings, managed-application profile
//! - `error`: Error taxonomy and the failure value returned by operations
//! - `oplog`: Operation log and progress reporting
//! - `process`: External program capability (native and scripted)
//! - `service`: Stopping and starting the managed service
//! - `fsops`: Retrying directory clearing and the mirror/fallback copy
//! - `rollback`: The rollback ledger
//! - `validate`: Package validation and disk-space checks
//! - `backup`: Backup layout, packages, configuration stores, backup operation
//! - `restore`: Safety snapshots and the restore operation
//! - `remote`: SSH transport and the remote restore pipeline
//! - `engine`: Runs one operation at a time on a worker thread
//!
//! # Example
//!
//! ```rust,ignore
//! use pms_backup::config::{EnginePaths, Settings};
//! use pms_backup::engine::{Collaborators, Engine};
//!
//! let paths = EnginePaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! let engine = Engine::new(Collaborators::system(&settings), transport);
//! let handle = engine.backup(BackupOptions::from_settings(&settings, &paths))?;
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod fsops;
pub mod oplog;
pub mod process;
pub mod remote;
pub mod restore;
pub mod rollback;
pub mod service;
pub mod validate;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::{EngineError, EngineResult, OperationFailure};
