//! Configuration module for the backup engine
//!
//! This module provides configuration management including:
//! - XDG-compliant path resolution
//! - Persisted engine defaults
//! - The description of the managed application

pub mod paths;
pub mod profile;
pub mod settings;

pub use paths::EnginePaths;
pub use profile::{CriticalArtifact, ServiceProfile};
pub use settings::{ConfigBackend, RemoteDefaults, RetrySettings, Settings};
