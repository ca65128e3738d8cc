//! Restoring a backup package onto the local data directory

mod orchestrator;
mod snapshot;

pub use orchestrator::{RestoreOptions, RestoreOrchestrator, RestoreReport};
pub use snapshot::{recover_from_snapshot, SafetySnapshot};
