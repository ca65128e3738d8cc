//! Pre-restore checks
//!
//! Validation is the only stage allowed to reject an operation, and it does
//! so before anything is touched.

mod free_space;
mod integrity;

pub use free_space::{FreeSpaceProbe, SysinfoFreeSpace};
pub use integrity::{IntegrityValidator, PackageKind, ARCHIVE_EXPANSION_FACTOR, SPACE_SAFETY_FACTOR};
