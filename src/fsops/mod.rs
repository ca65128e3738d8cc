//! Filesystem operations under contention
//!
//! - `retry`: clearing a directory whose files may still be held open by the
//!   service that was just stopped
//! - `copy`: mirror copy through an external tool with a per-file fallback
//! - `tree`: small recursive helpers shared by snapshots and rollback

pub mod copy;
pub mod retry;
pub mod tree;

pub use copy::{CopyStrategy, MirrorMethod, MirrorOutcome, MirrorRequest, MirrorTool};
pub use retry::{clear_directory, clear_directory_with, FsBackend, RetryPolicy, StdFs};
pub use tree::{copy_path, copy_tree, dir_size, list_files};
