//! Operation logging for backup and restore runs
//!
//! Every orchestrator call produces one append-only `OperationLog` that is
//! handed back to the caller when the operation ends.
//!
//! # Architecture
//!
//! - `LogEntry`: a single timestamped, leveled message.
//! - `OperationLog`: the ordered entries of one operation, with summary and
//!   full-text renderings.
//! - `Reporter`: the handle stages log through. It appends to the log, mirrors
//!   each entry to `tracing`, and forwards entries and progress to a
//!   `ProgressSink` supplied by the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use pms_backup::oplog::{NullSink, Reporter};
//!
//! let mut reporter = Reporter::new("backup", Arc::new(NullSink));
//! reporter.info("Stopping service...");
//! reporter.progress(0.25, "service stopped");
//! let log = reporter.finish();
//! println!("{}", log.summary());
//! ```

mod entry;
mod log;
mod reporter;

pub use entry::{LogEntry, LogLevel};
pub use log::OperationLog;
pub use reporter::{ChannelSink, NullSink, ProgressEvent, ProgressSink, Reporter};
