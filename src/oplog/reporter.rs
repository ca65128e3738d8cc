//! Stage reporting: operation log + tracing + caller-supplied progress sink

use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{error, info, info_span, warn, Span};

use super::entry::{LogEntry, LogLevel};
use super::log::OperationLog;

/// Receives log entries and progress updates while an operation runs
///
/// Callbacks are invoked from the worker thread running the operation, so
/// implementations must be safe to call from a thread other than the one
/// that started the operation.
pub trait ProgressSink: Send + Sync {
    /// Called for every entry appended to the operation log
    fn on_entry(&self, _entry: &LogEntry) {}

    /// Called when the operation advances; `fraction` is in `0.0..=1.0`
    fn on_progress(&self, _fraction: f32, _stage: &str) {}
}

/// A sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {}

/// Event forwarded by a `ChannelSink`
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A log entry was recorded
    Entry(LogEntry),
    /// The operation advanced
    Progress { fraction: f32, stage: String },
}

/// A sink that forwards events over a channel to another thread
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<ProgressEvent>,
}

impl ChannelSink {
    /// Create a sink sending into `tx`
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn on_entry(&self, entry: &LogEntry) {
        // The receiver may have gone away; the operation carries on regardless
        let _ = self.tx.send(ProgressEvent::Entry(entry.clone()));
    }

    fn on_progress(&self, fraction: f32, stage: &str) {
        let _ = self.tx.send(ProgressEvent::Progress {
            fraction,
            stage: stage.to_string(),
        });
    }
}

/// Handle through which every stage of an operation reports
pub struct Reporter {
    log: OperationLog,
    sink: Arc<dyn ProgressSink>,
    span: Span,
}

impl Reporter {
    /// Start reporting a new operation
    pub fn new(operation: &str, sink: Arc<dyn ProgressSink>) -> Self {
        let log = OperationLog::new(operation);
        let span = info_span!("operation", kind = operation, id = %log.id);
        Self { log, sink, span }
    }

    fn record(&mut self, level: LogLevel, message: String) {
        self.span.in_scope(|| match level {
            LogLevel::Info => info!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        });
        let entry = LogEntry::new(level, message);
        self.sink.on_entry(&entry);
        self.log.push(entry);
    }

    /// Record a completed step
    pub fn info(&mut self, message: impl Into<String>) {
        self.record(LogLevel::Info, message.into());
    }

    /// Record a non-fatal problem
    pub fn warn(&mut self, message: impl Into<String>) {
        self.record(LogLevel::Warning, message.into());
    }

    /// Record a failure
    pub fn error(&mut self, message: impl Into<String>) {
        self.record(LogLevel::Error, message.into());
    }

    /// Report progress as a fraction of the whole operation
    pub fn progress(&self, fraction: f32, stage: &str) {
        self.sink.on_progress(fraction.clamp(0.0, 1.0), stage);
    }

    /// The log recorded so far
    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    /// The tracing span of this operation
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// End the operation and hand back its frozen log
    pub fn finish(mut self) -> OperationLog {
        self.log.finish();
        self.log
    }
}
