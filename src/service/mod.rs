//! Control of the managed service
//!
//! Every operation is tolerant of the service already being in the desired
//! state: stopping a stopped service and starting a running one succeed.

mod local;
mod systemd;

use crate::error::EngineResult;

pub use local::LocalServiceController;
pub use systemd::SystemdServiceController;

/// Stop, start and query the managed service
pub trait ServiceController: Send + Sync {
    /// Human-readable name used in logs
    fn describe(&self) -> String;

    /// Whether any of the service's processes are running
    fn is_running(&self) -> EngineResult<bool>;

    /// Stop the service
    fn stop(&self) -> EngineResult<()>;

    /// Start the service
    fn start(&self) -> EngineResult<()>;
}
