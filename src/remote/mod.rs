//! Restoring onto a remote Linux host
//!
//! - `RemoteTarget` and `Credential`: where to connect and how to authenticate
//! - `RemoteTransport` / `RemoteSession`: the secure-shell capability
//! - `OpenSshTransport`: the capability over the system OpenSSH client
//! - `RemoteRestorePipeline`: the six-stage restore

mod openssh;
mod pipeline;
mod secret;
mod target;
mod transport;

pub use openssh::OpenSshTransport;
pub use pipeline::{RemoteRestoreOptions, RemoteRestorePipeline, RemoteRestoreReport, REMOTE_COMMAND_TIMEOUT};
pub use secret::SecretString;
pub use target::{Credential, RemoteTarget};
pub use transport::{shell_quote, CommandOutput, RemoteSession, RemoteTransport};
