//! Where and how to reach the remote host

use std::path::PathBuf;
use std::time::Duration;

use super::secret::SecretString;
use crate::config::RemoteDefaults;

/// How to authenticate
///
/// The same credential is used to escalate privileged commands on the host.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Password authentication; also fed to `sudo -S`
    Password(SecretString),
    /// Private key file, optionally protected by a passphrase
    KeyFile {
        path: PathBuf,
        passphrase: Option<SecretString>,
    },
}

impl Credential {
    /// The password to hand to `sudo`, if authentication used one
    pub fn sudo_password(&self) -> Option<&SecretString> {
        match self {
            Self::Password(password) => Some(password),
            Self::KeyFile { .. } => None,
        }
    }

    /// Short description without secret material
    pub fn describe(&self) -> String {
        match self {
            Self::Password(_) => "password".to_string(),
            Self::KeyFile { path, .. } => format!("key {}", path.display()),
        }
    }
}

/// Connection parameters for one remote restore
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub credential: Credential,
    /// Data directory to restore into
    pub data_path: String,
    /// Parent of the per-operation scratch directory
    pub scratch_root: String,
    /// Stop and start the remote service around the copy
    pub manage_service: bool,
    /// Service name used when detection finds nothing
    pub service_name: String,
    /// Wait after stopping the service
    pub settle_delay: Duration,
}

impl RemoteTarget {
    /// Target on `host` using the persisted remote defaults
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        credential: Credential,
        defaults: &RemoteDefaults,
    ) -> Self {
        Self {
            host: host.into(),
            port: defaults.port,
            user: user.into(),
            credential,
            data_path: defaults.data_path.clone(),
            scratch_root: defaults.scratch_root.clone(),
            manage_service: defaults.manage_service,
            service_name: defaults.service_name.clone(),
            settle_delay: Duration::from_secs(defaults.settle_delay_secs),
        }
    }

    /// `user@host:port`
    pub fn address(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }

    /// `user@host`, as ssh expects it
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_defaults() {
        let target = RemoteTarget::new(
            "nas.local",
            "admin",
            Credential::Password("pw".into()),
            &RemoteDefaults::default(),
        );

        assert_eq!(target.port, 22);
        assert_eq!(target.scratch_root, "/tmp/plex_restore");
        assert_eq!(target.service_name, "plexmediaserver");
        assert_eq!(target.address(), "admin@nas.local:22");
        assert_eq!(target.destination(), "admin@nas.local");
        assert_eq!(target.settle_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_debug_hides_password() {
        let credential = Credential::Password("hunter2".into());
        assert!(!format!("{:?}", credential).contains("hunter2"));
        assert_eq!(credential.describe(), "password");
        assert!(credential.sudo_password().is_some());
    }
}
