//! ICE connectivity parameters and gather options

use std::net::{Ipv4Addr, SocketAddr};

use rand::distributions::{Alphanumeric, DistString};
use serde::{Deserialize, Serialize};

/// Length of a generated username fragment
pub const USERNAME_FRAGMENT_LEN: usize = 8;

/// Length of a generated ICE password
pub const PASSWORD_LEN: usize = 24;

/// Short-lived credential pair used to authenticate connectivity checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
}

impl IceParameters {
    pub fn new(username_fragment: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username_fragment: username_fragment.into(),
            password: password.into(),
        }
    }

    /// Generate random local credentials
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            username_fragment: Alphanumeric.sample_string(&mut rng, USERNAME_FRAGMENT_LEN),
            password: Alphanumeric.sample_string(&mut rng, PASSWORD_LEN),
        }
    }

    /// USERNAME attribute for a check sent with these as the remote
    /// parameters: `remote_ufrag:local_ufrag`
    pub fn check_username(&self, local: &IceParameters) -> String {
        format!("{}:{}", self.username_fragment, local.username_fragment)
    }
}

/// Which candidate types to gather
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceGatherPolicy {
    #[default]
    All,
    NoHost,
    Relay,
}

/// Options passed to `gather`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceGatherOptions {
    /// Local address to bind; port 0 picks an ephemeral port
    pub bind_address: SocketAddr,
    pub gather_policy: IceGatherPolicy,
}

impl Default for IceGatherOptions {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            gather_policy: IceGatherPolicy::All,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_parameters() {
        let a = IceParameters::generate();
        let b = IceParameters::generate();

        assert_eq!(a.username_fragment.len(), USERNAME_FRAGMENT_LEN);
        assert_eq!(a.password.len(), PASSWORD_LEN);
        assert!(a.password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_check_username_order() {
        let remote = IceParameters::new("srv", "password");
        let local = IceParameters::new("cli", "secret");
        assert_eq!(remote.check_username(&local), "srv:cli");
    }
}
