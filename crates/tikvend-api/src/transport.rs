// Connection settings shared by every RouterOS client instance.
//
// Mirrors the address/credential/timeout tuple the daemon resolves per
// device; the client itself stays free of config-file concerns.

use std::time::Duration;

use secrecy::SecretString;

/// How to reach and authenticate against one router's binary API.
#[derive(Debug, Clone)]
pub struct RosClientConfig {
    /// `host:port` of the API service (default RouterOS port is 8728).
    pub address: String,
    /// API username.
    pub username: String,
    /// API password.
    pub password: SecretString,
    /// Bound on TCP connect + login. Kept short: this doubles as the
    /// reachability-probe budget.
    pub connect_timeout: Duration,
    /// Bound on a single command's full request/reply cycle.
    pub command_timeout: Duration,
}

impl RosClientConfig {
    /// Create a config with the default timeout bounds.
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            password,
            connect_timeout: Duration::from_secs(4),
            command_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}
