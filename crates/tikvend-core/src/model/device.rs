// ── Device (router) domain types ──

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Stable identifier for a registered network access device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered router: where to reach its API and which shared secret
/// its RADIUS traffic is trusted under.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub id: DeviceId,
    /// Human-readable label (also used for the NAS registration).
    pub name: String,
    /// Host or IP of the router.
    pub address: String,
    /// Binary API port (RouterOS default 8728).
    pub api_port: u16,
    /// API username.
    pub api_username: String,
    /// API password.
    pub api_password: SecretString,
    /// Shared secret trusted for this device's auth/accounting traffic.
    pub radius_secret: SecretString,
}

impl DeviceRecord {
    /// `host:port` address of the binary API service.
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.address, self.api_port)
    }
}
