//! Daemon configuration: TOML profile with `TIKVEND_`-prefixed
//! environment overrides (double underscore between nesting levels,
//! e.g. `TIKVEND_RADIUS__SERVER`).
//!
//! The file carries scheduler intervals, the AAA push target, voucher
//! generation defaults, and the device inventory. Secrets arrive as
//! plaintext TOML values (or env overrides) and are wrapped in
//! `SecretString` the moment a typed record is built — nothing past
//! this crate sees them unprotected.

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tikvend_core::{DeviceId, DeviceRecord, EngineConfig, SchedulerConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level daemon configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub radius: RadiusSection,

    #[serde(default)]
    pub vouchers: VouchersSection,

    /// Device inventory registered at startup.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// `[scheduler]` — job tick intervals, all in seconds.
#[derive(Debug, Deserialize, Serialize)]
pub struct SchedulerSection {
    #[serde(default = "default_session_sync_secs")]
    pub session_sync_secs: u64,

    #[serde(default = "default_activation_secs")]
    pub activation_secs: u64,

    #[serde(default = "default_expiration_secs")]
    pub expiration_secs: u64,

    /// Trailing window for picking up closed sessions; must exceed the
    /// sync interval.
    #[serde(default = "default_closed_window_secs")]
    pub closed_session_window_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            session_sync_secs: default_session_sync_secs(),
            activation_secs: default_activation_secs(),
            expiration_secs: default_expiration_secs(),
            closed_session_window_secs: default_closed_window_secs(),
        }
    }
}

fn default_session_sync_secs() -> u64 {
    300
}
fn default_activation_secs() -> u64 {
    30
}
fn default_expiration_secs() -> u64 {
    60
}
fn default_closed_window_secs() -> u64 {
    900
}

/// `[radius]` — the access-policy push target.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RadiusSection {
    /// AAA server address pushed to registered devices. Absent means
    /// devices are assumed to be pre-configured.
    pub server: Option<String>,
}

/// `[vouchers]` — code generation defaults.
#[derive(Debug, Deserialize, Serialize)]
pub struct VouchersSection {
    #[serde(default = "default_charset")]
    pub charset: String,

    #[serde(default = "default_code_length")]
    pub username_length: usize,

    #[serde(default = "default_code_length")]
    pub password_length: usize,
}

impl Default for VouchersSection {
    fn default() -> Self {
        Self {
            charset: default_charset(),
            username_length: default_code_length(),
            password_length: default_code_length(),
        }
    }
}

fn default_charset() -> String {
    tikvend_core::config::DEFAULT_CHARSET.to_owned()
}
fn default_code_length() -> usize {
    8
}

/// `[[devices]]` — one router.
#[derive(Debug, Deserialize, Serialize)]
pub struct DeviceEntry {
    pub id: String,
    pub name: String,
    pub address: String,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    pub api_username: String,

    /// Plaintext in TOML; prefer a `TIKVEND_DEVICES_*` env override.
    pub api_password: String,

    /// Shared secret trusted for this device's AAA traffic.
    pub radius_secret: String,
}

fn default_api_port() -> u16 {
    8728
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load and validate configuration from a TOML file plus environment.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        // Double underscore separates nesting levels, so field names
        // containing underscores stay intact
        // (TIKVEND_SCHEDULER__SESSION_SYNC_SECS).
        .merge(Env::prefixed("TIKVEND_").split("__"))
        .extract()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.session_sync_secs == 0
            || self.scheduler.activation_secs == 0
            || self.scheduler.expiration_secs == 0
        {
            return Err(invalid("scheduler", "intervals must be nonzero"));
        }
        if self.scheduler.closed_session_window_secs <= self.scheduler.session_sync_secs {
            return Err(invalid(
                "scheduler.closed_session_window_secs",
                "must exceed the session sync interval",
            ));
        }

        if self.vouchers.charset.is_empty() {
            return Err(invalid("vouchers.charset", "must not be empty"));
        }
        let mut seen = self.vouchers.charset.chars().collect::<Vec<_>>();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.vouchers.charset.chars().count() {
            return Err(invalid("vouchers.charset", "characters must be unique"));
        }
        if self.vouchers.username_length < 6 {
            return Err(invalid(
                "vouchers.username_length",
                "must be at least 6 for collision resistance",
            ));
        }

        let mut ids: Vec<&str> = self.devices.iter().map(|d| d.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.devices.len() {
            return Err(invalid("devices", "device ids must be unique"));
        }
        for device in &self.devices {
            if device.address.is_empty() {
                return Err(invalid("devices.address", format!("empty for '{}'", device.id)));
            }
        }
        Ok(())
    }

    /// Translate the `[scheduler]` section to the core's config.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            session_sync_interval: Duration::from_secs(self.scheduler.session_sync_secs),
            activation_interval: Duration::from_secs(self.scheduler.activation_secs),
            expiration_interval: Duration::from_secs(self.scheduler.expiration_secs),
            closed_session_window: Duration::from_secs(self.scheduler.closed_session_window_secs),
        }
    }

    /// Translate the `[vouchers]` + `[radius]` sections to the engine's
    /// config.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            charset: self.vouchers.charset.clone(),
            username_length: self.vouchers.username_length,
            password_length: self.vouchers.password_length,
            radius_server: self.radius.server.clone(),
        }
    }
}

impl DeviceEntry {
    /// Build the typed record, wrapping secrets.
    pub fn to_record(&self) -> DeviceRecord {
        DeviceRecord {
            id: DeviceId::from(self.id.as_str()),
            name: self.name.clone(),
            address: self.address.clone(),
            api_port: self.api_port,
            api_username: self.api_username.clone(),
            api_password: SecretString::from(self.api_password.clone()),
            radius_secret: SecretString::from(self.radius_secret.clone()),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SAMPLE: &str = r#"
        [scheduler]
        session_sync_secs = 120
        activation_secs = 15

        [radius]
        server = "10.0.0.2"

        [vouchers]
        username_length = 10

        [[devices]]
        id = "gw-lobby"
        name = "Lobby gateway"
        address = "192.0.2.10"
        api_username = "api"
        api_password = "pw"
        radius_secret = "shared"
    "#;

    #[test]
    fn file_values_override_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("tikvend.toml", SAMPLE)?;
            let config = load(Path::new("tikvend.toml")).unwrap();

            assert_eq!(config.scheduler.session_sync_secs, 120);
            assert_eq!(config.scheduler.expiration_secs, 60, "default survives");
            assert_eq!(config.radius.server.as_deref(), Some("10.0.0.2"));
            assert_eq!(config.vouchers.username_length, 10);

            let record = config.devices[0].to_record();
            assert_eq!(record.api_address(), "192.0.2.10:8728");
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_the_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("tikvend.toml", SAMPLE)?;
            jail.set_env("TIKVEND_RADIUS__SERVER", "10.9.9.9");
            jail.set_env("TIKVEND_SCHEDULER__SESSION_SYNC_SECS", "240");
            let config = load(Path::new("tikvend.toml")).unwrap();
            assert_eq!(config.radius.server.as_deref(), Some("10.9.9.9"));
            assert_eq!(config.scheduler.session_sync_secs, 240);
            Ok(())
        });
    }

    #[test]
    fn short_usernames_are_rejected() {
        let config = Config {
            vouchers: VouchersSection {
                username_length: 4,
                ..VouchersSection::default()
            },
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { field, .. } if field == "vouchers.username_length"));
    }

    #[test]
    fn duplicate_charset_characters_are_rejected() {
        let config = Config {
            vouchers: VouchersSection {
                charset: "aabc".to_owned(),
                ..VouchersSection::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn window_must_exceed_sync_interval() {
        let config = Config {
            scheduler: SchedulerSection {
                session_sync_secs: 900,
                closed_session_window_secs: 900,
                ..SchedulerSection::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }
}
