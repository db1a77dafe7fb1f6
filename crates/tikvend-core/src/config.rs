// ── Engine configuration ──

use serde::{Deserialize, Serialize};

/// Alphabet without lookalike characters (no 0/o, 1/l/i).
pub const DEFAULT_CHARSET: &str = "abcdefghjkmnpqrstuvwxyz23456789";

/// Tunables for credential generation and device provisioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Alphabet for generated codes and passwords.
    pub charset: String,
    /// Length of generated usernames/codes.
    pub username_length: usize,
    /// Length of generated passwords (username/password style only).
    pub password_length: usize,
    /// AAA server address pushed to newly registered devices. `None`
    /// skips the access-policy push.
    pub radius_server: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            charset: DEFAULT_CHARSET.to_owned(),
            username_length: 8,
            password_length: 8,
            radius_server: None,
        }
    }
}
