use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `tikvend-api` crate.
///
/// Covers every failure mode of the binary API: socket-level I/O,
/// bounded-time expiry, login rejection, command traps, and malformed
/// frames. `tikvend-core` maps these into domain-appropriate variants.
///
/// Note what is *not* here: an empty result set. A `!done` reply with
/// zero `!re` rows is a legitimate "no matching rows" response and is
/// returned as `Ok(vec![])` by [`RosClient::execute`](crate::RosClient::execute).
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// Socket-level failure (connection refused, reset, DNS, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The TCP connect + login handshake exceeded its bound.
    #[error("connect timed out after {timeout:?}")]
    ConnectTimeout { timeout: Duration },

    /// A command exceeded its execution bound.
    #[error("command timed out after {timeout:?}")]
    CommandTimeout { timeout: Duration },

    // ── Authentication ──────────────────────────────────────────────
    /// The router rejected the API credentials.
    #[error("login failed: {message}")]
    Login { message: String },

    // ── Command replies ─────────────────────────────────────────────
    /// The router answered with a `!trap` sentence — the command was
    /// understood but refused or failed on the device.
    #[error("command trap: {message}")]
    Trap {
        message: String,
        /// RouterOS trap category (e.g. "missing", "argument-value"),
        /// when the device reports one.
        category: Option<String>,
    },

    /// The router answered with `!fatal` — the connection is dead.
    #[error("fatal reply: {message}")]
    Fatal { message: String },

    // ── Framing ─────────────────────────────────────────────────────
    /// A frame that does not follow the word-length encoding, or a
    /// reply sentence with an unknown leading word.
    #[error("protocol violation: {message}")]
    Protocol { message: String },

    /// Refused to encode a word longer than the protocol allows.
    #[error("word of {len} bytes exceeds the protocol limit")]
    WordTooLong { len: usize },
}

impl Error {
    /// Returns `true` if this is a transient failure worth retrying on
    /// a later tick (the device may simply be unreachable right now).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectTimeout { .. } | Self::CommandTimeout { .. }
        )
    }

    /// Returns `true` if the device rejected our credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Login { .. })
    }

    /// Returns `true` if the device reported "no such item" for the
    /// target of a remove/set command.
    pub fn is_missing_item(&self) -> bool {
        match self {
            Self::Trap { message, category } => {
                category.as_deref() == Some("missing")
                    || message.contains("no such item")
            }
            _ => false,
        }
    }
}
