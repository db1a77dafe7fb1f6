// tikvend-api: async client for the MikroTik RouterOS binary API.
//
// This crate is pure protocol plumbing: framing, login, command
// execution, and error classification. It knows nothing about
// vouchers, RADIUS tables, or reconciliation — that lives in
// tikvend-core.

pub mod client;
pub mod command;
pub mod error;
pub mod protocol;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::{RosClient, RosRow};
pub use command::CommandSentence;
pub use error::Error;
pub use protocol::{Reply, ReplyKind, Sentence};
pub use transport::RosClientConfig;
