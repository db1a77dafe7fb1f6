// ── Session projection ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DeviceId;

/// A materialized accounting record.
///
/// Derived, never authoritative: the accounting log on the AAA side is
/// the source of truth, this is a read-optimized projection kept by the
/// session ledger. Multiple sessions per voucher are normal
/// (reconnects).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The accounting record's unique id.
    pub unique_id: String,
    pub username: String,
    pub device_id: DeviceId,
    pub started_at: DateTime<Utc>,
    /// `None` means the session is still open.
    pub stopped_at: Option<DateTime<Utc>>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub uptime_seconds: u64,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.stopped_at.is_none()
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_in.saturating_add(self.bytes_out)
    }
}
