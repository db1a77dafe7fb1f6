// ── Voucher domain types ──
//
// The plan shape is a tagged variant tree: a wall-clock time plan
// cannot exist without a device profile, and a data plan cannot carry
// a count policy. Illegal combinations are unrepresentable; the
// loosely-typed issue request is validated into this shape exactly
// once, at the engine boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use super::DeviceId;

/// Lifecycle state of a voucher.
///
/// Legal edges: `Unused → Active → Expired`, plus the orthogonal
/// administrative `* → Sold` which never touches the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum VoucherStatus {
    Unused,
    Active,
    Expired,
    Sold,
}

/// How a time-based voucher's consumption is counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimePolicy {
    /// Absolute elapsed time since activation, enforced by the device
    /// profile's own scheduler via the AAA expiration attribute.
    WallClock {
        /// Device hotspot profile backing the credential group.
        profile: String,
    },
    /// Accumulated connected time across sessions, enforced by the
    /// reconciliation sweep. No expiration attribute is ever set.
    OnlineOnly,
}

/// What a voucher entitles its holder to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum Plan {
    TimeBased {
        policy: TimePolicy,
        duration_minutes: Option<u32>,
    },
    DataBased {
        data_limit_bytes: u64,
    },
}

impl Plan {
    /// `true` for plans whose exhaustion the sweep computes from
    /// accumulated accounting time.
    pub fn is_online_only(&self) -> bool {
        matches!(
            self,
            Self::TimeBased {
                policy: TimePolicy::OnlineOnly,
                ..
            }
        )
    }

    pub fn duration_minutes(&self) -> Option<u32> {
        match self {
            Self::TimeBased {
                duration_minutes, ..
            } => *duration_minutes,
            Self::DataBased { .. } => None,
        }
    }

    /// The device profile, for wall-clock plans.
    pub fn profile(&self) -> Option<&str> {
        match self {
            Self::TimeBased {
                policy: TimePolicy::WallClock { profile },
                ..
            } => Some(profile),
            _ => None,
        }
    }

    /// Name of the credential group this plan maps to on `device`.
    ///
    /// Wall-clock plans share a group per `(profile, device)`;
    /// everything else lands in the device's bare tracking bucket.
    pub fn group_name(&self, device: &DeviceId) -> String {
        match self.profile() {
            Some(profile) => format!("{profile}@{device}"),
            None => format!("dev:{device}"),
        }
    }
}

/// A single issued access credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voucher {
    pub id: Uuid,
    /// AAA principal and device-visible code.
    pub username: String,
    /// Equals `username` for code-style vouchers.
    pub password: String,
    pub plan: Plan,
    /// Sale price in minor currency units.
    pub price: u64,
    pub status: VoucherStatus,
    pub device_id: DeviceId,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    /// Absolute expiry, only when computable at issue time.
    pub expires_at: Option<DateTime<Utc>>,
    pub sold_at: Option<DateTime<Utc>>,
}
