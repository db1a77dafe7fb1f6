// ── Voucher and device persistence ──
//
// The engine treats both stores as external systems behind traits; the
// in-memory implementations here are the reference semantics. The one
// non-obvious contract is `transition`: a compare-and-set on voucher
// status, which is the idempotence primitive every lifecycle edge is
// built on. Two concurrent callers racing the same edge see exactly one
// `true`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{DeviceId, DeviceRecord, Voucher, VoucherStatus};

/// Listing filter; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct VoucherFilter {
    pub status: Option<VoucherStatus>,
    pub device_id: Option<DeviceId>,
}

impl VoucherFilter {
    fn matches(&self, voucher: &Voucher) -> bool {
        self.status.is_none_or(|s| s == voucher.status)
            && self
                .device_id
                .as_ref()
                .is_none_or(|d| *d == voucher.device_id)
    }
}

/// Voucher record persistence.
#[trait_variant::make(VoucherStore: Send)]
pub trait LocalVoucherStore {
    async fn insert(&self, voucher: Voucher) -> Result<(), CoreError>;

    async fn get(&self, id: Uuid) -> Result<Voucher, CoreError>;

    async fn by_username(&self, username: &str) -> Result<Option<Voucher>, CoreError>;

    async fn list(&self, filter: &VoucherFilter) -> Result<Vec<Voucher>, CoreError>;

    /// Compare-and-set the status from `from` to `to`.
    ///
    /// Returns `Ok(true)` when this call performed the flip, `Ok(false)`
    /// when the voucher was not in `from` (someone else won, or the edge
    /// already happened). Missing voucher is an error. On a winning flip
    /// the matching timestamp is stamped: `activated_at` (and
    /// `expires_at` when the plan carries a duration) for `Active`,
    /// `sold_at` for `Sold`.
    async fn transition(
        &self,
        id: Uuid,
        from: VoucherStatus,
        to: VoucherStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), CoreError>;
}

/// Registered device persistence.
#[trait_variant::make(DeviceStore: Send)]
pub trait LocalDeviceStore {
    async fn upsert_device(&self, record: DeviceRecord) -> Result<(), CoreError>;

    async fn device(&self, id: &DeviceId) -> Result<DeviceRecord, CoreError>;

    async fn remove_device(&self, id: &DeviceId) -> Result<(), CoreError>;

    async fn devices(&self) -> Result<Vec<DeviceRecord>, CoreError>;
}

// ── In-memory implementation ─────────────────────────────────────────

/// DashMap-backed store for vouchers and devices.
///
/// The username index is maintained alongside the primary map; usernames
/// are globally unique so the index is a plain map, not a multimap.
#[derive(Debug, Default)]
pub struct MemoryStore {
    vouchers: DashMap<Uuid, Voucher>,
    by_username: DashMap<String, Uuid>,
    devices: DashMap<DeviceId, DeviceRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stamp(voucher: &mut Voucher, to: VoucherStatus, now: DateTime<Utc>) {
    voucher.status = to;
    match to {
        // `expires_at` is deliberately untouched on activation: wall-clock
        // plans fixed it at issue time, and accumulated-time expiry is not
        // computable in advance.
        VoucherStatus::Active => voucher.activated_at = Some(now),
        VoucherStatus::Expired => {
            voucher.expires_at.get_or_insert(now);
        }
        VoucherStatus::Sold => voucher.sold_at = Some(now),
        VoucherStatus::Unused => {}
    }
}

impl VoucherStore for MemoryStore {
    async fn insert(&self, voucher: Voucher) -> Result<(), CoreError> {
        self.by_username
            .insert(voucher.username.clone(), voucher.id);
        self.vouchers.insert(voucher.id, voucher);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Voucher, CoreError> {
        self.vouchers
            .get(&id)
            .map(|v| v.clone())
            .ok_or_else(|| CoreError::not_found("voucher", id.to_string()))
    }

    async fn by_username(&self, username: &str) -> Result<Option<Voucher>, CoreError> {
        Ok(self
            .by_username
            .get(username)
            .and_then(|id| self.vouchers.get(&id).map(|v| v.clone())))
    }

    async fn list(&self, filter: &VoucherFilter) -> Result<Vec<Voucher>, CoreError> {
        let mut vouchers: Vec<Voucher> = self
            .vouchers
            .iter()
            .filter(|v| filter.matches(v))
            .map(|v| v.value().clone())
            .collect();
        vouchers.sort_by_key(|v| v.created_at);
        Ok(vouchers)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: VoucherStatus,
        to: VoucherStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        // The shard lock held by `get_mut` makes check-then-set atomic.
        let mut voucher = self
            .vouchers
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("voucher", id.to_string()))?;
        if voucher.status != from {
            return Ok(false);
        }
        stamp(&mut voucher, to, now);
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> Result<(), CoreError> {
        if let Some((_, voucher)) = self.vouchers.remove(&id) {
            self.by_username.remove(&voucher.username);
        }
        Ok(())
    }
}

impl DeviceStore for MemoryStore {
    async fn upsert_device(&self, record: DeviceRecord) -> Result<(), CoreError> {
        self.devices.insert(record.id.clone(), record);
        Ok(())
    }

    async fn device(&self, id: &DeviceId) -> Result<DeviceRecord, CoreError> {
        self.devices
            .get(id)
            .map(|d| d.clone())
            .ok_or_else(|| CoreError::not_found("device", id.to_string()))
    }

    async fn remove_device(&self, id: &DeviceId) -> Result<(), CoreError> {
        self.devices.remove(id);
        Ok(())
    }

    async fn devices(&self) -> Result<Vec<DeviceRecord>, CoreError> {
        Ok(self.devices.iter().map(|d| d.value().clone()).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    use super::{MemoryStore, VoucherFilter, VoucherStore};
    use crate::error::CoreError;
    use crate::model::{DeviceId, Plan, TimePolicy, Voucher, VoucherStatus};

    fn voucher(username: &str, plan: Plan) -> Voucher {
        Voucher {
            id: Uuid::new_v4(),
            username: username.to_owned(),
            password: username.to_owned(),
            plan,
            price: 500,
            status: VoucherStatus::Unused,
            device_id: DeviceId::from("gw-lobby"),
            created_at: Utc::now(),
            activated_at: None,
            expires_at: None,
            sold_at: None,
        }
    }

    fn online_plan(minutes: u32) -> Plan {
        Plan::TimeBased {
            policy: TimePolicy::OnlineOnly,
            duration_minutes: Some(minutes),
        }
    }

    #[tokio::test]
    async fn transition_is_a_single_winner_cas() {
        let store = MemoryStore::new();
        let v = voucher("vch-a", online_plan(60));
        let id = v.id;
        store.insert(v).await.unwrap();
        let now = Utc::now();

        let first = store
            .transition(id, VoucherStatus::Unused, VoucherStatus::Active, now)
            .await
            .unwrap();
        let second = store
            .transition(id, VoucherStatus::Unused, VoucherStatus::Active, now)
            .await
            .unwrap();
        assert!(first);
        assert!(!second, "replayed edge must lose the CAS");

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.status, VoucherStatus::Active);
        assert_eq!(stored.activated_at, Some(now));
        assert_eq!(stored.expires_at, None, "accumulated-time expiry is not precomputed");

        assert!(
            store
                .transition(id, VoucherStatus::Active, VoucherStatus::Expired, now)
                .await
                .unwrap()
        );
        assert_eq!(store.get(id).await.unwrap().expires_at, Some(now));
    }

    #[tokio::test]
    async fn transition_missing_voucher_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .transition(
                Uuid::new_v4(),
                VoucherStatus::Unused,
                VoucherStatus::Active,
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn sold_is_orthogonal_and_stamps_sold_at() {
        let store = MemoryStore::new();
        let v = voucher("vch-b", online_plan(60));
        let id = v.id;
        store.insert(v).await.unwrap();
        let now = Utc::now();

        assert!(
            store
                .transition(id, VoucherStatus::Unused, VoucherStatus::Sold, now)
                .await
                .unwrap()
        );
        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.sold_at, Some(now));
        assert_eq!(stored.activated_at, None);
    }

    #[tokio::test]
    async fn delete_clears_username_index() {
        let store = MemoryStore::new();
        let v = voucher("vch-c", online_plan(60));
        let id = v.id;
        store.insert(v).await.unwrap();

        store.delete(id).await.unwrap();
        assert_eq!(store.by_username("vch-c").await.unwrap(), None);
        // Idempotent.
        store.delete(id).await.unwrap();
    }

    #[tokio::test]
    async fn list_filters_by_status_and_device() {
        let store = MemoryStore::new();
        store.insert(voucher("vch-d", online_plan(60))).await.unwrap();
        let mut other = voucher("vch-e", online_plan(60));
        other.device_id = DeviceId::from("gw-pool");
        store.insert(other).await.unwrap();

        let filter = VoucherFilter {
            status: Some(VoucherStatus::Unused),
            device_id: Some(DeviceId::from("gw-pool")),
        };
        let listed = store.list(&filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].username, "vch-e");
    }
}
