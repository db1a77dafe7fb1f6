// ── Credential Store Adapter ──
//
// Typed operations over the AAA check/reply/group/NAS tables and the
// append-only accounting log. No business logic lives here: the
// lifecycle engine decides *what* to write, this layer only knows
// *where*. `MemoryCredentialStore` is the reference implementation;
// SQL-backed stores implement the same trait out of tree.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::CoreError;
use crate::model::DeviceId;

/// Attribute names the engine writes. Fixed by the AAA dialect.
pub mod attrs {
    pub const CLEARTEXT_PASSWORD: &str = "Cleartext-Password";
    pub const EXPIRATION: &str = "Expiration";
    pub const TOTAL_LIMIT: &str = "Mikrotik-Total-Limit";
    pub const RATE_LIMIT: &str = "Mikrotik-Rate-Limit";
    pub const SIMULTANEOUS_USE: &str = "Simultaneous-Use";
}

/// Serialize an absolute expiry the way the AAA engine parses it.
///
/// The format is fixed and locale-independent (English month
/// abbreviation), e.g. `23 Aug 2026 17:45:00`.
pub fn format_expiration(at: DateTime<Utc>) -> String {
    at.format("%d %b %Y %H:%M:%S").to_string()
}

// ── Row types ────────────────────────────────────────────────────────

/// One check or reply attribute row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRow {
    pub name: String,
    pub op: String,
    pub value: String,
}

/// Group-level attribute bundle for [`CredentialStore::upsert_group`].
#[derive(Debug, Clone, Default)]
pub struct GroupSpec {
    /// Reply attribute, device rate-limit syntax (e.g. `5M/5M`).
    pub rate_limit: Option<String>,
    /// Check attribute: maximum concurrent logins per principal.
    pub shared_users: Option<u32>,
}

/// One NAS (device) registration row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NasRegistration {
    pub address: String,
    pub secret: String,
    pub label: String,
}

/// One accounting log record. Authoritative on the AAA side;
/// the session ledger projects these.
#[derive(Debug, Clone)]
pub struct AcctRecord {
    pub unique_id: String,
    pub username: String,
    pub device_id: DeviceId,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub session_seconds: u64,
}

// ── Contract ─────────────────────────────────────────────────────────

/// Typed operations over the AAA tables.
///
/// Write operations are idempotent wherever the contract says so;
/// aggregation reads are authoritative at call time — no caching.
#[trait_variant::make(CredentialStore: Send)]
pub trait LocalCredentialStore {
    /// Insert the check row and group membership for a new principal.
    ///
    /// Fails with [`CoreError::Conflict`] if the username already has a
    /// check row. The caller guarantees global uniqueness of generated
    /// usernames; this is the backstop, not the generator.
    async fn create_principal(
        &self,
        username: &str,
        password: &str,
        group: &str,
    ) -> Result<(), CoreError>;

    /// Delete all check/reply/membership rows for a username.
    /// Removing a non-existent principal succeeds silently.
    async fn remove_principal(&self, username: &str) -> Result<(), CoreError>;

    /// Whether a check row exists for this username.
    async fn principal_exists(&self, username: &str) -> Result<bool, CoreError>;

    /// Upsert the absolute-expiry check attribute.
    async fn set_expiration(&self, username: &str, at: DateTime<Utc>) -> Result<(), CoreError>;

    /// Upsert a single reply attribute keyed by `(username, name)`.
    async fn set_reply_attribute(
        &self,
        username: &str,
        name: &str,
        value: &str,
        op: &str,
    ) -> Result<(), CoreError>;

    /// Create or overwrite group-level attributes.
    ///
    /// Never leaves partial state silently: both attribute writes are
    /// attempted even if the first fails, and all failures are
    /// reported.
    async fn upsert_group(&self, group: &str, spec: &GroupSpec) -> Result<(), CoreError>;

    /// Idempotent NAS upsert.
    async fn register_nas(
        &self,
        address: &str,
        secret: &str,
        label: &str,
    ) -> Result<(), CoreError>;

    /// Idempotent NAS delete.
    async fn deregister_nas(&self, address: &str) -> Result<(), CoreError>;

    async fn nas_list(&self) -> Result<Vec<NasRegistration>, CoreError>;

    // ── Aggregation reads over the accounting log ────────────────────

    /// Sum of session seconds across all of a username's records.
    async fn total_accumulated_seconds(&self, username: &str) -> Result<u64, CoreError>;

    /// Sum of in+out bytes across all of a username's records.
    async fn total_bytes(&self, username: &str) -> Result<u64, CoreError>;

    /// Number of records without a stop time.
    async fn active_session_count(&self, username: &str) -> Result<usize, CoreError>;

    /// Most recent records for a username, newest first.
    async fn session_history(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<AcctRecord>, CoreError>;

    /// All records without a stop time, across all usernames.
    async fn open_accounting(&self) -> Result<Vec<AcctRecord>, CoreError>;

    /// Records whose stop time falls at or after `since`.
    async fn closed_accounting_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AcctRecord>, CoreError>;
}

// ── In-memory reference implementation ───────────────────────────────

/// DashMap-backed credential store.
///
/// Thread-safe; every upsert is keyed by its natural unique key
/// (`username`, `(username, name)`, NAS address), so retried writes are
/// idempotent by construction.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    check: DashMap<String, Vec<AttributeRow>>,
    reply: DashMap<String, Vec<AttributeRow>>,
    group_check: DashMap<String, Vec<AttributeRow>>,
    group_reply: DashMap<String, Vec<AttributeRow>>,
    membership: DashMap<String, String>,
    nas: DashMap<String, NasRegistration>,
    accounting: DashMap<String, AcctRecord>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an accounting record, as the AAA server would.
    ///
    /// Test/simulation entry point; production accounting rows arrive
    /// through the AAA engine, not through this adapter.
    pub fn push_accounting(&self, record: AcctRecord) {
        self.accounting.insert(record.unique_id.clone(), record);
    }

    /// Close an open accounting record in place.
    pub fn stop_accounting(&self, unique_id: &str, stopped_at: DateTime<Utc>) {
        if let Some(mut rec) = self.accounting.get_mut(unique_id) {
            rec.stopped_at = Some(stopped_at);
        }
    }

    /// Number of principals with a check row, for assertions.
    pub fn principal_count(&self) -> usize {
        self.check.len()
    }

    /// Group-level check attributes, for assertions.
    pub fn group_check_rows(&self, group: &str) -> Vec<AttributeRow> {
        self.group_check
            .get(group)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    /// Group-level reply attributes, for assertions.
    pub fn group_reply_rows(&self, group: &str) -> Vec<AttributeRow> {
        self.group_reply
            .get(group)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    /// Check attributes of one principal, for assertions.
    pub fn check_rows(&self, username: &str) -> Vec<AttributeRow> {
        self.check
            .get(username)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    /// Reply attributes of one principal, for assertions.
    pub fn reply_rows(&self, username: &str) -> Vec<AttributeRow> {
        self.reply
            .get(username)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    fn upsert_row(rows: &mut Vec<AttributeRow>, name: &str, op: &str, value: &str) {
        match rows.iter_mut().find(|row| row.name == name) {
            Some(row) => {
                row.op = op.to_owned();
                row.value = value.to_owned();
            }
            None => rows.push(AttributeRow {
                name: name.to_owned(),
                op: op.to_owned(),
                value: value.to_owned(),
            }),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    async fn create_principal(
        &self,
        username: &str,
        password: &str,
        group: &str,
    ) -> Result<(), CoreError> {
        if self.check.contains_key(username) {
            return Err(CoreError::Conflict {
                username: username.to_owned(),
            });
        }
        self.check.insert(
            username.to_owned(),
            vec![AttributeRow {
                name: attrs::CLEARTEXT_PASSWORD.to_owned(),
                op: ":=".to_owned(),
                value: password.to_owned(),
            }],
        );
        self.membership
            .insert(username.to_owned(), group.to_owned());
        Ok(())
    }

    async fn remove_principal(&self, username: &str) -> Result<(), CoreError> {
        self.check.remove(username);
        self.reply.remove(username);
        self.membership.remove(username);
        Ok(())
    }

    async fn principal_exists(&self, username: &str) -> Result<bool, CoreError> {
        Ok(self.check.contains_key(username))
    }

    async fn set_expiration(&self, username: &str, at: DateTime<Utc>) -> Result<(), CoreError> {
        let mut rows = self.check.entry(username.to_owned()).or_default();
        Self::upsert_row(&mut rows, attrs::EXPIRATION, ":=", &format_expiration(at));
        Ok(())
    }

    async fn set_reply_attribute(
        &self,
        username: &str,
        name: &str,
        value: &str,
        op: &str,
    ) -> Result<(), CoreError> {
        let mut rows = self.reply.entry(username.to_owned()).or_default();
        Self::upsert_row(&mut rows, name, op, value);
        Ok(())
    }

    async fn upsert_group(&self, group: &str, spec: &GroupSpec) -> Result<(), CoreError> {
        if let Some(rate_limit) = &spec.rate_limit {
            let mut rows = self.group_reply.entry(group.to_owned()).or_default();
            Self::upsert_row(&mut rows, attrs::RATE_LIMIT, "=", rate_limit);
        }
        if let Some(shared_users) = spec.shared_users {
            let mut rows = self.group_check.entry(group.to_owned()).or_default();
            Self::upsert_row(
                &mut rows,
                attrs::SIMULTANEOUS_USE,
                ":=",
                &shared_users.to_string(),
            );
        }
        Ok(())
    }

    async fn register_nas(
        &self,
        address: &str,
        secret: &str,
        label: &str,
    ) -> Result<(), CoreError> {
        self.nas.insert(
            address.to_owned(),
            NasRegistration {
                address: address.to_owned(),
                secret: secret.to_owned(),
                label: label.to_owned(),
            },
        );
        Ok(())
    }

    async fn deregister_nas(&self, address: &str) -> Result<(), CoreError> {
        self.nas.remove(address);
        Ok(())
    }

    async fn nas_list(&self) -> Result<Vec<NasRegistration>, CoreError> {
        Ok(self.nas.iter().map(|r| r.value().clone()).collect())
    }

    async fn total_accumulated_seconds(&self, username: &str) -> Result<u64, CoreError> {
        Ok(self
            .accounting
            .iter()
            .filter(|r| r.username == username)
            .map(|r| r.session_seconds)
            .sum())
    }

    async fn total_bytes(&self, username: &str) -> Result<u64, CoreError> {
        Ok(self
            .accounting
            .iter()
            .filter(|r| r.username == username)
            .map(|r| r.bytes_in.saturating_add(r.bytes_out))
            .sum())
    }

    async fn active_session_count(&self, username: &str) -> Result<usize, CoreError> {
        Ok(self
            .accounting
            .iter()
            .filter(|r| r.username == username && r.stopped_at.is_none())
            .count())
    }

    async fn session_history(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<AcctRecord>, CoreError> {
        let mut records: Vec<AcctRecord> = self
            .accounting
            .iter()
            .filter(|r| r.username == username)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn open_accounting(&self) -> Result<Vec<AcctRecord>, CoreError> {
        Ok(self
            .accounting
            .iter()
            .filter(|r| r.stopped_at.is_none())
            .map(|r| r.value().clone())
            .collect())
    }

    async fn closed_accounting_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AcctRecord>, CoreError> {
        Ok(self
            .accounting
            .iter()
            .filter(|r| r.stopped_at.is_some_and(|t| t >= since))
            .map(|r| r.value().clone())
            .collect())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::{
        AcctRecord, CredentialStore, GroupSpec, MemoryCredentialStore, attrs, format_expiration,
    };
    use crate::error::CoreError;
    use crate::model::DeviceId;

    fn acct(unique_id: &str, username: &str, seconds: u64, open: bool) -> AcctRecord {
        let started_at = Utc::now();
        AcctRecord {
            unique_id: unique_id.to_owned(),
            username: username.to_owned(),
            device_id: DeviceId::from("gw-lobby"),
            started_at,
            stopped_at: (!open).then(Utc::now),
            bytes_in: 100,
            bytes_out: 50,
            session_seconds: seconds,
        }
    }

    #[tokio::test]
    async fn create_principal_conflicts_on_duplicate() {
        let store = MemoryCredentialStore::new();
        store.create_principal("u1", "pw", "g").await.unwrap();

        let err = store.create_principal("u1", "pw", "g").await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict { username } if username == "u1"));
    }

    #[tokio::test]
    async fn remove_principal_is_idempotent() {
        let store = MemoryCredentialStore::new();
        store.create_principal("u1", "pw", "g").await.unwrap();

        store.remove_principal("u1").await.unwrap();
        // Second removal of the same username must succeed silently.
        store.remove_principal("u1").await.unwrap();
        assert!(!store.principal_exists("u1").await.unwrap());
    }

    #[tokio::test]
    async fn set_expiration_upserts_single_row() {
        let store = MemoryCredentialStore::new();
        store.create_principal("u1", "pw", "g").await.unwrap();

        let first = Utc.with_ymd_and_hms(2026, 8, 23, 12, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 8, 24, 12, 0, 0).unwrap();
        store.set_expiration("u1", first).await.unwrap();
        store.set_expiration("u1", second).await.unwrap();

        let rows = store.check_rows("u1");
        let expirations: Vec<_> = rows
            .iter()
            .filter(|r| r.name == attrs::EXPIRATION)
            .collect();
        assert_eq!(expirations.len(), 1, "overwrite, never duplicate");
        assert_eq!(expirations[0].value, "24 Aug 2026 12:00:00");
    }

    #[tokio::test]
    async fn upsert_group_overwrites_attributes() {
        let store = MemoryCredentialStore::new();
        let spec = GroupSpec {
            rate_limit: Some("5M/5M".into()),
            shared_users: Some(1),
        };
        store.upsert_group("3h@gw", &spec).await.unwrap();

        let updated = GroupSpec {
            rate_limit: Some("10M/10M".into()),
            shared_users: Some(2),
        };
        store.upsert_group("3h@gw", &updated).await.unwrap();

        let reply = store.group_reply_rows("3h@gw");
        assert_eq!(reply.len(), 1);
        assert_eq!(reply[0].value, "10M/10M");
        let check = store.group_check_rows("3h@gw");
        assert_eq!(check.len(), 1);
        assert_eq!(check[0].value, "2");
    }

    #[tokio::test]
    async fn aggregation_reads_sum_the_log() {
        let store = MemoryCredentialStore::new();
        store.push_accounting(acct("s1", "u1", 1200, false));
        store.push_accounting(acct("s2", "u1", 1800, false));
        store.push_accounting(acct("s3", "u1", 600, true));
        store.push_accounting(acct("s4", "other", 9999, true));

        assert_eq!(store.total_accumulated_seconds("u1").await.unwrap(), 3600);
        assert_eq!(store.total_bytes("u1").await.unwrap(), 450);
        assert_eq!(store.active_session_count("u1").await.unwrap(), 1);
        assert_eq!(store.session_history("u1", 2).await.unwrap().len(), 2);
        assert_eq!(store.open_accounting().await.unwrap().len(), 2);
    }

    #[test]
    fn expiration_format_is_locale_independent() {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 8, 30, 0).unwrap();
        assert_eq!(format_expiration(at), "05 Jan 2026 08:30:00");
    }
}
