// ── Voucher Lifecycle Engine ──
//
// Pure coordination logic over the credential store, the device
// control adapter and the voucher store. Every multi-step transition
// is ordered so that a crash between steps leaves a retry-safe state:
// revocation happens before disconnection, status flips happen last,
// and each flip is a guarded compare-and-set.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aaa::{AcctRecord, CredentialStore, GroupSpec, NasRegistration, attrs};
use crate::config::EngineConfig;
use crate::device::{DeviceConn, DeviceControl};
use crate::error::CoreError;
use crate::ledger::SessionLedger;
use crate::model::{DeviceId, DeviceRecord, Plan, TimePolicy, Voucher, VoucherStatus};
use crate::store::{DeviceStore, VoucherFilter, VoucherStore};

/// Maximum regeneration attempts before a code collision is reported
/// as a conflict instead of retried.
const MAX_CODE_ATTEMPTS: usize = 8;

// ── Request/response types ───────────────────────────────────────────

/// How the issued credential is presented to the holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    /// One code, used as both username and password.
    VoucherCode,
    /// Independently generated username and password.
    UsernamePassword,
}

/// A batch issuance request from the external caller.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub device_id: DeviceId,
    pub plan: Plan,
    /// Sale price per unit, minor currency units.
    pub price: u64,
    pub quantity: u32,
    pub auth: AuthKind,
    /// Per-request charset override for code generation.
    pub charset: Option<String>,
    /// Group rate limit in device syntax (e.g. `5M/5M`).
    pub rate_limit: Option<String>,
    /// Group concurrent-login cap.
    pub shared_users: Option<u32>,
    /// Administrative path: create directly in `Active`.
    pub pre_activated: bool,
}

/// One unit of the batch that could not be issued.
#[derive(Debug)]
pub struct IssueFailure {
    /// Zero-based index within the requested batch.
    pub unit: u32,
    pub error: CoreError,
}

/// Result of a batch issuance. `vouchers.len()` may be smaller than the
/// requested quantity; the shortfall is itemized in `failures` so the
/// caller always sees the count mismatch.
#[derive(Debug, Default)]
pub struct IssueOutcome {
    pub vouchers: Vec<Voucher>,
    pub failures: Vec<IssueFailure>,
}

/// Aggregate usage for one voucher's username.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSummary {
    pub accumulated_seconds: u64,
    pub total_bytes: u64,
    pub active_sessions: usize,
}

// ── Engine ───────────────────────────────────────────────────────────

/// The lifecycle state machine.
///
/// Cheap to clone; all collaborators are shared. `S` serves as both the
/// voucher and the device registry.
#[derive(Debug)]
pub struct VoucherEngine<C, D, S> {
    credentials: Arc<C>,
    device_control: Arc<D>,
    store: Arc<S>,
    ledger: Arc<SessionLedger>,
    config: EngineConfig,
}

impl<C, D, S> Clone for VoucherEngine<C, D, S> {
    fn clone(&self) -> Self {
        Self {
            credentials: Arc::clone(&self.credentials),
            device_control: Arc::clone(&self.device_control),
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
            config: self.config.clone(),
        }
    }
}

fn generate_code(charset: &str, length: usize) -> String {
    let chars: Vec<char> = charset.chars().collect();
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| chars[rng.gen_range(0..chars.len())])
        .collect()
}

fn validate_plan(plan: &Plan) -> Result<(), CoreError> {
    match plan {
        Plan::TimeBased {
            policy: TimePolicy::WallClock { profile },
            ..
        } if profile.is_empty() => Err(CoreError::validation(
            "profile",
            "wall-clock plans require a device profile",
        )),
        Plan::TimeBased {
            policy: TimePolicy::OnlineOnly,
            duration_minutes: None,
        } => Err(CoreError::validation(
            "duration_minutes",
            "accumulated-time plans require a duration",
        )),
        Plan::DataBased { data_limit_bytes: 0 } => Err(CoreError::validation(
            "data_limit_bytes",
            "data plans require a nonzero byte limit",
        )),
        _ => Ok(()),
    }
}

impl<C, D, S> VoucherEngine<C, D, S>
where
    C: CredentialStore + Sync,
    D: DeviceControl + Sync,
    S: VoucherStore + DeviceStore + Sync,
{
    pub fn new(
        credentials: Arc<C>,
        device_control: Arc<D>,
        store: Arc<S>,
        ledger: Arc<SessionLedger>,
        config: EngineConfig,
    ) -> Self {
        Self {
            credentials,
            device_control,
            store,
            ledger,
            config,
        }
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    // ── Issuance ─────────────────────────────────────────────────────

    /// Issue a batch of vouchers.
    ///
    /// Validation failures reject the whole request. Per-unit failures
    /// (code collisions, store writes) are itemized in the outcome; the
    /// remaining units are still issued.
    pub async fn issue(&self, request: &IssueRequest) -> Result<IssueOutcome, CoreError> {
        validate_plan(&request.plan)?;
        if request.quantity == 0 {
            return Err(CoreError::validation("quantity", "must be at least 1"));
        }
        let charset = request.charset.as_deref().unwrap_or(&self.config.charset);
        if charset.is_empty() {
            return Err(CoreError::validation("charset", "must not be empty"));
        }

        let device = self.store.device(&request.device_id).await?;
        let group = request.plan.group_name(&device.id);
        self.credentials
            .upsert_group(
                &group,
                &GroupSpec {
                    rate_limit: request.rate_limit.clone(),
                    shared_users: request.shared_users,
                },
            )
            .await?;

        let mut outcome = IssueOutcome::default();
        for unit in 0..request.quantity {
            match self.issue_unit(request, charset, &group).await {
                Ok(voucher) => outcome.vouchers.push(voucher),
                Err(error) => {
                    warn!(device = %request.device_id, unit, %error, "voucher unit not issued");
                    outcome.failures.push(IssueFailure { unit, error });
                }
            }
        }
        info!(
            device = %request.device_id,
            issued = outcome.vouchers.len(),
            failed = outcome.failures.len(),
            "voucher batch issued"
        );
        Ok(outcome)
    }

    async fn issue_unit(
        &self,
        request: &IssueRequest,
        charset: &str,
        group: &str,
    ) -> Result<Voucher, CoreError> {
        let username = self.fresh_username(charset).await?;
        let password = match request.auth {
            AuthKind::VoucherCode => username.clone(),
            AuthKind::UsernamePassword => generate_code(charset, self.config.password_length),
        };

        self.credentials
            .create_principal(&username, &password, group)
            .await?;

        // Past this point a usable credential exists. Any later failure
        // must revoke it before the unit is reported failed, or a
        // principal no voucher row names would be left live and
        // unrevokable.
        match self.provision_voucher(request, &username, password).await {
            Ok(voucher) => Ok(voucher),
            Err(error) => {
                if let Err(revoke_error) = self.credentials.remove_principal(&username).await {
                    warn!(
                        username,
                        %revoke_error,
                        "orphan principal left behind after failed issuance"
                    );
                }
                Err(error)
            }
        }
    }

    async fn provision_voucher(
        &self,
        request: &IssueRequest,
        username: &str,
        password: String,
    ) -> Result<Voucher, CoreError> {
        let now = Utc::now();
        let mut expires_at = None;
        match &request.plan {
            Plan::DataBased { data_limit_bytes } => {
                self.credentials
                    .set_reply_attribute(
                        username,
                        attrs::TOTAL_LIMIT,
                        &data_limit_bytes.to_string(),
                        "=",
                    )
                    .await?;
            }
            Plan::TimeBased {
                policy: TimePolicy::WallClock { .. },
                duration_minutes: Some(minutes),
            } => {
                // The device profile's own scheduler enforces this in
                // real time, so it is pinned at issue, not activation.
                let at = now + Duration::minutes(i64::from(*minutes));
                self.credentials.set_expiration(username, at).await?;
                expires_at = Some(at);
            }
            Plan::TimeBased { .. } => {}
        }

        let voucher = Voucher {
            id: Uuid::new_v4(),
            username: username.to_owned(),
            password,
            plan: request.plan.clone(),
            price: request.price,
            status: if request.pre_activated {
                VoucherStatus::Active
            } else {
                VoucherStatus::Unused
            },
            device_id: request.device_id.clone(),
            created_at: now,
            activated_at: request.pre_activated.then_some(now),
            expires_at,
            sold_at: None,
        };
        self.store.insert(voucher.clone()).await?;
        debug!(username, device = %request.device_id, "voucher issued");
        Ok(voucher)
    }

    async fn fresh_username(&self, charset: &str) -> Result<String, CoreError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = generate_code(charset, self.config.username_length);
            let taken = self.credentials.principal_exists(&candidate).await?
                || self.store.by_username(&candidate).await?.is_some();
            if !taken {
                return Ok(candidate);
            }
        }
        Err(CoreError::Conflict {
            username: "<generation exhausted>".to_owned(),
        })
    }

    // ── Scheduler-invoked transitions ────────────────────────────────

    /// Flip an unused voucher to active once its username has any
    /// accounting history. Re-run-safe: the guarded transition makes a
    /// replay a no-op.
    pub async fn detect_activation(&self, voucher: &Voucher) -> Result<bool, CoreError> {
        if voucher.status != VoucherStatus::Unused {
            return Ok(false);
        }
        let history = self
            .credentials
            .session_history(&voucher.username, 1)
            .await?;
        if history.is_empty() {
            return Ok(false);
        }
        let flipped = self
            .store
            .transition(
                voucher.id,
                VoucherStatus::Unused,
                VoucherStatus::Active,
                Utc::now(),
            )
            .await?;
        if flipped {
            info!(username = voucher.username, device = %voucher.device_id, "voucher activated");
        }
        Ok(flipped)
    }

    /// Expire an active accumulated-time voucher whose usage is
    /// exhausted.
    ///
    /// Ordering is load-bearing: the principal is removed first (the
    /// binding revocation), the device disconnect is best-effort in the
    /// middle, and the status flip comes last. A crash mid-sequence can
    /// only leave a removed credential whose flip retries next tick —
    /// never an expired voucher with a live credential.
    pub async fn expire(&self, voucher: &Voucher) -> Result<bool, CoreError> {
        if voucher.status != VoucherStatus::Active {
            return Ok(false);
        }

        self.credentials.remove_principal(&voucher.username).await?;

        if let Err(error) = self.disconnect_sessions(voucher).await {
            warn!(
                username = voucher.username,
                device = %voucher.device_id,
                %error,
                "disconnect after revocation failed; device idle timeout will reap the session"
            );
        }

        let flipped = self
            .store
            .transition(
                voucher.id,
                VoucherStatus::Active,
                VoucherStatus::Expired,
                Utc::now(),
            )
            .await?;
        if flipped {
            info!(username = voucher.username, device = %voucher.device_id, "voucher expired");
        }
        Ok(flipped)
    }

    async fn disconnect_sessions(&self, voucher: &Voucher) -> Result<(), CoreError> {
        let device = self.store.device(&voucher.device_id).await?;
        let conn = DeviceConn::from_record(&device);
        let sessions = self
            .device_control
            .list_active_sessions(&conn, Some(&voucher.username))
            .await?;
        for session in &sessions {
            self.device_control
                .force_disconnect(&conn, &session.handle)
                .await?;
        }
        Ok(())
    }

    /// Whether an accumulated-time voucher's usage is exhausted.
    pub async fn is_exhausted(&self, voucher: &Voucher) -> Result<bool, CoreError> {
        let Some(minutes) = voucher.plan.duration_minutes() else {
            return Ok(false);
        };
        if !voucher.plan.is_online_only() {
            return Ok(false);
        }
        let seconds = self
            .credentials
            .total_accumulated_seconds(&voucher.username)
            .await?;
        Ok(seconds >= u64::from(minutes) * 60)
    }

    // ── Administrative transitions ───────────────────────────────────

    /// Mark a voucher as sold. Orthogonal to the lifecycle: allowed
    /// from any status, touches neither credential nor device.
    pub async fn sell(&self, id: Uuid) -> Result<Voucher, CoreError> {
        // The CAS needs the current status; retry the read on a race.
        for _ in 0..MAX_CODE_ATTEMPTS {
            let voucher = self.store.get(id).await?;
            if voucher.status == VoucherStatus::Sold {
                return Ok(voucher);
            }
            if self
                .store
                .transition(id, voucher.status, VoucherStatus::Sold, Utc::now())
                .await?
            {
                return self.store.get(id).await;
            }
        }
        Err(CoreError::Internal(format!(
            "voucher {id} status kept moving during sell"
        )))
    }

    /// Delete a voucher, revoking its credential first when one may
    /// still exist.
    pub async fn delete(&self, id: Uuid) -> Result<(), CoreError> {
        let voucher = self.store.get(id).await?;
        if matches!(
            voucher.status,
            VoucherStatus::Unused | VoucherStatus::Active
        ) {
            self.credentials.remove_principal(&voucher.username).await?;
        }
        self.store.delete(id).await?;
        info!(username = voucher.username, "voucher deleted");
        Ok(())
    }

    // ── Device onboarding ────────────────────────────────────────────

    /// Register a device: store its record, trust its AAA traffic, and
    /// (when a push target is configured) point its hotspot at the AAA
    /// server.
    pub async fn on_device_registered(&self, record: DeviceRecord) -> Result<(), CoreError> {
        use secrecy::ExposeSecret;

        self.credentials
            .register_nas(
                &record.address,
                record.radius_secret.expose_secret(),
                &record.name,
            )
            .await?;
        self.store.upsert_device(record.clone()).await?;

        if let Some(server) = &self.config.radius_server {
            let conn = DeviceConn::from_record(&record);
            self.device_control
                .push_access_policy(&conn, server, &record.radius_secret)
                .await?;
        }
        info!(device = %record.id, address = record.address, "device registered");
        Ok(())
    }

    /// Deregister a device. The access-policy revocation is best-effort
    /// (the device may already be unreachable); the NAS row and record
    /// are removed regardless.
    pub async fn on_device_deregistered(&self, id: &DeviceId) -> Result<(), CoreError> {
        let record = self.store.device(id).await?;
        if let Some(server) = &self.config.radius_server {
            let conn = DeviceConn::from_record(&record);
            if let Err(error) = self.device_control.revoke_access_policy(&conn, server).await {
                warn!(device = %id, %error, "access policy revocation failed");
            }
        }
        self.credentials.deregister_nas(&record.address).await?;
        self.store.remove_device(id).await?;
        info!(device = %id, "device deregistered");
        Ok(())
    }

    // ── Job bodies (driven by the scheduler) ─────────────────────────

    /// Pull accounting into the ledger: all open rows, plus rows closed
    /// within the trailing window.
    pub async fn sync_sessions(&self, window: chrono::Duration) -> Result<(), CoreError> {
        let open = self.credentials.open_accounting().await?;
        let closed = self
            .credentials
            .closed_accounting_since(Utc::now() - window)
            .await?;
        debug!(open = open.len(), closed = closed.len(), "session sync");
        self.ledger.apply_open(&open);
        self.ledger.apply_closed(&closed);
        Ok(())
    }

    /// Scan unused vouchers and activate those with auth history.
    /// Per-candidate errors are logged, not propagated.
    pub async fn detect_activations(&self) -> Result<usize, CoreError> {
        let candidates = self
            .store
            .list(&VoucherFilter {
                status: Some(VoucherStatus::Unused),
                device_id: None,
            })
            .await?;
        let mut activated = 0;
        for voucher in &candidates {
            match self.detect_activation(voucher).await {
                Ok(true) => activated += 1,
                Ok(false) => {}
                Err(error) => {
                    warn!(
                        job = "activation",
                        username = voucher.username,
                        device = %voucher.device_id,
                        %error,
                        "activation check failed"
                    );
                }
            }
        }
        Ok(activated)
    }

    /// Expire exhausted accumulated-time vouchers, then reconcile
    /// orphan device sessions whose principal is already gone.
    pub async fn sweep_expirations(&self) -> Result<usize, CoreError> {
        let candidates = self
            .store
            .list(&VoucherFilter {
                status: Some(VoucherStatus::Active),
                device_id: None,
            })
            .await?;
        let mut expired = 0;
        for voucher in &candidates {
            let due = match self.is_exhausted(voucher).await {
                Ok(due) => due,
                Err(error) => {
                    warn!(
                        job = "expiration",
                        username = voucher.username,
                        device = %voucher.device_id,
                        %error,
                        "usage read failed"
                    );
                    continue;
                }
            };
            if !due {
                continue;
            }
            match self.expire(voucher).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(error) => {
                    warn!(
                        job = "expiration",
                        username = voucher.username,
                        device = %voucher.device_id,
                        %error,
                        "expiration failed; retried next tick"
                    );
                }
            }
        }
        self.reconcile_orphan_sessions().await;
        Ok(expired)
    }

    /// Force-disconnect device sessions whose username no longer has a
    /// principal (revocation landed but the disconnect never did, e.g.
    /// across a restart). One unreachable device never blocks the next.
    async fn reconcile_orphan_sessions(&self) {
        let devices = match self.store.devices().await {
            Ok(devices) => devices,
            Err(error) => {
                warn!(job = "expiration", %error, "device list unavailable");
                return;
            }
        };
        for device in &devices {
            let conn = DeviceConn::from_record(device);
            let sessions = match self.device_control.list_active_sessions(&conn, None).await {
                Ok(sessions) => sessions,
                Err(error) => {
                    warn!(job = "expiration", device = %device.id, %error, "session list failed");
                    continue;
                }
            };
            for session in &sessions {
                if session.username.is_empty() {
                    continue;
                }
                let exists = match self.credentials.principal_exists(&session.username).await {
                    Ok(exists) => exists,
                    Err(error) => {
                        warn!(
                            job = "expiration",
                            username = session.username,
                            %error,
                            "principal lookup failed"
                        );
                        continue;
                    }
                };
                if exists {
                    continue;
                }
                info!(
                    job = "expiration",
                    username = session.username,
                    device = %device.id,
                    "disconnecting orphan session"
                );
                if let Err(error) = self
                    .device_control
                    .force_disconnect(&conn, &session.handle)
                    .await
                {
                    warn!(
                        job = "expiration",
                        username = session.username,
                        device = %device.id,
                        %error,
                        "orphan disconnect failed"
                    );
                }
            }
        }
    }

    // ── Monitoring reads ─────────────────────────────────────────────

    pub async fn vouchers(&self, filter: &VoucherFilter) -> Result<Vec<Voucher>, CoreError> {
        self.store.list(filter).await
    }

    pub async fn voucher(&self, id: Uuid) -> Result<Voucher, CoreError> {
        self.store.get(id).await
    }

    pub async fn usage(&self, username: &str) -> Result<UsageSummary, CoreError> {
        Ok(UsageSummary {
            accumulated_seconds: self.credentials.total_accumulated_seconds(username).await?,
            total_bytes: self.credentials.total_bytes(username).await?,
            active_sessions: self.credentials.active_session_count(username).await?,
        })
    }

    pub async fn session_history(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<AcctRecord>, CoreError> {
        self.credentials.session_history(username, limit).await
    }

    pub async fn nas_list(&self) -> Result<Vec<NasRegistration>, CoreError> {
        self.credentials.nas_list().await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn generated_codes_use_only_the_charset() {
        let code = generate_code("abc", 16);
        assert_eq!(code.len(), 16);
        assert!(code.chars().all(|c| "abc".contains(c)));
    }

    #[test]
    fn plan_validation_rejects_illegal_shapes() {
        assert!(
            validate_plan(&Plan::DataBased { data_limit_bytes: 0 }).is_err()
        );
        assert!(
            validate_plan(&Plan::TimeBased {
                policy: TimePolicy::OnlineOnly,
                duration_minutes: None,
            })
            .is_err()
        );
        assert!(
            validate_plan(&Plan::TimeBased {
                policy: TimePolicy::WallClock { profile: "".into() },
                duration_minutes: Some(60),
            })
            .is_err()
        );
        assert!(
            validate_plan(&Plan::TimeBased {
                policy: TimePolicy::WallClock {
                    profile: "3h".into(),
                },
                duration_minutes: None,
            })
            .is_ok(),
            "profile-only wall-clock plans rely on the profile's own limits"
        );
    }
}
