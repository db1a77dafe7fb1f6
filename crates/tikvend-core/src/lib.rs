//! Voucher lifecycle core: domain model, adapters, engine, scheduler.
//!
//! This crate owns the business logic of the voucher system and the
//! seams to its three sources of truth:
//!
//! - **[`CredentialStore`]** — typed operations over the AAA
//!   check/reply/group/NAS tables and the accounting log.
//!   [`MemoryCredentialStore`] is the reference implementation.
//!
//! - **[`DeviceControl`]** — typed router operations (session listing,
//!   forced disconnect, access-policy push) over the binary API, one
//!   fresh connection per command. [`RosDeviceControl`] implements it.
//!
//! - **[`VoucherEngine`]** — the lifecycle state machine: issuance,
//!   activation detection, usage-based expiration, administrative
//!   transitions, device onboarding. Multi-step transitions are
//!   ordered to be crash-retryable, with guarded compare-and-set
//!   status flips as the idempotence primitive.
//!
//! - **[`Reconciler`]** — three single-flight background jobs (session
//!   sync, activation detection, expiration sweep) with
//!   cancellation-aware loops.
//!
//! - **[`SessionLedger`]** — read-optimized projection of accounting
//!   records for statistics and expiration math.

pub mod aaa;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod model;
pub mod scheduler;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use aaa::{AcctRecord, CredentialStore, GroupSpec, MemoryCredentialStore, NasRegistration};
pub use config::EngineConfig;
pub use device::{ActiveDeviceSession, DeviceConn, DeviceControl, RosDeviceControl};
pub use engine::{AuthKind, IssueOutcome, IssueRequest, UsageSummary, VoucherEngine};
pub use error::CoreError;
pub use ledger::SessionLedger;
pub use model::{DeviceId, DeviceRecord, Plan, Session, TimePolicy, Voucher, VoucherStatus};
pub use scheduler::{Reconciler, SchedulerConfig, SchedulerHandle, TickOutcome};
pub use store::{DeviceStore, MemoryStore, VoucherFilter, VoucherStore};
