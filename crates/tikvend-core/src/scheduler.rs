// ── Reconciliation Scheduler ──
//
// Three independently ticking jobs over the lifecycle engine: session
// sync (coarse), activation detection (fine), expiration sweep
// (medium). Each job carries its own single-flight guard; an
// overlapping tick is skipped, never queued. Cancellation lets an
// in-flight tick finish its current call and stops rescheduling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aaa::CredentialStore;
use crate::device::DeviceControl;
use crate::engine::VoucherEngine;
use crate::store::{DeviceStore, VoucherStore};

/// Tick intervals and the trailing window for closed-session pickup.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub session_sync_interval: Duration,
    pub activation_interval: Duration,
    pub expiration_interval: Duration,
    /// How far back the sync job looks for sessions that gained a stop
    /// time. Must comfortably exceed the sync interval.
    pub closed_session_window: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            session_sync_interval: Duration::from_secs(300),
            activation_interval: Duration::from_secs(30),
            expiration_interval: Duration::from_secs(60),
            closed_session_window: Duration::from_secs(900),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Ran,
    /// The previous tick of the same job was still running.
    Skipped,
}

#[derive(Debug, Default)]
struct JobGuard {
    running: AtomicBool,
    skipped: AtomicU64,
}

impl JobGuard {
    /// Claim the guard; `None` means the job is already running.
    fn claim(&self) -> Option<GuardRelease<'_>> {
        if self.running.swap(true, Ordering::Acquire) {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        Some(GuardRelease { guard: self })
    }
}

struct GuardRelease<'a> {
    guard: &'a JobGuard,
}

impl Drop for GuardRelease<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

/// The three reconciliation jobs plus their single-flight state.
#[derive(Debug)]
pub struct Reconciler<C, D, S> {
    engine: VoucherEngine<C, D, S>,
    config: SchedulerConfig,
    session_sync: JobGuard,
    activation: JobGuard,
    expiration: JobGuard,
}

/// Running scheduler: cancel to stop, then join.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop all jobs. In-flight ticks finish their current call.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(error) = task.await {
                warn!(%error, "scheduler task did not shut down cleanly");
            }
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<C, D, S> Reconciler<C, D, S>
where
    C: CredentialStore + Sync + Send + 'static,
    D: DeviceControl + Sync + Send + 'static,
    S: VoucherStore + DeviceStore + Sync + Send + 'static,
{
    pub fn new(engine: VoucherEngine<C, D, S>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            config,
            session_sync: JobGuard::default(),
            activation: JobGuard::default(),
            expiration: JobGuard::default(),
        }
    }

    /// Skips recorded per job since start: `(sync, activation, expiration)`.
    pub fn skipped_ticks(&self) -> (u64, u64, u64) {
        (
            self.session_sync.skipped.load(Ordering::Relaxed),
            self.activation.skipped.load(Ordering::Relaxed),
            self.expiration.skipped.load(Ordering::Relaxed),
        )
    }

    /// One session-sync tick: pull open accounting rows into the
    /// ledger and close rows stopped within the trailing window.
    pub async fn run_session_sync_once(&self) -> TickOutcome {
        let Some(_release) = self.session_sync.claim() else {
            debug!(job = "session_sync", "tick skipped, previous still running");
            return TickOutcome::Skipped;
        };
        let window = chrono::Duration::seconds(
            i64::try_from(self.config.closed_session_window.as_secs()).unwrap_or(i64::MAX),
        );
        if let Err(error) = self.engine.sync_sessions(window).await {
            warn!(job = "session_sync", %error, "tick failed");
        }
        TickOutcome::Ran
    }

    /// One activation-detection tick over all unused vouchers.
    pub async fn run_activation_once(&self) -> TickOutcome {
        let Some(_release) = self.activation.claim() else {
            debug!(job = "activation", "tick skipped, previous still running");
            return TickOutcome::Skipped;
        };
        match self.engine.detect_activations().await {
            Ok(activated) if activated > 0 => {
                debug!(job = "activation", activated, "tick complete");
            }
            Ok(_) => {}
            Err(error) => warn!(job = "activation", %error, "tick failed"),
        }
        TickOutcome::Ran
    }

    /// One expiration-sweep tick over all active vouchers, including
    /// the orphan-session reconciliation pass.
    pub async fn run_expiration_once(&self) -> TickOutcome {
        let Some(_release) = self.expiration.claim() else {
            debug!(job = "expiration", "tick skipped, previous still running");
            return TickOutcome::Skipped;
        };
        match self.engine.sweep_expirations().await {
            Ok(expired) if expired > 0 => {
                debug!(job = "expiration", expired, "tick complete");
            }
            Ok(_) => {}
            Err(error) => warn!(job = "expiration", %error, "tick failed"),
        }
        TickOutcome::Ran
    }

    /// Start the three job loops. Jobs tick until the handle is shut
    /// down; cancellation between ticks, never mid-call.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let tasks = vec![
            spawn_loop(
                Arc::clone(&self),
                self.config.session_sync_interval,
                cancel.clone(),
                |r| async move {
                    r.run_session_sync_once().await;
                },
            ),
            spawn_loop(
                Arc::clone(&self),
                self.config.activation_interval,
                cancel.clone(),
                |r| async move {
                    r.run_activation_once().await;
                },
            ),
            spawn_loop(
                Arc::clone(&self),
                self.config.expiration_interval,
                cancel.clone(),
                |r| async move {
                    r.run_expiration_once().await;
                },
            ),
        ];
        SchedulerHandle { cancel, tasks }
    }
}

fn spawn_loop<C, D, S, F, Fut>(
    reconciler: Arc<Reconciler<C, D, S>>,
    period: Duration,
    cancel: CancellationToken,
    tick: F,
) -> JoinHandle<()>
where
    C: CredentialStore + Sync + Send + 'static,
    D: DeviceControl + Sync + Send + 'static,
    S: VoucherStore + DeviceStore + Sync + Send + 'static,
    F: Fn(Arc<Reconciler<C, D, S>>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Consume the immediate first tick so jobs start one period in.
        interval.tick().await;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => tick(Arc::clone(&reconciler)).await,
            }
        }
    })
}
