// ── Engine facade ──
//
// Owns the session machine and its collaborators. Samples signals on each
// tick, runs the validator, and feeds the machine; optionally runs a
// background ticker and a background sync worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::machine::{EndedSession, SessionMachine, SessionStatus, Transition};
use crate::model::{NetworkSignal, PermissionState, ValidationResult};
use crate::ports::{
    Clock, LedgerBalance, LocationProvider, NetworkProbe, PermissionProvider, RemoteSync,
    SystemClock,
};
use crate::store::{MemoryStore, SessionStore};
use crate::stream::StatusStream;
use crate::sync::{SyncReport, sync_pending};
use crate::validator::validate;

// ── Builder ──────────────────────────────────────────────────────────

/// Assembles an [`Engine`]. Network and location sources are required;
/// everything else has a default (in-memory store doubling as the ledger,
/// system clock, permission granted, no remote sync).
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn SessionStore>>,
    ledger: Option<Arc<dyn LedgerBalance>>,
    network: Option<Arc<dyn NetworkProbe>>,
    location: Option<Arc<dyn LocationProvider>>,
    permission: Option<Arc<dyn PermissionProvider>>,
    remote: Option<Arc<dyn RemoteSync>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            ledger: None,
            network: None,
            location: None,
            permission: None,
            remote: None,
            clock: None,
        }
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn ledger(mut self, ledger: Arc<dyn LedgerBalance>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    #[must_use]
    pub fn network(mut self, network: Arc<dyn NetworkProbe>) -> Self {
        self.network = Some(network);
        self
    }

    #[must_use]
    pub fn location(mut self, location: Arc<dyn LocationProvider>) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn permission(mut self, permission: Arc<dyn PermissionProvider>) -> Self {
        self.permission = Some(permission);
        self
    }

    #[must_use]
    pub fn remote(mut self, remote: Arc<dyn RemoteSync>) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Engine, CoreError> {
        let network = self.network.ok_or_else(|| CoreError::Config {
            message: "engine requires a network probe".into(),
        })?;
        let location = self.location.ok_or_else(|| CoreError::Config {
            message: "engine requires a location provider".into(),
        })?;

        let (store, ledger): (Arc<dyn SessionStore>, Arc<dyn LedgerBalance>) =
            match (self.store, self.ledger) {
                (Some(store), Some(ledger)) => (store, ledger),
                (None, ledger) => {
                    let memory = Arc::new(MemoryStore::new());
                    let ledger: Arc<dyn LedgerBalance> = match ledger {
                        Some(ledger) => ledger,
                        None => memory.clone(),
                    };
                    let store: Arc<dyn SessionStore> = memory;
                    (store, ledger)
                }
                (Some(_), None) => {
                    return Err(CoreError::Config {
                        message: "a custom store needs an explicit ledger balance source".into(),
                    });
                }
            };

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let permission: Arc<dyn PermissionProvider> = match self.permission {
            Some(permission) => permission,
            None => Arc::new(PermissionState::Granted),
        };

        let machine = SessionMachine::new(
            self.config.clone(),
            Arc::clone(&store),
            ledger,
            Arc::clone(&clock),
        );
        let status_rx = machine.subscribe();

        Ok(Engine {
            inner: Arc::new(EngineInner {
                config: self.config,
                machine: Mutex::new(machine),
                store,
                network,
                location,
                permission,
                remote: self.remote,
                clock,
                status_rx,
                sync_lock: Mutex::new(()),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }
}

// ── Engine ───────────────────────────────────────────────────────────

/// The main entry point for embedders.
///
/// Cheaply cloneable via `Arc<EngineInner>`. All machine input is
/// serialized through one lock, so ticks, disconnects, and recovery never
/// interleave.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    machine: Mutex<SessionMachine>,
    store: Arc<dyn SessionStore>,
    network: Arc<dyn NetworkProbe>,
    location: Arc<dyn LocationProvider>,
    permission: Arc<dyn PermissionProvider>,
    remote: Option<Arc<dyn RemoteSync>>,
    clock: Arc<dyn Clock>,
    status_rx: watch::Receiver<Arc<SessionStatus>>,
    sync_lock: Mutex<()>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    /// Whether a remote sync target was configured.
    pub fn has_remote(&self) -> bool {
        self.inner.remote.is_some()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Recover dangling sessions, then spawn the ticker and (when a remote
    /// is configured) the sync worker.
    pub async fn start(&self) {
        if let Err(e) = self.recover().await {
            warn!(error = %e, "recovery failed; will retry on first tick");
        }

        let timing = &self.inner.config.timing;
        let mut handles = self.inner.task_handles.lock().await;

        if !timing.tick_interval.is_zero() {
            let engine = self.clone();
            let cancel = self.inner.cancel.clone();
            handles.push(tokio::spawn(tick_task(engine, timing.tick_interval, cancel)));
        }

        if self.inner.remote.is_some() && !timing.sync_interval.is_zero() {
            let engine = self.clone();
            let cancel = self.inner.cancel.clone();
            handles.push(tokio::spawn(sync_task(engine, timing.sync_interval, cancel)));
        }

        info!(
            user = %self.inner.config.user_id,
            device = %self.inner.config.device_id,
            tasks = handles.len(),
            "engine started"
        );
    }

    /// Stop background tasks. An active session is left open in the store
    /// for recovery, exactly as if the process had been killed; call
    /// [`disconnect`](Self::disconnect) first to end it deliberately.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("engine stopped");
    }

    // ── Machine input ────────────────────────────────────────────────

    /// Close any session a previous process left active.
    pub async fn recover(&self) -> Result<Vec<EndedSession>, CoreError> {
        self.inner.machine.lock().await.recover().await
    }

    /// Sample signals and validate them. Never fails: an unavailable signal
    /// is a failed check.
    pub async fn sample(&self) -> ValidationResult {
        let inner = &self.inner;
        let timeout = inner.config.timing.sample_timeout;

        let ip = match tokio::time::timeout(timeout, inner.network.current_ip()).await {
            Ok(Ok(ip)) => ip,
            Ok(Err(e)) => {
                debug!(error = %e, "network signal unavailable");
                return ValidationResult::signal_unavailable();
            }
            Err(_) => {
                debug!(timeout = ?timeout, "network sample timed out");
                return ValidationResult::signal_unavailable();
            }
        };

        let location = match inner.permission.location_permission().await {
            PermissionState::Granted => {
                tokio::time::timeout(timeout, inner.location.current_location(timeout))
                    .await
                    .unwrap_or_else(|_| {
                        debug!(timeout = ?timeout, "location sample timed out");
                        None
                    })
            }
            other => {
                debug!(permission = %other, "location permission not granted");
                None
            }
        };

        let signal = NetworkSignal {
            ip_address: ip,
            sampled_at: inner.clock.now(),
        };
        validate(&signal, location.as_ref(), &inner.config.validation)
    }

    /// One validation tick: recover if that has not succeeded yet, sample,
    /// validate, and feed the machine.
    pub async fn tick(&self) -> Transition {
        let mut machine = self.inner.machine.lock().await;
        if !machine.is_recovered() {
            if let Err(e) = machine.recover().await {
                warn!(error = %e, "recovery failed; skipping tick");
                return Transition::Idle;
            }
        }

        let result = self.sample().await;
        machine.on_validation(result).await
    }

    /// Feed an already computed validation result.
    pub async fn apply(&self, result: ValidationResult) -> Transition {
        self.inner.machine.lock().await.on_validation(result).await
    }

    /// End the active session now (user disconnect or logout).
    pub async fn disconnect(&self) -> Option<EndedSession> {
        self.inner.machine.lock().await.disconnect().await
    }

    // ── Sync ─────────────────────────────────────────────────────────

    /// Run one sync pass now.
    pub async fn sync_now(&self) -> Result<SyncReport, CoreError> {
        let remote = self.inner.remote.as_ref().ok_or_else(|| CoreError::Config {
            message: "no remote sync configured".into(),
        })?;

        let report = {
            let _pass = self.inner.sync_lock.lock().await;
            sync_pending(self.inner.store.as_ref(), remote.as_ref()).await?
        };
        self.inner.machine.lock().await.refresh_pending().await;
        Ok(report)
    }

    // ── Status ───────────────────────────────────────────────────────

    /// Latest published status.
    pub fn status(&self) -> Arc<SessionStatus> {
        self.inner.status_rx.borrow().clone()
    }

    /// Subscribe to status changes.
    pub fn subscribe_status(&self) -> StatusStream {
        StatusStream::new(self.inner.status_rx.clone())
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Tick the engine at a fixed period. The first tick fires immediately.
async fn tick_task(engine: Engine, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let transition = engine.tick().await;
                debug!(?transition, "tick");
            }
        }
    }
}

/// Periodically push pending records to the backend.
async fn sync_task(engine: Engine, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = engine.sync_now().await {
                    warn!(error = %e, "periodic sync failed");
                }
            }
        }
    }
}
