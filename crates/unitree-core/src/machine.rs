// ── Session state machine ──
//
// Idle -> Active -> Ending -> Ended, plus recovery of sessions left open by
// a previous process. Every transition reaches the local store before it is
// reported, and accrual runs inside the end transition.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::accrual::{AccrualEngine, AccrualOutcome, estimate_points};
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::model::{EndReason, SessionId, ValidationResult, WifiSession};
use crate::ports::{Clock, LedgerBalance};
use crate::store::SessionStore;

// ── Public status types ──────────────────────────────────────────────

/// Lifecycle phase observable by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Active,
    /// Transient: the end write and accrual are in flight.
    Ending,
    /// The last session has been closed and persisted.
    Ended,
}

/// Summary of a closed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndedSession {
    pub session_id: SessionId,
    pub end_reason: Option<EndReason>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub points_earned: Option<u32>,
}

impl EndedSession {
    fn from_session(session: &WifiSession) -> Self {
        let end_time = session.end_time.unwrap_or(session.start_time);
        Self {
            session_id: session.id,
            end_reason: session.end_reason,
            start_time: session.start_time,
            end_time,
            duration_seconds: session
                .duration_seconds
                .unwrap_or_else(|| (end_time - session.start_time).num_seconds()),
            points_earned: session.points_earned,
        }
    }
}

/// Read-only snapshot for the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub session_id: Option<SessionId>,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: i64,
    /// Points the running session would earn now, ignoring today's balance.
    pub estimated_points: u32,
    pub last_validation: Option<ValidationResult>,
    pub last_ended: Option<EndedSession>,
    /// Ended sessions plus transactions not yet uploaded.
    pub pending_sync: usize,
    pub updated_at: DateTime<Utc>,
}

impl SessionStatus {
    fn idle(now: DateTime<Utc>) -> Self {
        Self {
            phase: SessionPhase::Idle,
            session_id: None,
            started_at: None,
            elapsed_seconds: 0,
            estimated_points: 0,
            last_validation: None,
            last_ended: None,
            pending_sync: 0,
            updated_at: now,
        }
    }
}

/// What one input did to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Nothing started: the check failed, or opening a session failed and
    /// will be retried on the next tick.
    Idle,
    Started(SessionId),
    Continued(SessionId),
    Ended(EndedSession),
    /// Another holder closed our session; we dropped it without accruing.
    SteppedDown { winner: Option<SessionId> },
    /// Valid, but another holder's session is live for this device.
    Yielding(SessionId),
}

// ── Internal state ───────────────────────────────────────────────────

struct ActiveSession {
    session: WifiSession,
    last_seen_valid: DateTime<Utc>,
    next_heartbeat_at: DateTime<Utc>,
    heartbeat_failures: u32,
}

enum State {
    Idle,
    Active(Box<ActiveSession>),
    Ended,
}

enum HeartbeatCheck {
    Held,
    ClosedElsewhere { winner: Option<SessionId> },
    Outranked { winner: SessionId },
}

fn span(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

// ── SessionMachine ───────────────────────────────────────────────────

/// The single writer of session records for one (user, device).
pub struct SessionMachine {
    config: EngineConfig,
    store: Arc<dyn SessionStore>,
    accrual: AccrualEngine,
    clock: Arc<dyn Clock>,
    state: State,
    yield_to: Option<SessionId>,
    recovered: bool,
    last_validation: Option<ValidationResult>,
    last_ended: Option<EndedSession>,
    pending_sync: usize,
    status: watch::Sender<Arc<SessionStatus>>,
}

impl SessionMachine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn SessionStore>,
        ledger: Arc<dyn LedgerBalance>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let accrual = AccrualEngine::new(config.accrual.clone(), Arc::clone(&store), ledger);
        let (status, _) = watch::channel(Arc::new(SessionStatus::idle(clock.now())));
        Self {
            config,
            store,
            accrual,
            clock,
            state: State::Idle,
            yield_to: None,
            recovered: false,
            last_validation: None,
            last_ended: None,
            pending_sync: 0,
            status,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        match self.state {
            State::Idle => SessionPhase::Idle,
            State::Active(_) => SessionPhase::Active,
            State::Ended => SessionPhase::Ended,
        }
    }

    pub fn active_session(&self) -> Option<&WifiSession> {
        match &self.state {
            State::Active(active) => Some(&active.session),
            _ => None,
        }
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    pub fn pending_sync(&self) -> usize {
        self.pending_sync
    }

    pub fn status(&self) -> Arc<SessionStatus> {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionStatus>> {
        self.status.subscribe()
    }

    fn stale_after(&self) -> chrono::Duration {
        span(self.config.timing.stale_after)
    }

    // ── Recovery ─────────────────────────────────────────────────────

    /// Close every session this (user, device) left active in the store,
    /// using each one's last heartbeat as `end_time`, and accrue it.
    ///
    /// Safe to repeat: a crash halfway leaves records that the next call
    /// closes again, and accrual is idempotent per session.
    pub async fn recover(&mut self) -> Result<Vec<EndedSession>, CoreError> {
        let dangling = self
            .store
            .load_active(&self.config.user_id, &self.config.device_id)
            .await?;
        let own = self.active_session().map(|s| s.id);

        let mut ended = Vec::new();
        for session in dangling.into_iter().filter(|s| Some(s.id) != own) {
            info!(
                session_id = %session.id,
                last_heartbeat = %session.last_heartbeat_at,
                "recovering interrupted session"
            );
            if let Some(summary) = self.close_foreign(session, EndReason::Recovered).await? {
                ended.push(summary);
            }
        }

        self.recovered = true;
        if let Some(last) = ended.last() {
            self.last_ended = Some(last.clone());
        }
        self.refresh_pending().await;
        self.publish(self.clock.now());
        Ok(ended)
    }

    /// Close a session owned by some other holder (or a dead process) at
    /// its last heartbeat. `None` when its owner closed it first.
    async fn close_foreign(
        &self,
        session: WifiSession,
        reason: EndReason,
    ) -> Result<Option<EndedSession>, CoreError> {
        // A transaction left by an end write that never landed carries the
        // holder's end time; close there so duration and points agree.
        let end_time = match self.store.transaction_for_session(session.id).await? {
            Some(tx) if tx.created_at >= session.start_time => tx.created_at,
            _ => session.last_heartbeat_at,
        };
        let mut closed = session.close(end_time, reason);
        let outcome = self.accrual.accrue(&closed).await?;
        closed.points_earned = outcome.points_earned();

        match self.store.save_session(&closed).await {
            Ok(()) => {
                let summary = EndedSession::from_session(&closed);
                info!(
                    session_id = %closed.id,
                    reason = %reason,
                    duration_s = summary.duration_seconds,
                    points = ?summary.points_earned,
                    "closed dangling session"
                );
                Ok(Some(summary))
            }
            Err(CoreError::SessionImmutable { id }) => {
                debug!(session_id = %id, "session already closed by its holder");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // ── Validation input ─────────────────────────────────────────────

    /// Feed one tick's validation result. Never fails: store errors are
    /// logged and healed on a later tick.
    pub async fn on_validation(&mut self, result: ValidationResult) -> Transition {
        let now = self.clock.now();
        debug!(
            ip_valid = result.ip_valid,
            location = %result.location,
            distance_m = ?result.distance_meters,
            campus = ?result.campus_name,
            "validation tick"
        );
        self.last_validation = Some(result.clone());

        let transition = if matches!(self.state, State::Active(_)) {
            self.on_active(result, now).await
        } else {
            self.on_idle(result, now).await
        };
        self.publish(self.clock.now());
        transition
    }

    async fn on_idle(&mut self, result: ValidationResult, now: DateTime<Utc>) -> Transition {
        self.state = State::Idle;
        if !result.is_valid() {
            return Transition::Idle;
        }

        if let Some(winner) = self.yield_to {
            match self.store.get_session(winner).await {
                Ok(Some(s)) if s.is_active && now - s.last_heartbeat_at < self.stale_after() => {
                    debug!(winner = %winner, "another holder is live; not starting");
                    return Transition::Yielding(winner);
                }
                Ok(_) => self.yield_to = None,
                Err(e) => {
                    warn!(error = %e, "could not check competing holder; staying idle");
                    return Transition::Idle;
                }
            }
        }

        match self.start(result, now).await {
            Ok(id) => Transition::Started(id),
            Err(e) => {
                warn!(error = %e, "could not open session; retrying next tick");
                Transition::Idle
            }
        }
    }

    async fn start(
        &mut self,
        result: ValidationResult,
        now: DateTime<Utc>,
    ) -> Result<SessionId, CoreError> {
        let stale = self.stale_after();
        let others = self
            .store
            .load_active(&self.config.user_id, &self.config.device_id)
            .await?;
        for other in others {
            let reason = if now - other.last_heartbeat_at < stale {
                EndReason::Superseded
            } else {
                EndReason::Recovered
            };
            if let Some(ended) = self.close_foreign(other, reason).await? {
                self.last_ended = Some(ended);
            }
        }

        let session = WifiSession::start(
            self.config.user_id.clone(),
            self.config.device_id.clone(),
            now,
            result,
        );
        self.store.save_session(&session).await?;
        info!(
            session_id = %session.id,
            ip = %session.ip_address,
            campus = ?session.last_validation.campus_name,
            "session started"
        );

        let id = session.id;
        self.state = State::Active(Box::new(ActiveSession {
            session,
            last_seen_valid: now,
            next_heartbeat_at: now + span(self.config.timing.heartbeat_interval),
            heartbeat_failures: 0,
        }));
        Ok(id)
    }

    async fn on_active(&mut self, result: ValidationResult, now: DateTime<Utc>) -> Transition {
        let State::Active(mut active) = std::mem::replace(&mut self.state, State::Idle) else {
            return Transition::Idle;
        };

        if now - active.last_seen_valid >= self.stale_after() {
            let end_time = active.last_seen_valid;
            warn!(
                session_id = %active.session.id,
                last_seen_valid = %end_time,
                "no valid tick within stale window"
            );
            return Transition::Ended(self.end(active, EndReason::TickTimeout, end_time).await);
        }

        if !result.is_valid() {
            let end_time = active.last_seen_valid;
            info!(
                session_id = %active.session.id,
                ip_valid = result.ip_valid,
                location = %result.location,
                "validation failed; ending session"
            );
            active.session.last_validation = result;
            return Transition::Ended(self.end(active, EndReason::ValidationFailed, end_time).await);
        }

        active.last_seen_valid = now;
        active.session.last_validation = result;

        if now >= active.next_heartbeat_at {
            match self.heartbeat(&mut active, now).await {
                HeartbeatCheck::Held => {}
                HeartbeatCheck::ClosedElsewhere { winner } => {
                    warn!(
                        session_id = %active.session.id,
                        winner = ?winner,
                        "session closed by another holder; standing down"
                    );
                    self.yield_to = winner;
                    return Transition::SteppedDown { winner };
                }
                HeartbeatCheck::Outranked { winner } => {
                    warn!(
                        session_id = %active.session.id,
                        winner = %winner,
                        "newer holder active for this device; ending ours"
                    );
                    self.yield_to = Some(winner);
                    let end_time = active.last_seen_valid;
                    return Transition::Ended(self.end(active, EndReason::Superseded, end_time).await);
                }
            }
        }

        let id = active.session.id;
        self.state = State::Active(active);
        Transition::Continued(id)
    }

    /// Check ownership, then persist a heartbeat. Write failures push the
    /// next attempt out by the retry backoff instead of blocking the tick.
    async fn heartbeat(&self, active: &mut ActiveSession, now: DateTime<Utc>) -> HeartbeatCheck {
        let id = active.session.id;

        match self
            .store
            .load_active(&self.config.user_id, &self.config.device_id)
            .await
        {
            Ok(holders) => {
                if !holders.iter().any(|s| s.id == id) {
                    return HeartbeatCheck::ClosedElsewhere {
                        winner: holders.first().map(|s| s.id),
                    };
                }
                // Our own stored heartbeat lags this tick; rank on the tick itself.
                let ours = (active.last_seen_valid, id);
                if let Some(rival) = holders
                    .iter()
                    .find(|s| s.id != id && (s.last_heartbeat_at, s.id) > ours)
                {
                    return HeartbeatCheck::Outranked { winner: rival.id };
                }
                for other in holders.into_iter().filter(|s| s.id != id) {
                    if let Err(e) = self.close_foreign(other, EndReason::Superseded).await {
                        warn!(error = %e, "could not close outranked holder");
                    }
                }
            }
            Err(e) => {
                self.heartbeat_failed(active, now, &e);
                return HeartbeatCheck::Held;
            }
        }

        match self
            .store
            .record_heartbeat(id, now, &active.session.last_validation)
            .await
        {
            Ok(()) => {
                active.session.last_heartbeat_at = now;
                active.heartbeat_failures = 0;
                active.next_heartbeat_at = now + span(self.config.timing.heartbeat_interval);
                debug!(session_id = %id, "heartbeat recorded");
            }
            Err(e) => self.heartbeat_failed(active, now, &e),
        }
        HeartbeatCheck::Held
    }

    fn heartbeat_failed(&self, active: &mut ActiveSession, now: DateTime<Utc>, err: &CoreError) {
        active.heartbeat_failures = active.heartbeat_failures.saturating_add(1);
        let delay = self.config.retry.delay_for_attempt(active.heartbeat_failures);
        active.next_heartbeat_at = now + span(delay);
        warn!(
            session_id = %active.session.id,
            error = %err,
            attempt = active.heartbeat_failures,
            retry_in = ?delay,
            "heartbeat write failed"
        );
    }

    // ── Ending ───────────────────────────────────────────────────────

    /// Explicit disconnect or logout: end now, with the current time.
    pub async fn disconnect(&mut self) -> Option<EndedSession> {
        self.yield_to = None;
        let active = match std::mem::replace(&mut self.state, State::Idle) {
            State::Active(active) => active,
            other => {
                self.state = other;
                return None;
            }
        };
        let now = self.clock.now();
        info!(session_id = %active.session.id, "disconnect requested");
        let ended = self.end(active, EndReason::Disconnected, now).await;
        self.publish(self.clock.now());
        Some(ended)
    }

    /// Close, accrue, and persist. Accrual and the end write are retried
    /// with backoff until they succeed; the machine does not return to idle
    /// before the record is durable.
    async fn end(
        &mut self,
        active: Box<ActiveSession>,
        reason: EndReason,
        end_time: DateTime<Utc>,
    ) -> EndedSession {
        let id = active.session.id;
        self.publish_with(SessionPhase::Ending, Some(&active.session), self.clock.now());

        let mut closed = active.session.close(end_time, reason);

        let mut attempt = 0;
        let outcome: AccrualOutcome = loop {
            match self.accrual.accrue(&closed).await {
                Ok(outcome) => break outcome,
                Err(e) => self.backoff(id, "accrual", &e, &mut attempt).await,
            }
        };
        closed.points_earned = outcome.points_earned();

        let mut attempt = 0;
        let record = loop {
            match self.store.save_session(&closed).await {
                Ok(()) => break closed,
                Err(CoreError::SessionImmutable { .. }) => {
                    // Closed by another holder first; the stored record stands.
                    match self.store.get_session(id).await {
                        Ok(Some(stored)) => break stored,
                        Ok(None) => {
                            let e = CoreError::SessionNotFound { id };
                            self.backoff(id, "end write", &e, &mut attempt).await;
                        }
                        Err(e) => self.backoff(id, "end write", &e, &mut attempt).await,
                    }
                }
                Err(e) => self.backoff(id, "end write", &e, &mut attempt).await,
            }
        };

        let ended = EndedSession::from_session(&record);
        info!(
            session_id = %id,
            reason = %reason,
            duration_s = ended.duration_seconds,
            points = ?ended.points_earned,
            "session ended"
        );

        self.state = State::Ended;
        self.last_ended = Some(ended.clone());
        self.refresh_pending().await;
        ended
    }

    async fn backoff(&self, id: SessionId, what: &str, err: &CoreError, attempt: &mut u32) {
        *attempt = attempt.saturating_add(1);
        let delay = self.config.retry.delay_for_attempt(*attempt);
        warn!(
            session_id = %id,
            error = %err,
            attempt = *attempt,
            retry_in = ?delay,
            "{what} failed; retrying"
        );
        tokio::time::sleep(delay).await;
    }

    // ── Status ───────────────────────────────────────────────────────

    /// Recount records awaiting upload and republish.
    pub async fn refresh_pending(&mut self) {
        let sessions = self.store.list_unsynced_sessions().await;
        let transactions = self.store.list_unsynced_transactions().await;
        match (sessions, transactions) {
            (Ok(s), Ok(t)) => self.pending_sync = s.len() + t.len(),
            (Err(e), _) | (_, Err(e)) => {
                debug!(error = %e, "could not count pending sync records");
            }
        }
        self.publish(self.clock.now());
    }

    /// Republish with a fresh elapsed time.
    pub fn publish_now(&self) {
        self.publish(self.clock.now());
    }

    fn publish(&self, now: DateTime<Utc>) {
        let phase = self.phase();
        self.publish_with(phase, self.active_session(), now);
    }

    fn publish_with(&self, phase: SessionPhase, session: Option<&WifiSession>, now: DateTime<Utc>) {
        let elapsed = session.map_or(0, |s| s.elapsed_seconds(now));
        let status = SessionStatus {
            phase,
            session_id: session.map(|s| s.id),
            started_at: session.map(|s| s.start_time),
            elapsed_seconds: elapsed,
            estimated_points: session.map_or(0, |_| estimate_points(elapsed, &self.config.accrual)),
            last_validation: self.last_validation.clone(),
            last_ended: self.last_ended.clone(),
            pending_sync: self.pending_sync,
            updated_at: now,
        };
        self.status.send_replace(Arc::new(status));
    }
}
