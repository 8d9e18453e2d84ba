// ── Durable session storage ──
//
// The local store is the single source of truth on the client. The state
// machine is its only writer of session records; the sync worker only flips
// `synced` flags.

mod file;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use crate::error::CoreError;
use crate::model::{
    DeviceId, PointLedgerTransaction, SessionId, TransactionId, TransactionKind, UserId,
    ValidationResult, WifiSession,
};

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Repository for sessions and the transactions they produce.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace a session. Ended sessions reject every change
    /// except to `synced`.
    async fn save_session(&self, session: &WifiSession) -> Result<(), CoreError>;

    /// Lightweight heartbeat: advance `last_heartbeat_at` and
    /// `last_validation` of an active session.
    async fn record_heartbeat(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
        validation: &ValidationResult,
    ) -> Result<(), CoreError>;

    async fn get_session(&self, id: SessionId) -> Result<Option<WifiSession>, CoreError>;

    /// Active sessions for (user, device), most recent heartbeat first.
    async fn load_active(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<Vec<WifiSession>, CoreError>;

    /// All sessions for a user, newest first.
    async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<WifiSession>, CoreError>;

    /// Ended sessions not yet uploaded.
    async fn list_unsynced_sessions(&self) -> Result<Vec<WifiSession>, CoreError>;

    async fn mark_synced(&self, id: SessionId) -> Result<(), CoreError>;

    /// Append a transaction. If one already exists for the same
    /// `source_session_id`, nothing is written and the existing one is returned.
    async fn insert_transaction(
        &self,
        tx: PointLedgerTransaction,
    ) -> Result<PointLedgerTransaction, CoreError>;

    async fn transaction_for_session(
        &self,
        id: SessionId,
    ) -> Result<Option<PointLedgerTransaction>, CoreError>;

    /// All transactions for a user, newest first.
    async fn list_transactions(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PointLedgerTransaction>, CoreError>;

    async fn list_unsynced_transactions(&self) -> Result<Vec<PointLedgerTransaction>, CoreError>;

    async fn mark_transaction_synced(&self, id: TransactionId) -> Result<(), CoreError>;
}

// ── Shared invariants ───────────────────────────────────────────────

/// Reject any change to an ended session other than its `synced` flag.
pub(crate) fn ensure_mutable(
    existing: &WifiSession,
    incoming: &WifiSession,
) -> Result<(), CoreError> {
    if !existing.is_ended() {
        return Ok(());
    }
    let mut normalized = incoming.clone();
    normalized.synced = existing.synced;
    if normalized == *existing {
        Ok(())
    } else {
        Err(CoreError::SessionImmutable { id: existing.id })
    }
}

/// Apply a heartbeat to an in-memory record. Never moves time backwards.
pub(crate) fn apply_heartbeat(
    session: &mut WifiSession,
    at: DateTime<Utc>,
    validation: &ValidationResult,
) -> Result<(), CoreError> {
    if session.is_ended() {
        return Err(CoreError::SessionImmutable { id: session.id });
    }
    if at >= session.last_heartbeat_at {
        session.last_heartbeat_at = at;
        session.last_validation = validation.clone();
    }
    Ok(())
}

/// Most recent heartbeat first; equal heartbeats order by descending id so
/// every holder reading the same records agrees on the winner.
pub(crate) fn newest_heartbeat_first(sessions: &mut [WifiSession]) {
    sessions.sort_by(|a, b| {
        b.last_heartbeat_at
            .cmp(&a.last_heartbeat_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Sum of WiFi amounts for `user_id` whose `created_at` falls on `day`.
pub(crate) fn wifi_total<'a>(
    transactions: impl Iterator<Item = &'a PointLedgerTransaction>,
    user_id: &UserId,
    day: NaiveDate,
    offset: FixedOffset,
) -> u32 {
    let total: i64 = transactions
        .filter(|tx| tx.kind == TransactionKind::WifiSession && tx.user_id == *user_id)
        .filter(|tx| tx.created_at.with_timezone(&offset).date_naive() == day)
        .map(|tx| tx.amount)
        .sum();
    u32::try_from(total.max(0)).unwrap_or(u32::MAX)
}
