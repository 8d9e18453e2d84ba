// ── In-memory store ──
//
// `DashMap`-backed implementation of `SessionStore` and `LedgerBalance`.
// Used by tests and by embedders that persist elsewhere.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{SessionStore, apply_heartbeat, ensure_mutable, newest_heartbeat_first, wifi_total};
use crate::error::CoreError;
use crate::model::{
    DeviceId, PointLedgerTransaction, SessionId, TransactionId, UserId, ValidationResult,
    WifiSession,
};
use crate::ports::LedgerBalance;

/// Lock-free in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: DashMap<SessionId, WifiSession>,
    transactions: DashMap<TransactionId, PointLedgerTransaction>,
    /// Secondary index: source session -> transaction. Enforces one
    /// transaction per session.
    by_source: DashMap<SessionId, TransactionId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save_session(&self, session: &WifiSession) -> Result<(), CoreError> {
        match self.sessions.entry(session.id) {
            Entry::Occupied(mut entry) => {
                ensure_mutable(entry.get(), session)?;
                entry.insert(session.clone());
            }
            Entry::Vacant(entry) => {
                entry.insert(session.clone());
            }
        }
        Ok(())
    }

    async fn record_heartbeat(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
        validation: &ValidationResult,
    ) -> Result<(), CoreError> {
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or(CoreError::SessionNotFound { id })?;
        apply_heartbeat(&mut session, at, validation)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<WifiSession>, CoreError> {
        Ok(self.sessions.get(&id).map(|r| r.value().clone()))
    }

    async fn load_active(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<Vec<WifiSession>, CoreError> {
        let mut active: Vec<WifiSession> = self
            .sessions
            .iter()
            .filter(|r| r.is_active && r.user_id == *user_id && r.device_id == *device_id)
            .map(|r| r.value().clone())
            .collect();
        newest_heartbeat_first(&mut active);
        Ok(active)
    }

    async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<WifiSession>, CoreError> {
        let mut sessions: Vec<WifiSession> = self
            .sessions
            .iter()
            .filter(|r| r.user_id == *user_id)
            .map(|r| r.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    async fn list_unsynced_sessions(&self) -> Result<Vec<WifiSession>, CoreError> {
        let mut sessions: Vec<WifiSession> = self
            .sessions
            .iter()
            .filter(|r| r.is_ended() && !r.synced)
            .map(|r| r.value().clone())
            .collect();
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(sessions)
    }

    async fn mark_synced(&self, id: SessionId) -> Result<(), CoreError> {
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or(CoreError::SessionNotFound { id })?;
        session.synced = true;
        Ok(())
    }

    async fn insert_transaction(
        &self,
        tx: PointLedgerTransaction,
    ) -> Result<PointLedgerTransaction, CoreError> {
        let Some(source) = tx.source_session_id else {
            self.transactions.insert(tx.id, tx.clone());
            return Ok(tx);
        };

        match self.by_source.entry(source) {
            Entry::Occupied(entry) => self
                .transactions
                .get(entry.get())
                .map(|r| r.value().clone())
                .ok_or_else(|| CoreError::Internal(format!("dangling ledger index for {source}"))),
            Entry::Vacant(entry) => {
                self.transactions.insert(tx.id, tx.clone());
                entry.insert(tx.id);
                Ok(tx)
            }
        }
    }

    async fn transaction_for_session(
        &self,
        id: SessionId,
    ) -> Result<Option<PointLedgerTransaction>, CoreError> {
        Ok(self
            .by_source
            .get(&id)
            .and_then(|tx_id| self.transactions.get(tx_id.value()).map(|r| r.value().clone())))
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PointLedgerTransaction>, CoreError> {
        let mut txs: Vec<PointLedgerTransaction> = self
            .transactions
            .iter()
            .filter(|r| r.user_id == *user_id)
            .map(|r| r.value().clone())
            .collect();
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(txs)
    }

    async fn list_unsynced_transactions(&self) -> Result<Vec<PointLedgerTransaction>, CoreError> {
        let mut txs: Vec<PointLedgerTransaction> = self
            .transactions
            .iter()
            .filter(|r| !r.synced)
            .map(|r| r.value().clone())
            .collect();
        txs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(txs)
    }

    async fn mark_transaction_synced(&self, id: TransactionId) -> Result<(), CoreError> {
        let mut tx = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| CoreError::Internal(format!("transaction not found: {id}")))?;
        tx.synced = true;
        Ok(())
    }
}

#[async_trait]
impl LedgerBalance for MemoryStore {
    async fn wifi_points_on(
        &self,
        user_id: &UserId,
        day: NaiveDate,
        offset: FixedOffset,
    ) -> Result<u32, CoreError> {
        let snapshot: Vec<PointLedgerTransaction> =
            self.transactions.iter().map(|r| r.value().clone()).collect();
        Ok(wifi_total(snapshot.iter(), user_id, day, offset))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, Offset, TimeZone};

    use super::*;
    use crate::model::{EndReason, LocationCheck, TransactionKind};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn valid() -> ValidationResult {
        ValidationResult {
            ip_address: Some("10.22.5.9".into()),
            ip_valid: true,
            location_valid: true,
            location: LocationCheck::Within,
            campus_name: Some("Main".into()),
            distance_meters: Some(5.0),
        }
    }

    fn session(start: DateTime<Utc>) -> WifiSession {
        WifiSession::start("student-1".into(), "phone-a".into(), start, valid())
    }

    #[tokio::test]
    async fn ended_sessions_are_immutable_except_synced() {
        let store = MemoryStore::new();
        let ended = session(at(9, 0)).close(at(9, 30), EndReason::ValidationFailed);
        store.save_session(&ended).await.unwrap();

        let mut resynced = ended.clone();
        resynced.synced = true;
        store.save_session(&resynced).await.unwrap();

        let mut tampered = ended.clone();
        tampered.points_earned = Some(1_000);
        let err = store.save_session(&tampered).await.unwrap_err();
        assert!(matches!(err, CoreError::SessionImmutable { .. }));
    }

    #[tokio::test]
    async fn heartbeat_never_moves_backwards() {
        let store = MemoryStore::new();
        let s = session(at(9, 0));
        store.save_session(&s).await.unwrap();

        store.record_heartbeat(s.id, at(9, 10), &valid()).await.unwrap();
        store.record_heartbeat(s.id, at(9, 5), &valid()).await.unwrap();

        let stored = store.get_session(s.id).await.unwrap().unwrap();
        assert_eq!(stored.last_heartbeat_at, at(9, 10));
    }

    #[tokio::test]
    async fn heartbeat_on_unknown_session_fails() {
        let store = MemoryStore::new();
        let err = store
            .record_heartbeat(SessionId::new(), at(9, 0), &valid())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn load_active_orders_by_heartbeat() {
        let store = MemoryStore::new();
        let mut older = session(at(8, 0));
        older.last_heartbeat_at = at(8, 30);
        let mut newer = session(at(8, 10));
        newer.last_heartbeat_at = at(9, 0);
        store.save_session(&older).await.unwrap();
        store.save_session(&newer).await.unwrap();

        let active = store
            .load_active(&"student-1".into(), &"phone-a".into())
            .await
            .unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].id, newer.id);
    }

    #[tokio::test]
    async fn insert_transaction_is_idempotent_per_session() {
        let store = MemoryStore::new();
        let sid = SessionId::new();
        let first = PointLedgerTransaction::wifi_session("student-1".into(), sid, 90, at(10, 0));
        let second = PointLedgerTransaction::wifi_session("student-1".into(), sid, 90, at(10, 1));

        let a = store.insert_transaction(first.clone()).await.unwrap();
        let b = store.insert_transaction(second).await.unwrap();
        assert_eq!(a.id, first.id);
        assert_eq!(b.id, first.id);
        assert_eq!(store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn wifi_total_counts_only_wifi_entries_on_that_day() {
        let store = MemoryStore::new();
        let user: UserId = "student-1".into();
        for (amount, when) in [(40, at(9, 0)), (60, at(23, 30))] {
            let tx = PointLedgerTransaction::wifi_session(user.clone(), SessionId::new(), amount, when);
            store.insert_transaction(tx).await.unwrap();
        }
        let mut admin = PointLedgerTransaction::wifi_session(user.clone(), SessionId::new(), 500, at(10, 0));
        admin.kind = TransactionKind::AdminAdjustment;
        admin.source_session_id = None;
        store.insert_transaction(admin).await.unwrap();
        let yesterday = PointLedgerTransaction::wifi_session(
            user.clone(),
            SessionId::new(),
            70,
            at(9, 0) - Duration::days(1),
        );
        store.insert_transaction(yesterday).await.unwrap();

        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let total = store.wifi_points_on(&user, day, Utc.fix()).await.unwrap();
        assert_eq!(total, 100);

        // At UTC+1 the 23:30 entry belongs to the next day.
        let plus_one = FixedOffset::east_opt(3600).unwrap();
        let total = store.wifi_points_on(&user, day, plus_one).await.unwrap();
        assert_eq!(total, 40);
    }
}
