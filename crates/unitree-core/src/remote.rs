// ── Backend adapters ──
//
// Binds the HTTP client to the sync and ledger ports, and converts the
// domain model into the backend's wire types.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate};
use tracing::{debug, warn};

use unitree_api::{ApiClient, SessionUpload, TransactionUpload};

use crate::error::CoreError;
use crate::model::{PointLedgerTransaction, UserId, WifiSession};
use crate::ports::{LedgerBalance, RemoteSync};
use crate::store::{SessionStore, wifi_total};

// ── Conversions ──────────────────────────────────────────────────────

impl From<&WifiSession> for SessionUpload {
    fn from(s: &WifiSession) -> Self {
        Self {
            id: s.id.as_uuid(),
            user_id: s.user_id.to_string(),
            device_id: s.device_id.to_string(),
            start_time: s.start_time,
            end_time: s.end_time,
            ip_address: s.ip_address.clone(),
            is_active: s.is_active,
            duration_seconds: s.duration_seconds,
            points_earned: s.points_earned,
            ip_valid: s.last_validation.ip_valid,
            location_valid: s.last_validation.location_valid,
            campus_name: s.last_validation.campus_name.clone(),
            distance_meters: s.last_validation.distance_meters,
            end_reason: s.end_reason.map(|r| r.to_string()),
        }
    }
}

impl From<&PointLedgerTransaction> for TransactionUpload {
    fn from(tx: &PointLedgerTransaction) -> Self {
        Self {
            id: tx.id.as_uuid(),
            user_id: tx.user_id.to_string(),
            amount: tx.amount,
            kind: tx.kind.to_string(),
            source_session_id: tx.source_session_id.map(|s| s.as_uuid()),
            created_at: tx.created_at,
        }
    }
}

// ── Port implementations ─────────────────────────────────────────────

#[async_trait]
impl RemoteSync for ApiClient {
    async fn upload_session(&self, session: &WifiSession) -> Result<(), CoreError> {
        let ack = ApiClient::upload_session(self, &SessionUpload::from(session)).await?;
        debug!(session_id = %session.id, duplicate = ack.duplicate, "session uploaded");
        Ok(())
    }

    async fn upload_transaction(&self, tx: &PointLedgerTransaction) -> Result<(), CoreError> {
        let ack = ApiClient::upload_transaction(self, &TransactionUpload::from(tx)).await?;
        debug!(tx_id = %tx.id, duplicate = ack.duplicate, "transaction uploaded");
        Ok(())
    }
}

#[async_trait]
impl LedgerBalance for ApiClient {
    async fn wifi_points_on(
        &self,
        user_id: &UserId,
        day: NaiveDate,
        offset: FixedOffset,
    ) -> Result<u32, CoreError> {
        let total = self
            .wifi_points_total(user_id.as_str(), day, offset.local_minus_utc() / 60)
            .await
            .map_err(|e| CoreError::LedgerUnavailable {
                message: e.to_string(),
            })?;
        Ok(total.total)
    }
}

// ── Merged ledger view ───────────────────────────────────────────────

/// Balance from both the backend and the local store.
///
/// The backend knows about accruals from the user's other devices and
/// everything this device has already uploaded; the local store adds the
/// accruals still waiting to sync. When the backend is unreachable the full
/// local figure stands alone, so accrual never stalls on connectivity.
pub struct MergedLedger {
    local: Arc<dyn SessionStore>,
    remote: Arc<dyn LedgerBalance>,
}

impl MergedLedger {
    pub fn new(local: Arc<dyn SessionStore>, remote: Arc<dyn LedgerBalance>) -> Self {
        Self { local, remote }
    }
}

#[async_trait]
impl LedgerBalance for MergedLedger {
    async fn wifi_points_on(
        &self,
        user_id: &UserId,
        day: NaiveDate,
        offset: FixedOffset,
    ) -> Result<u32, CoreError> {
        // Read unsynced before the backend: an upload landing in between is
        // counted twice rather than not at all.
        let unsynced = self.local.list_unsynced_transactions().await?;
        let pending = wifi_total(unsynced.iter(), user_id, day, offset);

        match self.remote.wifi_points_on(user_id, day, offset).await {
            Ok(remote) => Ok(remote.saturating_add(pending)),
            Err(e) => {
                let local = self.local.list_transactions(user_id).await?;
                let local = wifi_total(local.iter(), user_id, day, offset);
                warn!(error = %e, local, "remote ledger unavailable; using local balance");
                Ok(local)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, Offset, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::accrual::AccrualEngine;
    use crate::config::AccrualConfig;
    use crate::model::{EndReason, LocationCheck, SessionId, ValidationResult};
    use crate::store::MemoryStore;

    struct Fixed(Result<u32, ()>);

    #[async_trait]
    impl LedgerBalance for Fixed {
        async fn wifi_points_on(
            &self,
            _user_id: &UserId,
            _day: NaiveDate,
            _offset: FixedOffset,
        ) -> Result<u32, CoreError> {
            self.0.map_err(|()| CoreError::LedgerUnavailable {
                message: "offline".into(),
            })
        }
    }

    fn valid() -> ValidationResult {
        ValidationResult {
            ip_address: Some("10.22.5.9".into()),
            ip_valid: true,
            location_valid: true,
            location: LocationCheck::Within,
            campus_name: Some("Main".into()),
            distance_meters: Some(42.0),
        }
    }

    #[test]
    fn session_upload_carries_audit_fields() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let session = WifiSession::start("student-1".into(), "phone-a".into(), start, valid())
            .close(start + Duration::minutes(30), EndReason::TickTimeout);

        let upload = SessionUpload::from(&session);
        assert_eq!(upload.id, session.id.as_uuid());
        assert_eq!(upload.duration_seconds, Some(1800));
        assert_eq!(upload.campus_name.as_deref(), Some("Main"));
        assert_eq!(upload.end_reason.as_deref(), Some("tick_timeout"));
    }

    #[test]
    fn transaction_upload_uses_backend_type_tag() {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let sid = SessionId::new();
        let tx = PointLedgerTransaction::wifi_session("student-1".into(), sid, 90, at);
        let upload = TransactionUpload::from(&tx);
        assert_eq!(upload.kind, "WIFI_SESSION");
        assert_eq!(upload.source_session_id, Some(sid.as_uuid()));
    }

    fn wifi_tx(amount: u32, synced: bool) -> PointLedgerTransaction {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let mut tx =
            PointLedgerTransaction::wifi_session("student-1".into(), SessionId::new(), amount, at);
        tx.synced = synced;
        tx
    }

    #[tokio::test]
    async fn merged_ledger_adds_unsynced_local_to_remote() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let user: UserId = "student-1".into();
        let store = Arc::new(MemoryStore::new());
        store.insert_transaction(wifi_tx(300, true)).await.unwrap();
        store.insert_transaction(wifi_tx(100, false)).await.unwrap();

        // Backend holds the 300 uploaded here plus 150 from another device.
        let merged = MergedLedger::new(store.clone(), Arc::new(Fixed(Ok(450))));
        assert_eq!(merged.wifi_points_on(&user, day, Utc.fix()).await.unwrap(), 550);

        let offline = MergedLedger::new(store, Arc::new(Fixed(Err(()))));
        assert_eq!(offline.wifi_points_on(&user, day, Utc.fix()).await.unwrap(), 400);
    }

    #[tokio::test]
    async fn merged_ledger_caps_award_with_other_devices_points() {
        let store = Arc::new(MemoryStore::new());
        store.insert_transaction(wifi_tx(300, true)).await.unwrap();
        store.insert_transaction(wifi_tx(100, false)).await.unwrap();
        let ledger = Arc::new(MergedLedger::new(store.clone(), Arc::new(Fixed(Ok(450)))));

        // One point per minute, 500 a day.
        let accrual = AccrualEngine::new(AccrualConfig::default(), store.clone(), ledger);

        let start = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let session = WifiSession::start("student-1".into(), "phone-a".into(), start, valid())
            .close(start + Duration::minutes(60), EndReason::Disconnected);
        let outcome = accrual.accrue(&session).await.unwrap();
        assert_eq!(outcome.points_earned(), Some(0));
        assert_eq!(store.transaction_count(), 2);
    }
}
