// ── Remote sync worker ──
//
// Pushes ended sessions and their ledger transactions to the backend.
// Failures are left unsynced for the next pass and never touch the
// session lifecycle.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::ports::RemoteSync;
use crate::store::SessionStore;

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub sessions_uploaded: usize,
    pub transactions_uploaded: usize,
    pub failed: usize,
    /// Records still unsynced after the pass.
    pub pending: usize,
}

/// Upload everything unsynced. Sessions go first so the backend sees a
/// session before the transaction that references it.
///
/// Only store failures are returned as errors; upload failures are counted
/// and retried on the next pass. A non-transient upload failure (e.g. a
/// rejected token) aborts the rest of the pass.
pub async fn sync_pending(
    store: &dyn SessionStore,
    remote: &dyn RemoteSync,
) -> Result<SyncReport, CoreError> {
    let mut report = SyncReport::default();

    let sessions = store.list_unsynced_sessions().await?;
    let transactions = store.list_unsynced_transactions().await?;
    debug!(
        sessions = sessions.len(),
        transactions = transactions.len(),
        "sync pass starting"
    );

    'pass: {
        for session in &sessions {
            match remote.upload_session(session).await {
                Ok(()) => {
                    store.mark_synced(session.id).await?;
                    report.sessions_uploaded += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(session_id = %session.id, error = %e, "session upload failed");
                    if !is_retryable(&e) {
                        break 'pass;
                    }
                }
            }
        }

        for tx in &transactions {
            match remote.upload_transaction(tx).await {
                Ok(()) => {
                    store.mark_transaction_synced(tx.id).await?;
                    report.transactions_uploaded += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(tx_id = %tx.id, error = %e, "transaction upload failed");
                    if !is_retryable(&e) {
                        break 'pass;
                    }
                }
            }
        }
    }

    report.pending = (sessions.len() + transactions.len())
        .saturating_sub(report.sessions_uploaded + report.transactions_uploaded);

    if report.sessions_uploaded + report.transactions_uploaded > 0 || report.failed > 0 {
        info!(
            sessions = report.sessions_uploaded,
            transactions = report.transactions_uploaded,
            failed = report.failed,
            pending = report.pending,
            "sync pass finished"
        );
    }
    Ok(report)
}

fn is_retryable(err: &CoreError) -> bool {
    !matches!(
        err,
        CoreError::Sync {
            transient: false,
            ..
        } | CoreError::Config { .. }
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::model::{
        EndReason, LocationCheck, PointLedgerTransaction, SessionId, ValidationResult, WifiSession,
    };
    use crate::store::MemoryStore;

    #[derive(Default)]
    struct RecordingRemote {
        sessions: Mutex<Vec<SessionId>>,
        fail_sessions: bool,
        fatal: bool,
    }

    #[async_trait]
    impl RemoteSync for RecordingRemote {
        async fn upload_session(&self, session: &WifiSession) -> Result<(), CoreError> {
            if self.fail_sessions {
                return Err(CoreError::Sync {
                    message: "backend down".into(),
                    transient: !self.fatal,
                });
            }
            self.sessions.lock().unwrap().push(session.id);
            Ok(())
        }

        async fn upload_transaction(&self, _tx: &PointLedgerTransaction) -> Result<(), CoreError> {
            Ok(())
        }
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let validation = ValidationResult {
            ip_address: Some("10.22.5.9".into()),
            ip_valid: true,
            location_valid: true,
            location: LocationCheck::Within,
            campus_name: None,
            distance_meters: None,
        };
        let mut ended = WifiSession::start("u".into(), "d".into(), start, validation.clone())
            .close(start + Duration::minutes(20), EndReason::Disconnected);
        ended.points_earned = Some(20);
        store.save_session(&ended).await.unwrap();
        store
            .insert_transaction(PointLedgerTransaction::wifi_session(
                "u".into(),
                ended.id,
                20,
                start + Duration::minutes(20),
            ))
            .await
            .unwrap();

        // Active sessions are never uploaded.
        let active = WifiSession::start("u".into(), "d".into(), start, validation);
        store.save_session(&active).await.unwrap();
        store
    }

    #[tokio::test]
    async fn uploads_ended_records_and_marks_them() {
        let store = seeded_store().await;
        let remote = RecordingRemote::default();

        let report = sync_pending(&store, &remote).await.unwrap();
        assert_eq!(report.sessions_uploaded, 1);
        assert_eq!(report.transactions_uploaded, 1);
        assert_eq!(report.pending, 0);
        assert!(store.list_unsynced_sessions().await.unwrap().is_empty());

        let again = sync_pending(&store, &remote).await.unwrap();
        assert_eq!(again, SyncReport::default());
    }

    #[tokio::test]
    async fn transient_failures_leave_records_pending() {
        let store = seeded_store().await;
        let remote = RecordingRemote {
            fail_sessions: true,
            ..RecordingRemote::default()
        };

        let report = sync_pending(&store, &remote).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.transactions_uploaded, 1);
        assert_eq!(report.pending, 1);
        assert_eq!(store.list_unsynced_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fatal_failure_aborts_the_pass() {
        let store = seeded_store().await;
        let remote = RecordingRemote {
            fail_sessions: true,
            fatal: true,
            ..RecordingRemote::default()
        };

        let report = sync_pending(&store, &remote).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.transactions_uploaded, 0);
        assert_eq!(report.pending, 2);
    }
}
