use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{SessionId, TransactionId, UserId};

/// Ledger entry type. Only `WifiSession` entries count against the daily cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    WifiSession,
    AdminAdjustment,
}

/// An append-only point-ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointLedgerTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub amount: i64,
    pub kind: TransactionKind,
    /// The session this entry was accrued from. Unique across the ledger.
    pub source_session_id: Option<SessionId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub synced: bool,
}

impl PointLedgerTransaction {
    /// A WiFi accrual entry for `session_id`.
    pub fn wifi_session(
        user_id: UserId,
        session_id: SessionId,
        amount: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            user_id,
            amount: i64::from(amount),
            kind: TransactionKind::WifiSession,
            source_session_id: Some(session_id),
            created_at,
            synced: false,
        }
    }
}
