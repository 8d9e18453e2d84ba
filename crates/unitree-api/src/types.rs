// Wire types for the UniTree backend.
//
// The backend speaks camelCase JSON. These types mirror the request and
// response bodies; `unitree-core` converts its domain model into them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /api/wifi-sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpload {
    pub id: Uuid,
    pub user_id: String,
    pub device_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub ip_address: String,
    pub is_active: bool,
    pub duration_seconds: Option<i64>,
    pub points_earned: Option<u32>,
    pub ip_valid: bool,
    pub location_valid: bool,
    pub campus_name: Option<String>,
    pub distance_meters: Option<f64>,
    pub end_reason: Option<String>,
}

/// Body of `POST /api/points/transactions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpload {
    pub id: Uuid,
    pub user_id: String,
    pub amount: i64,
    /// Ledger type tag, e.g. `WIFI_SESSION`.
    #[serde(rename = "type")]
    pub kind: String,
    pub source_session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Response of `GET /api/points/users/{user}/wifi-total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiPointsTotal {
    pub date: NaiveDate,
    pub total: u32,
}

/// Acknowledgement returned by the upload endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAck {
    pub id: Uuid,
    /// `true` when the backend had already stored this record.
    #[serde(default)]
    pub duplicate: bool,
}
