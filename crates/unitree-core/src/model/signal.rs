// ── Platform signals ──
//
// Transient inputs sampled on every tick. Never persisted on their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The device's current network address as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSignal {
    pub ip_address: String,
    pub sampled_at: DateTime<Utc>,
}

/// A geolocation fix. Absent when permission is denied or no fix arrived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSignal {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: f64,
    pub sampled_at: DateTime<Utc>,
}

/// Runtime location-permission state reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    Undetermined,
}

impl PermissionState {
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}
