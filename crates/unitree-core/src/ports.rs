// ── Collaborator ports ──
//
// Everything the engine consumes from the platform or the backend is an
// injected trait object, so the state machine can be driven by fakes.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use crate::error::CoreError;
use crate::model::{LocationSignal, PermissionState, PointLedgerTransaction, UserId, WifiSession};

/// Source of the device's current IP address.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn current_ip(&self) -> Result<String, CoreError>;
}

/// Source of geolocation fixes. `None` when no fix arrived within `timeout`.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_location(&self, timeout: Duration) -> Option<LocationSignal>;
}

/// Runtime location-permission capability.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn location_permission(&self) -> PermissionState;
}

/// Aggregated WiFi-sourced points already credited to a user.
#[async_trait]
pub trait LedgerBalance: Send + Sync {
    /// Sum of `WIFI_SESSION` amounts for `user_id` on calendar `day`, where
    /// days are delimited in `offset`.
    async fn wifi_points_on(
        &self,
        user_id: &UserId,
        day: NaiveDate,
        offset: FixedOffset,
    ) -> Result<u32, CoreError>;
}

/// Uploads locally persisted records to the backend.
///
/// Delivery is at-least-once; implementations must tolerate replays of the
/// same session or transaction id.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    async fn upload_session(&self, session: &WifiSession) -> Result<(), CoreError>;
    async fn upload_transaction(&self, tx: &PointLedgerTransaction) -> Result<(), CoreError>;
}

// ── Clock ───────────────────────────────────────────────────────────

/// Wall-clock source for session timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Millisecond resolution.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}
