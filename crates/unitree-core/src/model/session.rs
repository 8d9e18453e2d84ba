use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::{DeviceId, SessionId, UserId, ValidationResult};

/// Why a session left the `Active` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A tick failed the dual-factor check.
    ValidationFailed,
    /// Explicit user disconnect or logout.
    Disconnected,
    /// No valid tick arrived within the stale window.
    TickTimeout,
    /// Found dangling in storage on relaunch and closed from its heartbeat.
    Recovered,
    /// Another holder for the same device took over.
    Superseded,
}

/// A period of validated on-campus connectivity.
///
/// Owned by the session state machine. Once `end_time` is set the record is
/// immutable apart from `synced`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub ip_address: String,
    pub last_validation: ValidationResult,
    pub is_active: bool,
    pub duration_seconds: Option<i64>,
    /// Set iff the session ended and met the minimum-duration floor.
    pub points_earned: Option<u32>,
    /// Last moment validation was known to hold, as durably recorded.
    pub last_heartbeat_at: DateTime<Utc>,
    pub end_reason: Option<EndReason>,
    #[serde(default)]
    pub synced: bool,
}

impl WifiSession {
    /// Open a new active session at `now`.
    pub fn start(
        user_id: UserId,
        device_id: DeviceId,
        now: DateTime<Utc>,
        validation: ValidationResult,
    ) -> Self {
        Self {
            id: SessionId::new(),
            user_id,
            device_id,
            start_time: now,
            end_time: None,
            ip_address: validation.ip_address.clone().unwrap_or_default(),
            last_validation: validation,
            is_active: true,
            duration_seconds: None,
            points_earned: None,
            last_heartbeat_at: now,
            end_reason: None,
            synced: false,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }

    /// Seconds between start and `now`, never negative.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.start_time).num_seconds().max(0)
    }

    /// Close the session at `end_time`.
    ///
    /// `end_time` is clamped to `start_time` so a skewed clock can never
    /// produce a negative duration. `points_earned` stays unset; the accrual
    /// engine decides it.
    pub fn close(mut self, end_time: DateTime<Utc>, reason: EndReason) -> Self {
        let end_time = end_time.max(self.start_time);
        self.end_time = Some(end_time);
        self.is_active = false;
        self.duration_seconds = Some((end_time - self.start_time).num_seconds());
        self.end_reason = Some(reason);
        self.synced = false;
        self
    }
}
