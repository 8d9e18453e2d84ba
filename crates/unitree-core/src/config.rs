// ── Runtime engine configuration ──
//
// These types describe *what* counts as a campus session and *how fast*
// the engine ticks. They never touch disk: `unitree-config` builds an
// `EngineConfig` from TOML + env and hands it in.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::model::{DeviceId, UserId};

/// A campus geofence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campus {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,
}

/// How the IP factor is matched against `ip_prefix`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IpMatchMode {
    /// Plain string prefix. `"10.22"` also matches `10.220.x.x`.
    #[default]
    Prefix,
    /// Proper subnet containment; `ip_prefix` must be CIDR (`10.22.0.0/16`).
    Cidr,
}

/// Inputs of the validator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub ip_prefix: String,
    #[serde(default)]
    pub ip_match: IpMatchMode,
    #[serde(default)]
    pub campuses: Vec<Campus>,
}

/// Inputs of the accrual engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualConfig {
    pub points_per_minute: f64,
    pub min_session_minutes: u32,
    pub daily_cap_points: u32,
    /// Fixed UTC offset defining the calendar day for the daily cap.
    #[serde(default)]
    pub day_offset_minutes: i32,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            points_per_minute: 1.0,
            min_session_minutes: 5,
            daily_cap_points: 500,
            day_offset_minutes: 0,
        }
    }
}

/// Tick loop and persistence cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTiming {
    /// Validation tick period.
    pub tick_interval: Duration,
    /// Minimum spacing of heartbeat writes while active.
    pub heartbeat_interval: Duration,
    /// An active session with no valid tick for this long is ended.
    pub stale_after: Duration,
    /// Budget for each IP / location sample.
    pub sample_timeout: Duration,
    /// Remote sync pass period. Zero disables the sync task.
    pub sync_interval: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(300),
            sample_timeout: Duration::from_secs(10),
            sync_interval: Duration::from_secs(60),
        }
    }
}

/// Exponential backoff for persistence retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation, clippy::as_conversions)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Everything the engine needs for one (user, device).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub validation: ValidationConfig,
    pub accrual: AccrualConfig,
    pub timing: SessionTiming,
    pub retry: RetryPolicy,
}

impl EngineConfig {
    pub fn new(user_id: impl Into<UserId>, device_id: impl Into<DeviceId>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            validation: ValidationConfig::default(),
            accrual: AccrualConfig::default(),
            timing: SessionTiming::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(500), Duration::from_secs(10));
    }

    #[test]
    fn ip_match_mode_parses() {
        assert_eq!("cidr".parse::<IpMatchMode>().ok(), Some(IpMatchMode::Cidr));
        assert_eq!(IpMatchMode::default(), IpMatchMode::Prefix);
    }
}
