// ── In-process signal sources ──
//
// `SharedSignals` is a push-fed implementation of the three platform signal
// ports: whatever owns the real radio/GPS (or a test, or a replayed feed)
// writes the latest readings, and the engine samples them on each tick.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::CoreError;
use crate::model::{LocationSignal, PermissionState};
use crate::ports::{LocationProvider, NetworkProbe, PermissionProvider};

/// Latest platform readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub ip_address: Option<String>,
    pub location: Option<LocationSignal>,
    pub permission: PermissionState,
}

impl Default for SignalSnapshot {
    fn default() -> Self {
        Self {
            ip_address: None,
            location: None,
            permission: PermissionState::Undetermined,
        }
    }
}

/// Cloneable handle; every clone sees the same readings.
#[derive(Debug, Clone)]
pub struct SharedSignals {
    tx: watch::Sender<SignalSnapshot>,
}

impl Default for SharedSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedSignals {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SignalSnapshot::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> SignalSnapshot {
        self.tx.borrow().clone()
    }

    pub fn replace(&self, snapshot: SignalSnapshot) {
        self.tx.send_replace(snapshot);
    }

    pub fn set_ip(&self, ip: Option<String>) {
        self.tx.send_modify(|s| s.ip_address = ip);
    }

    pub fn set_location(&self, location: Option<LocationSignal>) {
        self.tx.send_modify(|s| s.location = location);
    }

    pub fn set_permission(&self, permission: PermissionState) {
        self.tx.send_modify(|s| s.permission = permission);
    }
}

#[async_trait]
impl NetworkProbe for SharedSignals {
    async fn current_ip(&self) -> Result<String, CoreError> {
        self.tx
            .borrow()
            .ip_address
            .clone()
            .ok_or_else(|| CoreError::SignalUnavailable {
                reason: "no network address reported".into(),
            })
    }
}

#[async_trait]
impl LocationProvider for SharedSignals {
    async fn current_location(&self, _timeout: Duration) -> Option<LocationSignal> {
        self.tx.borrow().location
    }
}

#[async_trait]
impl PermissionProvider for SharedSignals {
    async fn location_permission(&self) -> PermissionState {
        self.tx.borrow().permission
    }
}

/// A fixed permission answer.
#[async_trait]
impl PermissionProvider for PermissionState {
    async fn location_permission(&self) -> PermissionState {
        *self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_readings() {
        let signals = SharedSignals::new();
        let probe = signals.clone();
        assert!(probe.current_ip().await.is_err());

        signals.set_ip(Some("10.22.1.1".into()));
        signals.set_permission(PermissionState::Granted);
        assert_eq!(probe.current_ip().await.unwrap(), "10.22.1.1");
        assert_eq!(probe.location_permission().await, PermissionState::Granted);
    }
}
