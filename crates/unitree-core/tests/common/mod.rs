#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};

use unitree_core::{
    Campus, CoreError, DeviceId, EngineConfig, IpMatchMode, LedgerBalance, LocationCheck,
    ManualClock, MemoryStore, PointLedgerTransaction, SessionId, SessionMachine, SessionStore,
    TransactionId, UserId, ValidationConfig, ValidationResult, WifiSession,
};

pub const USER: &str = "student-1";
pub const DEVICE: &str = "phone-a";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn campus_config() -> ValidationConfig {
    ValidationConfig {
        ip_prefix: "10.22".into(),
        ip_match: IpMatchMode::Prefix,
        campuses: vec![Campus {
            name: "Main".into(),
            latitude: 51.5000,
            longitude: -0.1200,
            radius_meters: 100.0,
        }],
    }
}

pub fn engine_config() -> EngineConfig {
    let mut config = EngineConfig::new(USER, DEVICE);
    config.validation = campus_config();
    config
}

pub fn valid() -> ValidationResult {
    ValidationResult {
        ip_address: Some("10.22.5.9".into()),
        ip_valid: true,
        location_valid: true,
        location: LocationCheck::Within,
        campus_name: Some("Main".into()),
        distance_meters: Some(50.0),
    }
}

pub fn off_campus() -> ValidationResult {
    ValidationResult {
        ip_address: Some("10.22.5.9".into()),
        ip_valid: true,
        location_valid: false,
        location: LocationCheck::OutOfRange,
        campus_name: Some("Main".into()),
        distance_meters: Some(2_400.0),
    }
}

pub fn machine_with(
    config: EngineConfig,
    store: Arc<dyn SessionStore>,
    ledger: Arc<dyn LedgerBalance>,
    clock: &Arc<ManualClock>,
) -> SessionMachine {
    SessionMachine::new(config, store, ledger, clock.clone())
}

pub fn machine(store: &Arc<MemoryStore>, clock: &Arc<ManualClock>) -> SessionMachine {
    machine_with(engine_config(), store.clone(), store.clone(), clock)
}

/// Advance the clock by one minute and feed a valid tick, `minutes` times.
pub async fn hold_valid(machine: &mut SessionMachine, clock: &ManualClock, minutes: u32) {
    for _ in 0..minutes {
        clock.advance(chrono::Duration::minutes(1));
        machine.on_validation(valid()).await;
    }
}

pub async fn seed_wifi_points(store: &MemoryStore, amount: u32, at: DateTime<Utc>) {
    let tx = PointLedgerTransaction::wifi_session(USER.into(), SessionId::new(), amount, at);
    store.insert_transaction(tx).await.unwrap();
}

// ── FlakyStore ──────────────────────────────────────────────────────

/// A `MemoryStore` whose writes can be told to fail a number of times.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_saves: AtomicU32,
    pub fail_heartbeats: AtomicU32,
    pub fail_transactions: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn trip(counter: &AtomicU32, what: &str) -> Result<(), CoreError> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(CoreError::Storage {
                message: format!("injected {what} failure"),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn save_session(&self, session: &WifiSession) -> Result<(), CoreError> {
        Self::trip(&self.fail_saves, "save")?;
        self.inner.save_session(session).await
    }

    async fn record_heartbeat(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
        validation: &ValidationResult,
    ) -> Result<(), CoreError> {
        Self::trip(&self.fail_heartbeats, "heartbeat")?;
        self.inner.record_heartbeat(id, at, validation).await
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<WifiSession>, CoreError> {
        self.inner.get_session(id).await
    }

    async fn load_active(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<Vec<WifiSession>, CoreError> {
        self.inner.load_active(user_id, device_id).await
    }

    async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<WifiSession>, CoreError> {
        self.inner.list_sessions(user_id).await
    }

    async fn list_unsynced_sessions(&self) -> Result<Vec<WifiSession>, CoreError> {
        self.inner.list_unsynced_sessions().await
    }

    async fn mark_synced(&self, id: SessionId) -> Result<(), CoreError> {
        self.inner.mark_synced(id).await
    }

    async fn insert_transaction(
        &self,
        tx: PointLedgerTransaction,
    ) -> Result<PointLedgerTransaction, CoreError> {
        Self::trip(&self.fail_transactions, "transaction")?;
        self.inner.insert_transaction(tx).await
    }

    async fn transaction_for_session(
        &self,
        id: SessionId,
    ) -> Result<Option<PointLedgerTransaction>, CoreError> {
        self.inner.transaction_for_session(id).await
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PointLedgerTransaction>, CoreError> {
        self.inner.list_transactions(user_id).await
    }

    async fn list_unsynced_transactions(&self) -> Result<Vec<PointLedgerTransaction>, CoreError> {
        self.inner.list_unsynced_transactions().await
    }

    async fn mark_transaction_synced(&self, id: TransactionId) -> Result<(), CoreError> {
        self.inner.mark_transaction_synced(id).await
    }
}

#[async_trait]
impl LedgerBalance for FlakyStore {
    async fn wifi_points_on(
        &self,
        user_id: &UserId,
        day: NaiveDate,
        offset: FixedOffset,
    ) -> Result<u32, CoreError> {
        self.inner.wifi_points_on(user_id, day, offset).await
    }
}
