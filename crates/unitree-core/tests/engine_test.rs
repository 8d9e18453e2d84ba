#![allow(clippy::unwrap_used)]
// Engine tests: real validator and signal sampling over `SharedSignals`.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;

use common::{USER, engine_config, t0};
use unitree_core::{
    CoreError, Engine, LocationCheck, LocationSignal, ManualClock, MemoryStore, NetworkProbe,
    PermissionState, PointLedgerTransaction, RemoteSync, SessionId, SessionPhase, SessionStore,
    SharedSignals, Transition, WifiSession,
};

// ~50 m north of the configured campus center.
fn on_campus_fix() -> LocationSignal {
    LocationSignal {
        latitude: 51.50045,
        longitude: -0.1200,
        accuracy_meters: 10.0,
        sampled_at: t0(),
    }
}

fn signals_on_campus() -> SharedSignals {
    let signals = SharedSignals::new();
    signals.set_ip(Some("10.22.5.9".into()));
    signals.set_location(Some(on_campus_fix()));
    signals.set_permission(PermissionState::Granted);
    signals
}

fn engine(
    signals: &SharedSignals,
    store: &Arc<MemoryStore>,
    clock: &Arc<ManualClock>,
) -> Engine {
    Engine::builder(engine_config())
        .network(Arc::new(signals.clone()))
        .location(Arc::new(signals.clone()))
        .permission(Arc::new(signals.clone()))
        .store(store.clone())
        .ledger(store.clone())
        .clock(clock.clone())
        .build()
        .unwrap()
}

#[derive(Default)]
struct RecordingRemote {
    sessions: Mutex<Vec<SessionId>>,
    transactions: Mutex<Vec<i64>>,
}

#[async_trait]
impl RemoteSync for RecordingRemote {
    async fn upload_session(&self, session: &WifiSession) -> Result<(), CoreError> {
        self.sessions.lock().unwrap().push(session.id);
        Ok(())
    }

    async fn upload_transaction(&self, tx: &PointLedgerTransaction) -> Result<(), CoreError> {
        self.transactions.lock().unwrap().push(tx.amount);
        Ok(())
    }
}

struct HangingProbe;

#[async_trait]
impl NetworkProbe for HangingProbe {
    async fn current_ip(&self) -> Result<String, CoreError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn ticks_start_and_end_a_session() {
    let signals = signals_on_campus();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = engine(&signals, &store, &clock);

    assert!(matches!(engine.tick().await, Transition::Started(_)));
    let result = engine.sample().await;
    assert_eq!(result.location, LocationCheck::Within);
    assert_eq!(result.campus_name.as_deref(), Some("Main"));

    for _ in 0..20 {
        clock.advance(Duration::seconds(30));
        assert!(matches!(engine.tick().await, Transition::Continued(_)));
    }
    assert_eq!(engine.status().phase, SessionPhase::Active);
    assert_eq!(engine.status().elapsed_seconds, 600);

    signals.set_location(None);
    clock.advance(Duration::seconds(30));
    let Transition::Ended(ended) = engine.tick().await else {
        panic!("expected session to end");
    };
    assert_eq!(ended.duration_seconds, 600);
    assert_eq!(ended.points_earned, Some(10));
}

#[tokio::test]
async fn denied_permission_skips_the_location_provider() {
    let signals = signals_on_campus();
    signals.set_permission(PermissionState::Denied);
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = engine(&signals, &store, &clock);

    let result = engine.sample().await;
    assert!(result.ip_valid);
    assert_eq!(result.location, LocationCheck::NoFix);
    assert_eq!(engine.tick().await, Transition::Idle);
    assert_eq!(store.session_count(), 0);
}

#[tokio::test]
async fn missing_ip_is_a_failed_check() {
    let signals = signals_on_campus();
    signals.set_ip(None);
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = engine(&signals, &store, &clock);

    let result = engine.sample().await;
    assert!(!result.is_valid());
    assert!(result.ip_address.is_none());
}

#[tokio::test(start_paused = true)]
async fn hung_network_probe_times_out() {
    let signals = signals_on_campus();
    let engine = Engine::builder(engine_config())
        .network(Arc::new(HangingProbe))
        .location(Arc::new(signals))
        .build()
        .unwrap();

    let result = engine.sample().await;
    assert!(!result.ip_valid);
    assert_eq!(engine.tick().await, Transition::Idle);
}

#[tokio::test]
async fn relaunch_recovers_before_starting() {
    let signals = signals_on_campus();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));

    let first_id = {
        let engine = engine(&signals, &store, &clock);
        let Transition::Started(id) = engine.tick().await else {
            panic!("expected session to start");
        };
        for _ in 0..8 {
            clock.advance(Duration::minutes(1));
            engine.tick().await;
        }
        id
    };

    clock.advance(Duration::hours(1));
    let relaunched = engine(&signals, &store, &clock);
    assert!(matches!(relaunched.tick().await, Transition::Started(_)));

    let old = store.get_session(first_id).await.unwrap().unwrap();
    assert_eq!(old.end_time, Some(t0() + Duration::minutes(8)));
    assert_eq!(old.points_earned, Some(8));
    let active = store
        .load_active(&USER.into(), &common::DEVICE.into())
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn sync_uploads_and_clears_pending() {
    let signals = signals_on_campus();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let remote = Arc::new(RecordingRemote::default());
    let engine = Engine::builder(engine_config())
        .network(Arc::new(signals.clone()))
        .location(Arc::new(signals.clone()))
        .store(store.clone())
        .ledger(store.clone())
        .remote(remote.clone())
        .clock(clock.clone())
        .build()
        .unwrap();

    engine.tick().await;
    for _ in 0..12 {
        clock.advance(Duration::minutes(1));
        engine.tick().await;
    }
    let ended = engine.disconnect().await.unwrap();
    assert_eq!(engine.status().pending_sync, 2);

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.sessions_uploaded, 1);
    assert_eq!(report.transactions_uploaded, 1);
    assert_eq!(engine.status().pending_sync, 0);
    assert_eq!(*remote.sessions.lock().unwrap(), vec![ended.session_id]);
    assert_eq!(*remote.transactions.lock().unwrap(), vec![12]);
}

#[tokio::test]
async fn sync_without_remote_is_a_config_error() {
    let signals = signals_on_campus();
    let engine = Engine::builder(engine_config())
        .network(Arc::new(signals.clone()))
        .location(Arc::new(signals))
        .build()
        .unwrap();
    assert!(matches!(engine.sync_now().await, Err(CoreError::Config { .. })));
}

#[tokio::test]
async fn builder_requires_signal_sources() {
    let result = Engine::builder(engine_config()).build();
    assert!(matches!(result, Err(CoreError::Config { .. })));
}

#[tokio::test]
async fn status_stream_reports_transitions() {
    let signals = signals_on_campus();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = engine(&signals, &store, &clock);
    let mut stream = engine.subscribe_status();
    assert_eq!(stream.current().phase, SessionPhase::Idle);

    engine.tick().await;
    let status = stream.changed().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Active);
    assert!(status.session_id.is_some());
}

#[tokio::test(start_paused = true)]
async fn background_ticker_drives_the_machine() {
    let signals = signals_on_campus();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = engine(&signals, &store, &clock);

    engine.start().await;
    tokio::time::sleep(StdDuration::from_millis(10)).await;
    assert_eq!(engine.status().phase, SessionPhase::Active);

    engine.shutdown().await;
    // Shutdown leaves the session for recovery.
    let sessions = store.list_sessions(&USER.into()).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].is_active);
}
