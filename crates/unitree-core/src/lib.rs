// unitree-core: Dual-factor WiFi session validation, session state machine,
// and point accrual, between platform signals and the UniTree backend.

pub mod accrual;
pub mod config;
pub mod engine;
pub mod error;
pub mod machine;
pub mod model;
pub mod ports;
pub mod probe;
pub mod remote;
pub mod store;
pub mod stream;
pub mod sync;
pub mod validator;

// ── Primary re-exports ──────────────────────────────────────────────
pub use accrual::{AccrualEngine, AccrualOutcome};
pub use config::{
    AccrualConfig, Campus, EngineConfig, IpMatchMode, RetryPolicy, SessionTiming,
    ValidationConfig,
};
pub use engine::{Engine, EngineBuilder};
pub use error::CoreError;
pub use machine::{EndedSession, SessionMachine, SessionPhase, SessionStatus, Transition};
pub use ports::{
    Clock, LedgerBalance, LocationProvider, ManualClock, NetworkProbe, PermissionProvider,
    RemoteSync, SystemClock,
};
pub use probe::{SharedSignals, SignalSnapshot};
pub use remote::MergedLedger;
pub use store::{JsonFileStore, MemoryStore, SessionStore};
pub use stream::StatusStream;
pub use sync::SyncReport;
pub use validator::validate;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    DeviceId, EndReason, LocationCheck, LocationSignal, NetworkSignal, PermissionState,
    PointLedgerTransaction, SessionId, TransactionId, TransactionKind, UserId, ValidationResult,
    WifiSession,
};
