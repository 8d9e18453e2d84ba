// ── Domain model ──
//
// Canonical types shared by the validator, the session state machine,
// the accrual engine, and the storage ports.

pub mod ids;
pub mod ledger;
pub mod session;
pub mod signal;
pub mod validation;

pub use ids::{DeviceId, SessionId, TransactionId, UserId};
pub use ledger::{PointLedgerTransaction, TransactionKind};
pub use session::{EndReason, WifiSession};
pub use signal::{LocationSignal, NetworkSignal, PermissionState};
pub use validation::{LocationCheck, ValidationResult};
