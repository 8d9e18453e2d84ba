// unitree-api: Async Rust client for the UniTree backend (sessions + points ledger)

pub mod client;
pub mod error;
pub mod transport;
pub mod types;

pub use client::ApiClient;
pub use error::Error;
pub use transport::{TlsMode, TransportConfig};
pub use types::{SessionUpload, TransactionUpload, UploadAck, WifiPointsTotal};
