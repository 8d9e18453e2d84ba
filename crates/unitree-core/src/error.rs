// ── Core error types ──
//
// Errors raised by the engine's collaborators. None of these reach UI code
// from the tick loop: the loop logs them and heals on the next tick. They
// surface only from explicit one-shot calls (recovery, sync, store access).
// The `From<unitree_api::Error>` impl translates transport-layer errors.

use thiserror::Error;

use crate::model::SessionId;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Signal errors ────────────────────────────────────────────────
    #[error("Network signal unavailable: {reason}")]
    SignalUnavailable { reason: String },

    // ── Storage errors ───────────────────────────────────────────────
    #[error("Storage failure: {message}")]
    Storage { message: String },

    #[error("Session not found: {id}")]
    SessionNotFound { id: SessionId },

    #[error("Session {id} already ended; only the synced flag may change")]
    SessionImmutable { id: SessionId },

    // ── Ledger / sync errors ─────────────────────────────────────────
    #[error("Ledger balance unavailable: {message}")]
    LedgerUnavailable { message: String },

    #[error("Remote sync failed: {message}")]
    Sync {
        message: String,
        /// `true` when retrying later may succeed.
        transient: bool,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::storage(format!("corrupt state file: {err}"))
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<unitree_api::Error> for CoreError {
    fn from(err: unitree_api::Error) -> Self {
        let transient = err.is_transient();
        match err {
            unitree_api::Error::InvalidToken => CoreError::Sync {
                message: "backend rejected the API token".into(),
                transient: false,
            },
            unitree_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            unitree_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            unitree_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            other => CoreError::Sync {
                message: other.to_string(),
                transient,
            },
        }
    }
}
