//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use unitree_config::ConfigError;
use unitree_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const STORAGE: i32 = 5;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Missing setting '{field}'")]
    #[diagnostic(
        code(unitree::missing_setting),
        help(
            "Create a config with: unitree config init --user-id ... --device-id ... --ip-prefix ...\n\
             Config path: {path}"
        )
    )]
    MissingSetting { field: String, path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(unitree::validation))]
    Validation { field: String, reason: String },

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(unitree::config_exists),
        help("Pass --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(unitree::config))]
    Config(Box<ConfigError>),

    // ── Backend ──────────────────────────────────────────────────────
    #[error("No backend configured")]
    #[diagnostic(
        code(unitree::no_backend),
        help("Set api.base_url in the config file, or UNITREE_API__BASE_URL.")
    )]
    NoBackend,

    #[error("No API token configured for user '{user}'")]
    #[diagnostic(
        code(unitree::no_credentials),
        help(
            "Store one with: unitree config init --token ...\n\
             Or set the UNITREE_API_TOKEN environment variable."
        )
    )]
    NoCredentials { user: String },

    #[error("Backend rejected the request: {message}")]
    #[diagnostic(
        code(unitree::sync_failed),
        help("Unsynced records stay in the state file and are retried on the next sync.")
    )]
    SyncFailed { message: String, transient: bool },

    // ── Local state ──────────────────────────────────────────────────
    #[error("Local state error: {message}")]
    #[diagnostic(
        code(unitree::storage),
        help("Check that the state file is readable and writable: {path}")
    )]
    Storage { message: String, path: String },

    #[error("Session {id} not found")]
    #[diagnostic(code(unitree::not_found), help("Run: unitree sessions"))]
    NotFound { id: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON on feed line {line}: {source}")]
    #[diagnostic(
        code(unitree::feed),
        help("Each feed line is a JSON object: {{\"ip_address\": ..., \"location\": ..., \"permission\": ...}}")
    )]
    Feed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Internal error: {0}")]
    #[diagnostic(code(unitree::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Storage { .. } => exit_code::STORAGE,
            Self::SyncFailed {
                transient: false, ..
            } => exit_code::AUTH,
            Self::SyncFailed { .. } | Self::NoBackend => exit_code::CONNECTION,
            Self::MissingSetting { .. }
            | Self::Validation { .. }
            | Self::ConfigExists { .. }
            | Self::Config(_)
            | Self::Feed { .. } => exit_code::USAGE,
            Self::Io(_) | Self::Internal(_) => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Missing { field } => CliError::MissingSetting {
                field,
                path: unitree_config::config_path().display().to_string(),
            },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { user } => CliError::NoCredentials { user },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Storage { message } => CliError::Storage {
                message,
                path: unitree_config::default_state_file().display().to_string(),
            },
            CoreError::SessionNotFound { id } => CliError::NotFound { id: id.to_string() },
            CoreError::Sync { message, transient } => CliError::SyncFailed { message, transient },
            CoreError::LedgerUnavailable { message } => CliError::SyncFailed {
                message,
                transient: true,
            },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            other @ (CoreError::SignalUnavailable { .. }
            | CoreError::SessionImmutable { .. }
            | CoreError::Internal(_)) => CliError::Internal(other.to_string()),
        }
    }
}

impl From<unitree_api::Error> for CliError {
    fn from(err: unitree_api::Error) -> Self {
        CoreError::from(err).into()
    }
}
