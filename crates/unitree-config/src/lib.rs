//! Shared configuration for the UniTree CLI.
//!
//! TOML config, API token resolution (env + keyring + plaintext), and
//! translation to `unitree_core::EngineConfig`. Core never reads files or
//! environment variables itself; it receives a pre-built `EngineConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use unitree_core::{
    AccrualConfig, Campus, EngineConfig, IpMatchMode, RetryPolicy, SessionTiming, ValidationConfig,
};

/// Keyring service name under which API tokens are stored.
pub const KEYRING_SERVICE: &str = "unitree";

/// Default environment variable consulted for the API token.
pub const DEFAULT_TOKEN_ENV: &str = "UNITREE_API_TOKEN";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("missing required setting '{field}'")]
    Missing { field: String },

    #[error("no API token configured for user '{user}'")]
    NoCredentials { user: String },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceSection,

    #[serde(default)]
    pub campus: CampusSection,

    #[serde(default)]
    pub accrual: AccrualConfig,

    #[serde(default)]
    pub session: SessionSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub api: ApiSection,
}

/// Who this installation accrues points for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceSection {
    pub user_id: Option<String>,
    pub device_id: Option<String>,
}

/// Campus network and geofences.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CampusSection {
    /// Campus IP prefix (e.g. "10.22") or CIDR when `ip_match = "cidr"`.
    #[serde(default)]
    pub ip_prefix: String,

    #[serde(default)]
    pub ip_match: IpMatchMode,

    #[serde(default)]
    pub campuses: Vec<Campus>,
}

/// Tick and persistence cadence, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionSection {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    #[serde(default = "default_sample_timeout_secs")]
    pub sample_timeout_secs: u64,

    /// 0 disables background sync.
    #[serde(default = "default_sync_secs")]
    pub sync_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            stale_after_secs: default_stale_after_secs(),
            sample_timeout_secs: default_sample_timeout_secs(),
            sync_secs: default_sync_secs(),
        }
    }
}

fn default_tick_secs() -> u64 {
    30
}
fn default_heartbeat_secs() -> u64 {
    60
}
fn default_stale_after_secs() -> u64 {
    300
}
fn default_sample_timeout_secs() -> u64 {
    10
}
fn default_sync_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StorageSection {
    /// Local session store. Defaults to `state.json` in the data directory.
    pub state_file: Option<PathBuf>,
}

/// Backend connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiSection {
    /// Backend base URL (e.g., "https://api.unitree.example").
    pub base_url: Option<String>,

    /// API token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the API token.
    pub token_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            token_env: None,
            ca_cert: None,
            timeout: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "unitree", "unitree")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location of the local session store.
pub fn default_state_file() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("state.json"),
        |dirs| dirs.data_dir().join("state.json"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("unitree");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment keys use `__` between section and field, e.g.
/// `UNITREE_DEVICE__USER_ID` or `UNITREE_CAMPUS__IP_PREFIX`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("UNITREE_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`, creating parent dirs.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation to core ─────────────────────────────────────────────

impl Config {
    /// The state file to open: configured path or the platform default.
    pub fn state_file(&self) -> PathBuf {
        self.storage
            .state_file
            .clone()
            .unwrap_or_else(default_state_file)
    }

    /// Only the campus rules, for one-shot validation without a device.
    pub fn validation_config(&self) -> Result<ValidationConfig, ConfigError> {
        let campus = &self.campus;
        if campus.ip_prefix.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "campus.ip_prefix".into(),
            });
        }
        if campus.ip_match == IpMatchMode::Cidr && !campus.ip_prefix.contains('/') {
            return Err(ConfigError::invalid(
                "campus.ip_prefix",
                format!("'{}' is not CIDR notation", campus.ip_prefix),
            ));
        }
        for c in &campus.campuses {
            validate_campus(c)?;
        }
        Ok(ValidationConfig {
            ip_prefix: campus.ip_prefix.trim().to_owned(),
            ip_match: campus.ip_match,
            campuses: campus.campuses.clone(),
        })
    }

    /// Build a full `EngineConfig`. Requires user, device, and campus rules.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let user_id = required(self.device.user_id.as_deref(), "device.user_id")?;
        let device_id = required(self.device.device_id.as_deref(), "device.device_id")?;
        let validation = self.validation_config()?;

        let accrual = &self.accrual;
        if !accrual.points_per_minute.is_finite() || accrual.points_per_minute <= 0.0 {
            return Err(ConfigError::invalid(
                "accrual.points_per_minute",
                "must be a positive number",
            ));
        }

        let session = &self.session;
        for (field, value) in [
            ("session.tick_secs", session.tick_secs),
            ("session.heartbeat_secs", session.heartbeat_secs),
            ("session.stale_after_secs", session.stale_after_secs),
            ("session.sample_timeout_secs", session.sample_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        if session.stale_after_secs <= session.tick_secs {
            return Err(ConfigError::invalid(
                "session.stale_after_secs",
                "must be longer than session.tick_secs",
            ));
        }

        let mut config = EngineConfig::new(user_id, device_id);
        config.validation = validation;
        config.accrual = accrual.clone();
        config.timing = SessionTiming {
            tick_interval: Duration::from_secs(session.tick_secs),
            heartbeat_interval: Duration::from_secs(session.heartbeat_secs),
            stale_after: Duration::from_secs(session.stale_after_secs),
            sample_timeout: Duration::from_secs(session.sample_timeout_secs),
            sync_interval: Duration::from_secs(session.sync_secs),
        };
        config.retry = RetryPolicy::default();
        Ok(config)
    }

    /// Validated backend base URL, or `None` when no backend is configured.
    pub fn api_base_url(&self) -> Result<Option<url::Url>, ConfigError> {
        let Some(raw) = self.api.base_url.as_deref() else {
            return Ok(None);
        };
        let url: url::Url = raw
            .parse()
            .map_err(|_| ConfigError::invalid("api.base_url", format!("invalid URL: {raw}")))?;
        Ok(Some(url))
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout)
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, ConfigError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::Missing {
            field: field.into(),
        }),
    }
}

fn validate_campus(campus: &Campus) -> Result<(), ConfigError> {
    let field = format!("campus '{}'", campus.name);
    if !(-90.0..=90.0).contains(&campus.latitude) {
        return Err(ConfigError::invalid(&field, "latitude out of range"));
    }
    if !(-180.0..=180.0).contains(&campus.longitude) {
        return Err(ConfigError::invalid(&field, "longitude out of range"));
    }
    if !campus.radius_meters.is_finite() || campus.radius_meters <= 0.0 {
        return Err(ConfigError::invalid(&field, "radius must be positive"));
    }
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_account(user_id: &str) -> String {
    format!("{user_id}/api-token")
}

/// Resolve the API token: env var, then system keyring, then plaintext.
pub fn resolve_api_token(cfg: &Config) -> Result<SecretString, ConfigError> {
    let user = cfg.device.user_id.clone().unwrap_or_default();

    // 1. Env var (configured name or the default)
    let env_name = cfg.api.token_env.as_deref().unwrap_or(DEFAULT_TOKEN_ENV);
    if let Ok(val) = std::env::var(env_name) {
        if !val.is_empty() {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if !user.is_empty() {
        if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &keyring_account(&user)) {
            if let Ok(secret) = entry.get_password() {
                return Ok(SecretString::from(secret));
            }
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = cfg.api.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials { user })
}

/// Store the API token for `user_id` in the system keyring.
pub fn store_api_token(user_id: &str, token: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_account(user_id))
        .map_err(|e| ConfigError::Keyring(e.to_string()))?;
    entry
        .set_password(token)
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}
