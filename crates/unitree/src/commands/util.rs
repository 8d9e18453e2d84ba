//! Shared helpers for command handlers.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use unitree_core::{CoreError, SessionId};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file in effect: `--config` / `UNITREE_CONFIG`, else the platform path.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(unitree_config::config_path)
}

/// Attach the state file path to storage failures.
pub fn storage_error(path: &Path, err: CoreError) -> CliError {
    match err {
        CoreError::Storage { message } => CliError::Storage {
            message,
            path: path.display().to_string(),
        },
        other => other.into(),
    }
}

/// First block of a session UUID, for tables.
pub fn short_id(id: SessionId) -> String {
    let full = id.to_string();
    full.split('-').next().unwrap_or(&full).to_owned()
}

pub fn fmt_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn fmt_opt_time(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "-".into(), fmt_time)
}

/// `1h 05m 09s` style duration.
pub fn fmt_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

pub fn fmt_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".into(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_are_compact() {
        assert_eq!(fmt_duration(9), "9s");
        assert_eq!(fmt_duration(2700), "45m 00s");
        assert_eq!(fmt_duration(3909), "1h 05m 09s");
        assert_eq!(fmt_duration(-3), "0s");
    }

    #[test]
    fn short_id_is_the_first_block() {
        let id = SessionId::new();
        let short = short_id(id);
        assert_eq!(short.len(), 8);
        assert!(id.to_string().starts_with(&short));
    }
}
