use serde::{Deserialize, Serialize};
use strum::Display;

/// Outcome of the location half of a validation.
///
/// `OutOfRange` and `NoFix` both fail the check, but they are different
/// facts: one is a device seen off campus, the other is a device we could
/// not place at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LocationCheck {
    /// Inside the radius of at least one campus.
    Within,
    /// A usable fix was available but no campus radius contains it.
    OutOfRange,
    /// No usable fix: permission denied, sampling timed out, or garbage coordinates.
    NoFix,
}

/// Result of the dual-factor check. Computed per tick, stored on the session
/// as `last_validation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// The address that was judged; `None` when the IP lookup failed.
    pub ip_address: Option<String>,
    pub ip_valid: bool,
    pub location_valid: bool,
    pub location: LocationCheck,
    /// Nearest matching campus, or nearest campus overall when none matched.
    pub campus_name: Option<String>,
    pub distance_meters: Option<f64>,
}

impl ValidationResult {
    /// Both factors passed. Never weakened to OR.
    pub fn is_valid(&self) -> bool {
        self.ip_valid && self.location_valid
    }

    /// The result for a tick where no network signal could be sampled.
    pub fn signal_unavailable() -> Self {
        Self {
            ip_address: None,
            ip_valid: false,
            location_valid: false,
            location: LocationCheck::NoFix,
            campus_name: None,
            distance_meters: None,
        }
    }
}
