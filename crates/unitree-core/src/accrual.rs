// ── Point accrual ──
//
// Converts the validated duration of an ended session into at most one
// ledger transaction, clipped to the per-day cap.

use std::sync::Arc;

use chrono::{FixedOffset, Offset, Utc};
use tracing::{debug, info};

use crate::config::AccrualConfig;
use crate::error::CoreError;
use crate::model::{PointLedgerTransaction, WifiSession};
use crate::ports::LedgerBalance;
use crate::store::SessionStore;

/// What accrual decided for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccrualOutcome {
    /// Shorter than the minimum-duration floor. `points_earned` stays unset.
    BelowMinimum,
    /// Eligible, but the daily cap left nothing to award. `points_earned = 0`.
    Capped,
    /// A transaction was written (or already existed).
    Awarded(PointLedgerTransaction),
}

impl AccrualOutcome {
    /// The value to record as the session's `points_earned`.
    pub fn points_earned(&self) -> Option<u32> {
        match self {
            Self::BelowMinimum => None,
            Self::Capped => Some(0),
            Self::Awarded(tx) => Some(u32::try_from(tx.amount.max(0)).unwrap_or(u32::MAX)),
        }
    }

    pub fn transaction(&self) -> Option<&PointLedgerTransaction> {
        match self {
            Self::Awarded(tx) => Some(tx),
            _ => None,
        }
    }
}

/// `floor(seconds / 60 * points_per_minute)`, saturating at `u32::MAX`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::as_conversions
)]
pub fn raw_points(duration_seconds: i64, points_per_minute: f64) -> u32 {
    if duration_seconds <= 0 || !points_per_minute.is_finite() || points_per_minute <= 0.0 {
        return 0;
    }
    let points = (duration_seconds as f64 / 60.0 * points_per_minute).floor();
    if points >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        points as u32
    }
}

/// Points a session of `elapsed_seconds` would earn, ignoring what was
/// already earned today. Used for the live status display.
pub fn estimate_points(elapsed_seconds: i64, config: &AccrualConfig) -> u32 {
    if elapsed_seconds < i64::from(config.min_session_minutes) * 60 {
        return 0;
    }
    raw_points(elapsed_seconds, config.points_per_minute).min(config.daily_cap_points)
}

/// The fixed offset that delimits calendar days for the cap.
pub fn day_offset(config: &AccrualConfig) -> FixedOffset {
    config
        .day_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix())
}

/// Accrual engine bound to a store and a ledger-balance source.
#[derive(Clone)]
pub struct AccrualEngine {
    config: AccrualConfig,
    store: Arc<dyn SessionStore>,
    ledger: Arc<dyn LedgerBalance>,
}

impl AccrualEngine {
    pub fn new(
        config: AccrualConfig,
        store: Arc<dyn SessionStore>,
        ledger: Arc<dyn LedgerBalance>,
    ) -> Self {
        Self {
            config,
            store,
            ledger,
        }
    }

    pub fn config(&self) -> &AccrualConfig {
        &self.config
    }

    /// Accrue points for an ended session.
    ///
    /// Safe to call any number of times for the same session: an existing
    /// transaction for it is returned as-is, and a session already recorded
    /// as capped stays capped. The transaction is dated at the session's
    /// `end_time`, which is also the day the cap is checked against.
    pub async fn accrue(&self, session: &WifiSession) -> Result<AccrualOutcome, CoreError> {
        let Some(end_time) = session.end_time else {
            return Err(CoreError::Internal(format!(
                "cannot accrue active session {}",
                session.id
            )));
        };

        if let Some(existing) = self.store.transaction_for_session(session.id).await? {
            debug!(session_id = %session.id, tx_id = %existing.id, "accrual already recorded");
            return Ok(AccrualOutcome::Awarded(existing));
        }
        if session.points_earned == Some(0) {
            return Ok(AccrualOutcome::Capped);
        }

        let duration = session
            .duration_seconds
            .unwrap_or_else(|| (end_time - session.start_time).num_seconds())
            .max(0);
        let floor = i64::from(self.config.min_session_minutes) * 60;
        if duration < floor {
            debug!(session_id = %session.id, duration, floor, "below minimum duration");
            return Ok(AccrualOutcome::BelowMinimum);
        }

        let raw = raw_points(duration, self.config.points_per_minute);
        let offset = day_offset(&self.config);
        let day = end_time.with_timezone(&offset).date_naive();
        let earned_today = self
            .ledger
            .wifi_points_on(&session.user_id, day, offset)
            .await?;
        let remaining = self.config.daily_cap_points.saturating_sub(earned_today);
        let awarded = raw.min(remaining);

        if awarded == 0 {
            info!(
                session_id = %session.id,
                raw,
                earned_today,
                cap = self.config.daily_cap_points,
                "daily cap reached, nothing awarded"
            );
            return Ok(AccrualOutcome::Capped);
        }

        let tx = PointLedgerTransaction::wifi_session(
            session.user_id.clone(),
            session.id,
            awarded,
            end_time,
        );
        let tx = self.store.insert_transaction(tx).await?;
        info!(
            session_id = %session.id,
            tx_id = %tx.id,
            raw,
            awarded = tx.amount,
            earned_today,
            %day,
            "points accrued"
        );
        Ok(AccrualOutcome::Awarded(tx))
    }
}
