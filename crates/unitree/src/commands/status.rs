//! Session status from the local store: open session, today's points,
//! and how much is waiting to sync.

use chrono::{DateTime, Utc};
use serde::Serialize;

use unitree_core::accrual::{day_offset, estimate_points};
use unitree_core::{LedgerBalance, SessionId, SessionPhase, SessionStore};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::{Context, util};

#[derive(Serialize)]
struct StatusView {
    user_id: String,
    device_id: String,
    phase: SessionPhase,
    session_id: Option<SessionId>,
    started_at: Option<DateTime<Utc>>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    elapsed_seconds: i64,
    estimated_points: u32,
    points_today: u32,
    daily_cap_points: u32,
    pending_sync: usize,
    state_file: String,
}

pub async fn handle(ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    let config = ctx.engine_config()?;
    let store = ctx.open_store().await?;
    let now = Utc::now();

    // Newest heartbeat first; anything else is cleaned up on the next run.
    let active = store
        .load_active(&config.user_id, &config.device_id)
        .await?
        .into_iter()
        .next();

    let offset = day_offset(&config.accrual);
    let today = now.with_timezone(&offset).date_naive();
    let points_today = store
        .wifi_points_on(&config.user_id, today, offset)
        .await?;

    let pending_sync = store.list_unsynced_sessions().await?.len()
        + store.list_unsynced_transactions().await?.len();

    let elapsed_seconds = active
        .as_ref()
        .map_or(0, |s| (s.last_heartbeat_at - s.start_time).num_seconds().max(0));

    let view = StatusView {
        user_id: config.user_id.to_string(),
        device_id: config.device_id.to_string(),
        phase: if active.is_some() {
            SessionPhase::Active
        } else {
            SessionPhase::Idle
        },
        session_id: active.as_ref().map(|s| s.id),
        started_at: active.as_ref().map(|s| s.start_time),
        last_heartbeat_at: active.as_ref().map(|s| s.last_heartbeat_at),
        elapsed_seconds,
        estimated_points: estimate_points(elapsed_seconds, &config.accrual),
        points_today,
        daily_cap_points: config.accrual.daily_cap_points,
        pending_sync,
        state_file: ctx.state_file().display().to_string(),
    };

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &view,
        |v| {
            output::detail_lines(&[
                ("User", v.user_id.clone()),
                ("Device", v.device_id.clone()),
                ("Phase", output::phase_label(v.phase, color)),
                ("Session", v.session_id.map_or_else(|| "-".into(), util::short_id)),
                ("Started", util::fmt_opt_time(v.started_at)),
                ("Heartbeat", util::fmt_opt_time(v.last_heartbeat_at)),
                ("Elapsed", util::fmt_duration(v.elapsed_seconds)),
                ("Estimate", format!("{} points", v.estimated_points)),
                (
                    "Today",
                    format!("{} / {} points", v.points_today, v.daily_cap_points),
                ),
                ("Pending sync", v.pending_sync.to_string()),
            ])
        },
        |v| v.phase.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
