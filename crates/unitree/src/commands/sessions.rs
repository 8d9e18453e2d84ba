//! Session listing.

use tabled::Tabled;

use unitree_core::{EndedSession, SessionStore, UserId, WifiSession};

use crate::cli::{GlobalOpts, OutputFormat, SessionsArgs};
use crate::error::CliError;
use crate::output;

use super::{Context, util};

// ── Table rows ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Ended")]
    ended: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Points")]
    points: String,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Synced")]
    synced: String,
}

impl From<&WifiSession> for SessionRow {
    fn from(s: &WifiSession) -> Self {
        Self {
            id: util::short_id(s.id),
            device: s.device_id.to_string(),
            started: util::fmt_time(s.start_time),
            ended: if s.is_active {
                "active".into()
            } else {
                util::fmt_opt_time(s.end_time)
            },
            duration: s
                .duration_seconds
                .map_or_else(|| "-".into(), util::fmt_duration),
            points: util::fmt_opt(s.points_earned),
            reason: util::fmt_opt(s.end_reason),
            synced: if s.synced { "yes" } else { "no" }.into(),
        }
    }
}

#[derive(Tabled)]
struct EndedRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Ended")]
    ended: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Points")]
    points: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl From<&EndedSession> for EndedRow {
    fn from(s: &EndedSession) -> Self {
        Self {
            id: util::short_id(s.session_id),
            started: util::fmt_time(s.start_time),
            ended: util::fmt_time(s.end_time),
            duration: util::fmt_duration(s.duration_seconds),
            points: util::fmt_opt(s.points_earned),
            reason: util::fmt_opt(s.end_reason),
        }
    }
}

/// Render sessions closed by a run or a recovery.
pub fn render_ended(format: &OutputFormat, sessions: &[EndedSession]) -> String {
    if sessions.is_empty() && matches!(format, OutputFormat::Table) {
        return String::new();
    }
    output::render_list(format, sessions, |s| EndedRow::from(s), |s| {
        s.session_id.to_string()
    })
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(
    ctx: &Context,
    args: &SessionsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let user = ctx
        .config
        .device
        .user_id
        .clone()
        .ok_or_else(|| CliError::MissingSetting {
            field: "device.user_id".into(),
            path: ctx.config_path.display().to_string(),
        })?;
    let store = ctx.open_store().await?;

    let sessions: Vec<WifiSession> = store
        .list_sessions(&UserId::new(user))
        .await?
        .into_iter()
        .filter(|s| !args.unsynced || !s.synced)
        .take(args.limit)
        .collect();

    if sessions.is_empty() && matches!(global.output, OutputFormat::Table) {
        if !global.quiet {
            eprintln!("No sessions recorded yet.");
        }
        return Ok(());
    }

    let out = output::render_list(&global.output, &sessions, |s| SessionRow::from(s), |s| {
        s.id.to_string()
    });
    output::print_output(&out, global.quiet);
    Ok(())
}
