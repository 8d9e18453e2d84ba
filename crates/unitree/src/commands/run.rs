//! Drive the session engine from a JSON-lines signal feed.
//!
//! Each feed line carries the latest platform readings:
//!
//! ```json
//! {"at": "2026-03-02T09:00:00Z", "ip_address": "10.22.5.9",
//!  "location": {"latitude": 51.5, "longitude": -0.12}, "permission": "granted"}
//! ```
//!
//! Live mode keeps the engine's own ticker and treats lines as signal
//! updates. Replay mode ticks once per line at the line's `at` time. Either
//! way, end of feed disconnects the running session cleanly.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tracing::{debug, info, warn};

use unitree_core::{
    EndedSession, Engine, LocationSignal, ManualClock, PermissionState, SessionId, SessionPhase,
    SharedSignals, SignalSnapshot, SystemClock, Transition,
};

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;
use crate::output;

use super::{Context, sessions, util};

// ── Feed format ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FeedLine {
    #[serde(default)]
    at: Option<DateTime<Utc>>,
    #[serde(default)]
    ip_address: Option<String>,
    #[serde(default)]
    location: Option<FeedLocation>,
    #[serde(default = "granted")]
    permission: PermissionState,
    /// End the running session now (logout).
    #[serde(default)]
    disconnect: bool,
}

#[derive(Debug, Deserialize)]
struct FeedLocation {
    latitude: f64,
    longitude: f64,
    #[serde(default = "default_accuracy")]
    accuracy_meters: f64,
}

fn granted() -> PermissionState {
    PermissionState::Granted
}

fn default_accuracy() -> f64 {
    10.0
}

impl FeedLine {
    fn parse(line: usize, raw: &str) -> Result<Self, CliError> {
        serde_json::from_str(raw).map_err(|source| CliError::Feed { line, source })
    }

    fn snapshot(&self, sampled_at: DateTime<Utc>) -> SignalSnapshot {
        SignalSnapshot {
            ip_address: self.ip_address.clone(),
            location: self.location.as_ref().map(|l| LocationSignal {
                latitude: l.latitude,
                longitude: l.longitude,
                accuracy_meters: l.accuracy_meters,
                sampled_at,
            }),
            permission: self.permission,
        }
    }
}

type FeedLines = Lines<BufReader<Box<dyn AsyncRead + Unpin + Send>>>;

async fn open_feed(path: &Path) -> Result<FeedLines, CliError> {
    let reader: Box<dyn AsyncRead + Unpin + Send> = if path == Path::new("-") {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(tokio::fs::File::open(path).await?)
    };
    Ok(BufReader::new(reader).lines())
}

// ── Progress reporting ───────────────────────────────────────────────

/// Collects ended sessions and prints progress to stderr.
struct Progress {
    quiet: bool,
    color: bool,
    ended: Vec<EndedSession>,
}

impl Progress {
    fn new(global: &GlobalOpts) -> Self {
        Self {
            quiet: global.quiet,
            color: output::should_color(&global.color),
            ended: Vec::new(),
        }
    }

    fn note(&self, message: &str) {
        if !self.quiet {
            eprintln!("{message}");
        }
    }

    fn seen(&self, id: SessionId) -> bool {
        self.ended.iter().any(|e| e.session_id == id)
    }

    fn ended(&mut self, session: EndedSession) {
        if self.seen(session.session_id) {
            return;
        }
        let reason = util::fmt_opt(session.end_reason);
        let points = session
            .points_earned
            .map_or_else(|| "no points".into(), |p| format!("{p} points"));
        self.note(&format!(
            "{} session {} ({reason}): {}, {points}",
            output::phase_label(SessionPhase::Ended, self.color),
            util::short_id(session.session_id),
            util::fmt_duration(session.duration_seconds),
        ));
        self.ended.push(session);
    }

    fn transition(&mut self, transition: Transition) {
        match transition {
            Transition::Started(id) => self.note(&format!(
                "{} session {}",
                output::phase_label(SessionPhase::Active, self.color),
                util::short_id(id)
            )),
            Transition::Ended(session) => self.ended(session),
            Transition::SteppedDown { winner } => self.note(&format!(
                "stepped down: session {} holds this device",
                winner.map_or_else(|| "-".into(), util::short_id)
            )),
            Transition::Yielding(winner) => {
                debug!(%winner, "yielding to active holder");
            }
            Transition::Idle | Transition::Continued(_) => {}
        }
    }
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(ctx: &Context, args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let store = ctx.open_store().await?;
    let signals = SharedSignals::new();
    let mut progress = Progress::new(global);
    let mut lines = open_feed(&args.feed).await?;

    let engine = if args.replay {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = ctx.engine(&store, &signals, clock.clone(), !args.offline)?;
        for session in engine.recover().await? {
            progress.ended(session);
        }
        replay(&engine, &clock, &signals, &mut lines, &mut progress).await?;
        engine
    } else {
        let engine = ctx.engine(&store, &signals, Arc::new(SystemClock), !args.offline)?;
        for session in engine.recover().await? {
            progress.ended(session);
        }
        live(&engine, &signals, &mut lines, &mut progress).await?;
        engine
    };

    if let Some(session) = engine.disconnect().await {
        progress.ended(session);
    }

    if engine.has_remote() {
        match engine.sync_now().await {
            Ok(report) => info!(
                sessions = report.sessions_uploaded,
                transactions = report.transactions_uploaded,
                pending = report.pending,
                "final sync"
            ),
            Err(e) => warn!(error = %e, "final sync failed; records stay pending"),
        }
    }

    let pending = engine.status().pending_sync;
    if pending > 0 {
        progress.note(&format!("{pending} record(s) waiting to sync"));
    }

    let out = sessions::render_ended(&global.output, &progress.ended);
    output::print_output(&out, global.quiet);
    Ok(())
}

/// One tick per line, at the line's timestamp.
async fn replay(
    engine: &Engine,
    clock: &ManualClock,
    signals: &SharedSignals,
    lines: &mut FeedLines,
    progress: &mut Progress,
) -> Result<(), CliError> {
    let mut number = 0;
    while let Some(raw) = lines.next_line().await? {
        number += 1;
        if raw.trim().is_empty() {
            continue;
        }
        let line = FeedLine::parse(number, &raw)?;
        let at = line.at.ok_or_else(|| CliError::Validation {
            field: format!("feed line {number}"),
            reason: "replay lines need an `at` timestamp".into(),
        })?;
        clock.set(at);

        if line.disconnect {
            if let Some(session) = engine.disconnect().await {
                progress.ended(session);
            }
            continue;
        }

        signals.replace(line.snapshot(at));
        progress.transition(engine.tick().await);
    }
    Ok(())
}

/// Background ticker samples whatever the feed last reported.
async fn live(
    engine: &Engine,
    signals: &SharedSignals,
    lines: &mut FeedLines,
    progress: &mut Progress,
) -> Result<(), CliError> {
    let mut status = engine.subscribe_status();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    engine.start().await;

    let mut announced: Option<SessionId> = None;
    let mut number = 0;
    let result = loop {
        tokio::select! {
            line = lines.next_line() => {
                let raw = match line {
                    Ok(Some(raw)) => raw,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(CliError::Io(e)),
                };
                number += 1;
                if raw.trim().is_empty() {
                    continue;
                }
                let line = match FeedLine::parse(number, &raw) {
                    Ok(line) => line,
                    Err(e) => break Err(e),
                };
                if line.disconnect {
                    if let Some(session) = engine.disconnect().await {
                        progress.ended(session);
                    }
                } else {
                    signals.replace(line.snapshot(line.at.unwrap_or_else(Utc::now)));
                }
            }
            Some(current) = status.changed() => {
                if current.phase == SessionPhase::Active && current.session_id != announced {
                    announced = current.session_id;
                    if let Some(id) = announced {
                        progress.transition(Transition::Started(id));
                    }
                }
                if let Some(ref ended) = current.last_ended {
                    progress.ended(ended.clone());
                }
            }
            _ = &mut ctrl_c => {
                info!("interrupted");
                break Ok(());
            }
        }
    };

    engine.shutdown().await;
    result
}
