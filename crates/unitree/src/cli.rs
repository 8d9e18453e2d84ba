//! Clap derive structures for the `unitree` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use unitree_core::{Campus, IpMatchMode};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// unitree -- campus WiFi sessions and point accrual
#[derive(Debug, Parser)]
#[command(
    name = "unitree",
    version,
    about = "Track campus WiFi sessions and earn UniTree points",
    long_about = "Validates campus presence (campus IP and geofence), runs the WiFi\n\
        session lifecycle against a local state file, and syncs sessions and\n\
        point transactions to the UniTree backend.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "UNITREE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Local state file (overrides storage.state_file)
    #[arg(long, env = "UNITREE_STATE_FILE", global = true)]
    pub state_file: Option<PathBuf>,

    /// User id (overrides device.user_id)
    #[arg(long, short = 'u', env = "UNITREE_USER", global = true)]
    pub user: Option<String>,

    /// Device id (overrides device.device_id)
    #[arg(long, short = 'd', env = "UNITREE_DEVICE", global = true)]
    pub device: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "UNITREE_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check an IP and optional location fix against the campus rules
    #[command(alias = "check")]
    Validate(ValidateArgs),

    /// Run the session engine from a signal feed
    Run(RunArgs),

    /// Close sessions a previous run left open
    Recover,

    /// Show the current session, today's points, and pending sync
    #[command(alias = "st")]
    Status,

    /// List stored sessions
    #[command(alias = "ls")]
    Sessions(SessionsArgs),

    /// Upload unsynced sessions and transactions to the backend
    Sync,

    /// Manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Validate ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Device IP address
    #[arg(long)]
    pub ip: String,

    /// Latitude of the location fix
    #[arg(long, requires = "lng", allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Longitude of the location fix
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lng: Option<f64>,

    /// Reported accuracy of the fix in meters
    #[arg(long, default_value = "10")]
    pub accuracy: f64,
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// JSON-lines signal feed ("-" for stdin)
    #[arg(long, short = 'f', default_value = "-")]
    pub feed: PathBuf,

    /// Replay mode: tick once per feed line at the line's `at` timestamp
    /// instead of sampling on the wall-clock ticker
    #[arg(long)]
    pub replay: bool,

    /// Skip background sync even when a backend is configured
    #[arg(long)]
    pub offline: bool,
}

// ── Sessions ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SessionsArgs {
    /// Max sessions to show, newest first
    #[arg(long, short = 'l', default_value = "25")]
    pub limit: usize,

    /// Only show sessions not yet uploaded
    #[arg(long)]
    pub unsynced: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a config file
    Init(ConfigInitArgs),

    /// Show the effective configuration
    Show,

    /// Print the config file path
    Path,
}

#[derive(Debug, Args)]
pub struct ConfigInitArgs {
    /// User id points accrue to
    #[arg(long)]
    pub user_id: String,

    /// This device's id
    #[arg(long)]
    pub device_id: String,

    /// Campus IP prefix (or CIDR with --ip-match cidr)
    #[arg(long)]
    pub ip_prefix: String,

    /// How the IP prefix is matched
    #[arg(long, default_value = "prefix")]
    pub ip_match: IpMatchMode,

    /// Campus geofence as NAME=LAT,LNG,RADIUS_METERS (repeatable)
    #[arg(long = "campus", value_parser = parse_campus, allow_hyphen_values = true)]
    pub campuses: Vec<Campus>,

    /// Points per validated minute
    #[arg(long)]
    pub points_per_minute: Option<f64>,

    /// Backend base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// API token, stored in the system keyring
    #[arg(long, env = "UNITREE_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

fn parse_campus(raw: &str) -> Result<Campus, String> {
    let (name, coords) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=LAT,LNG,RADIUS, got '{raw}'"))?;
    let parts: Vec<f64> = coords
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid number in '{coords}': {e}"))?;
    let [latitude, longitude, radius_meters] = parts[..] else {
        return Err(format!("expected three numbers after '=', got '{coords}'"));
    };
    if name.trim().is_empty() {
        return Err("campus name cannot be empty".into());
    }
    Ok(Campus {
        name: name.trim().to_owned(),
        latitude,
        longitude,
        radius_meters,
    })
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
