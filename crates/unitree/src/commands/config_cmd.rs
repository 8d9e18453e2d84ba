//! Config subcommand handlers.

use unitree_config::{CampusSection, Config, DeviceSection};

use crate::cli::{ConfigArgs, ConfigCommand, ConfigInitArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::util;

const REDACTED: &str = "********";

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = util::config_path(global);

    match args.command {
        ConfigCommand::Init(init) => {
            if path.exists() && !init.force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            let cfg = build_config(init)?;
            unitree_config::save_config(&cfg, &path)?;
            if !global.quiet {
                eprintln!("✓ Config written to {}", path.display());
            }
            Ok(())
        }

        ConfigCommand::Show => {
            let mut cfg = unitree_config::load_config_from(&path)?;
            if cfg.api.token.is_some() {
                cfg.api.token = Some(REDACTED.into());
            }
            let out = match global.output {
                OutputFormat::Table => toml::to_string_pretty(&cfg).map_err(|e| {
                    CliError::Internal(format!("failed to render config: {e}"))
                })?,
                _ => output::render_single(
                    &global.output,
                    &cfg,
                    |_| String::new(),
                    |_| path.display().to_string(),
                ),
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }
    }
}

/// Assemble and validate a config from `init` flags. The token goes to the
/// system keyring, or into the file when no keyring is available.
fn build_config(init: ConfigInitArgs) -> Result<Config, CliError> {
    let mut cfg = Config {
        device: DeviceSection {
            user_id: Some(init.user_id),
            device_id: Some(init.device_id),
        },
        campus: CampusSection {
            ip_prefix: init.ip_prefix,
            ip_match: init.ip_match,
            campuses: init.campuses,
        },
        ..Config::default()
    };
    if let Some(ppm) = init.points_per_minute {
        cfg.accrual.points_per_minute = ppm;
    }
    cfg.api.base_url = init.base_url;

    // Reject bad input before anything is written.
    cfg.to_engine_config()?;
    cfg.api_base_url()?;

    if let Some(token) = init.token {
        let user = cfg.device.user_id.clone().unwrap_or_default();
        match unitree_config::store_api_token(&user, &token) {
            Ok(()) => eprintln!("   ✓ API token stored in system keyring"),
            Err(e) => {
                tracing::warn!(error = %e, "keyring unavailable, saving token in config file");
                cfg.api.token = Some(token);
            }
        }
    }
    Ok(cfg)
}
