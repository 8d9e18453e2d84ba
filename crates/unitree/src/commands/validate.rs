//! One-shot dual-factor check against the configured campus rules.

use chrono::Utc;
use serde::Serialize;

use unitree_core::{LocationSignal, NetworkSignal, ValidationResult, validate};

use crate::cli::{GlobalOpts, ValidateArgs};
use crate::error::CliError;
use crate::output;

use super::Context;

#[derive(Serialize)]
struct ValidationView {
    valid: bool,
    #[serde(flatten)]
    result: ValidationResult,
}

pub fn handle(ctx: &Context, args: &ValidateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let rules = ctx.config.validation_config()?;
    let now = Utc::now();

    let signal = NetworkSignal {
        ip_address: args.ip.clone(),
        sampled_at: now,
    };
    let location = match (args.lat, args.lng) {
        (Some(latitude), Some(longitude)) => Some(LocationSignal {
            latitude,
            longitude,
            accuracy_meters: args.accuracy,
            sampled_at: now,
        }),
        _ => None,
    };

    let result = validate(&signal, location.as_ref(), &rules);
    tracing::info!(
        ip_valid = result.ip_valid,
        location = %result.location,
        distance_m = ?result.distance_meters,
        "validated"
    );

    let view = ValidationView {
        valid: result.is_valid(),
        result,
    };
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &view,
        |v| {
            output::detail_lines(&[
                ("Valid", output::check_mark(v.valid, color)),
                ("IP", output::check_mark(v.result.ip_valid, color)),
                ("Location", v.result.location.to_string()),
                ("Campus", v.result.campus_name.clone().unwrap_or_else(|| "-".into())),
                (
                    "Distance",
                    v.result
                        .distance_meters
                        .map_or_else(|| "-".into(), |d| format!("{d:.0} m")),
                ),
            ])
        },
        |v| String::from(if v.valid { "valid" } else { "invalid" }),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
