//! Close sessions a previous process left active, accruing their points.

use std::sync::Arc;

use unitree_core::{SharedSignals, SystemClock};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::{Context, sessions};

pub async fn handle(ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    let store = ctx.open_store().await?;
    let engine = ctx.engine(&store, &SharedSignals::new(), Arc::new(SystemClock), false)?;

    let recovered = engine.recover().await?;
    tracing::info!(count = recovered.len(), "recovery finished");

    if recovered.is_empty() {
        if !global.quiet {
            eprintln!("No open sessions to recover.");
        }
        return Ok(());
    }

    let out = sessions::render_ended(&global.output, &recovered);
    output::print_output(&out, global.quiet);
    Ok(())
}
