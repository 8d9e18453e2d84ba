//! One sync pass against the backend.

use unitree_core::sync::sync_pending;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::Context;

pub async fn handle(ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    let client = ctx.require_api_client()?;
    let store = ctx.open_store().await?;

    let report = sync_pending(store.as_ref(), &client).await?;

    let out = output::render_single(
        &global.output,
        &report,
        |r| {
            output::detail_lines(&[
                ("Sessions", r.sessions_uploaded.to_string()),
                ("Transactions", r.transactions_uploaded.to_string()),
                ("Failed", r.failed.to_string()),
                ("Pending", r.pending.to_string()),
            ])
        },
        |r| r.pending.to_string(),
    );
    output::print_output(&out, global.quiet);

    if report.failed > 0 {
        return Err(CliError::SyncFailed {
            message: format!("{} record(s) failed to upload", report.failed),
            transient: true,
        });
    }
    Ok(())
}
