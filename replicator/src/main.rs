use etl_telemetry::init_tracing;

use crate::core::start_replicator;

mod config;
mod core;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_name = env!("CARGO_BIN_NAME");

    // Buffered log lines are flushed when the flusher is dropped at the end of main.
    let _log_flusher = init_tracing(app_name)?;

    start_replicator().await?;

    Ok(())
}
