use std::sync::Arc;

use broadcast_control::config::OrchestratorConfig;
use broadcast_control::logging::init_logging;
use broadcast_control::media::{InMemoryScheduleStore, NoOpMediaControl};
use broadcast_control::Orchestrator;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (.env is honoured)
    let config = OrchestratorConfig::from_env()?;

    // Initialize logging; the guard flushes the file writer on exit
    let (logging, _guard) = init_logging(&config.log_dir)?;
    logging.apply_configured_filter(&config);

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(NoOpMediaControl),
        Arc::new(InMemoryScheduleStore::new()),
    )?;
    logging.start_retention_cleanup(orchestrator.cancellation_token());

    orchestrator.start()?;
    info!("broadcast-control running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }

    orchestrator.shutdown().await?;
    Ok(())
}
