// QuickCapture - capture-anywhere triggers with autonomous follow-up actions
// Entry point: wires the terminal input source to the capture pipeline

use anyhow::Context;
use quickcapture::app::AppState;
use quickcapture::capture::StdinInputSource;
use quickcapture::config::{DATA_DIR_ENV, DEFAULT_DATA_DIR};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quickcapture=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting QuickCapture");

    let data_dir = std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

    let state = AppState::initialize(data_dir.clone())
        .await
        .with_context(|| format!("failed to initialize data directory {:?}", data_dir))?;

    let backlog = state.process_backlog().await?;
    if backlog.enqueued > 0 {
        tracing::info!("Queued {} unprocessed entries from a previous session", backlog.enqueued);
    }

    state
        .start_capture(&StdinInputSource::new())
        .await
        .context("failed to start capture")?;
    tracing::info!("Type a trigger (default '///' or ',,,') followed by text; Ctrl+C to quit");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    state.shutdown().await;

    let stats = state.stats().await;
    tracing::info!(
        processed = stats.total_processed,
        failures = stats.total_failures,
        total_cost = stats.total_cost,
        "Session summary"
    );

    Ok(())
}
