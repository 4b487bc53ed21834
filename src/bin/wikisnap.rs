use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use wikisnap::{config::Config, pipeline::Pipeline};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        "Archiving {} into {}",
        config.profile().base_url,
        config.output_dir().display()
    );

    let pipeline = Arc::new(Pipeline::new(&config).context("Failed to set up pipeline")?);
    let pages = pipeline
        .fetch_page_list()
        .await
        .context("Failed to acquire page list")?;

    // Spawn shutdown handler
    let cancel = CancellationToken::new();
    let shutdown_token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal, finishing pages in progress...");
        shutdown_token.cancel();
    });

    let report = pipeline.run(pages, cancel).await?;

    info!(
        "Done: {} archived, {} already archived, {} failed",
        report.archived.len(),
        report.already_archived.len(),
        report.failed.len()
    );
    if report.asset_failures > 0 {
        warn!("{} images kept their remote URL", report.asset_failures);
    }
    if report.not_started > 0 {
        warn!("{} pages not started", report.not_started);
    }
    for (id, labels) in &report.missing_labels {
        warn!("{}: no table for {}", id, labels.join(", "));
    }
    for failed in &report.failed {
        warn!("{}: {} - {}", failed.id, failed.title, failed.failure);
    }

    Ok(())
}
