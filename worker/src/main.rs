//! Unblink Worker – registers with the relay, receives frame batches,
//! describes them with a vision-language model and reports the result.

mod batch;
mod credentials;
mod emit;
mod error;
mod fetch;
mod model;
mod pipeline;
mod session;
mod supervisor;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use unblink_common::config::{self, Config};

use crate::batch::BatchProcessor;
use crate::emit::Emitter;
use crate::fetch::FrameFetcher;
use crate::model::OpenAiVisionModel;
use crate::pipeline::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── load config ──────────────────────────────────────────────────
    let config = match std::env::args().nth(1) {
        Some(path) => config::load(&PathBuf::from(&path)).context("Config load failed")?,
        None => {
            let default = PathBuf::from(Config::default_path());
            if default.exists() {
                config::load(&default).context("Config load failed")?
            } else {
                warn!("No config at {} – using defaults", default.display());
                Config::default()
            }
        }
    };

    info!(
        "Unblink Worker starting (relay={}, http={})",
        config.relay_ws_url, config.relay_http_url
    );

    // ── ctrl-c ───────────────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
        info!("Shutdown signal received");
    })
    .context("Cannot set Ctrl-C handler")?;

    // ── batch pipeline ───────────────────────────────────────────────
    let model = Arc::new(OpenAiVisionModel::new(&config)?);
    let processor = BatchProcessor::new(FrameFetcher::new(&config)?, model, &config);
    let pipeline = Pipeline::start(
        Arc::new(processor),
        Emitter::new(&config)?,
        config.batch_workers,
        config.queue_capacity,
    );
    info!(
        "{} batch worker(s), {} concurrent fetch(es) per batch",
        config.batch_workers, config.fetch_concurrency
    );

    // ── relay session(s) ─────────────────────────────────────────────
    let result = supervisor::supervise(&config, pipeline.sender(), &mut shutdown_rx).await;
    if let Err(e) = &result {
        tracing::error!("Relay session error: {e:#}");
    }

    // Finish batches already received before exiting.
    pipeline.shutdown().await;

    info!("Unblink Worker stopped");
    result
}
