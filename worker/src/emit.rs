//! Result submission: `POST {relay}/events` with the worker key.
//!
//! Runs as its own task draining the outbound queue, so a slow relay never
//! stalls batch processing.  Delivery failures are logged and not retried.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use tokio::sync::mpsc::Receiver;
use tracing::{error, info};

use unblink_common::config::Config;
use unblink_common::protocol::ResultSummary;

use crate::credentials::Credentials;
use crate::error::EmitError;
use crate::fetch::WORKER_KEY_HEADER;
use crate::pipeline::Outbound;

pub struct Emitter {
    client: reqwest::Client,
    base_url: String,
}

impl Emitter {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Cannot create HTTP client")?;
        Ok(Emitter {
            client,
            base_url: config.relay_http_url.clone(),
        })
    }

    /// Submit one result; anything but 200 is a delivery failure.
    pub async fn emit(
        &self,
        result: &ResultSummary,
        credentials: &Credentials,
    ) -> Result<(), EmitError> {
        let url = format!("{}/events", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header(WORKER_KEY_HEADER, credentials.key.expose())
            .json(result)
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            return Err(EmitError::Status(resp.status()));
        }
        Ok(())
    }
}

/// Run the emission loop until every sender is gone.
pub async fn handle_queue(mut rx: Receiver<Outbound>, emitter: Emitter) {
    while let Some(Outbound {
        result,
        credentials,
    }) = rx.recv().await
    {
        match emitter.emit(&result, &credentials).await {
            Ok(()) => info!(
                "Event emitted for {} ({} frames): {}",
                result.service_id, result.frame_count, result.summary
            ),
            Err(e) => error!("Emit failed for {}: {e}", result.service_id),
        }
    }
    info!("Emitter finished");
}
