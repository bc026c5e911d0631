//! Authenticated frame retrieval from the relay.
//!
//! Each frame is an independent `GET {relay}/worker/frames/{uuid}`; a
//! failure drops that frame only.  Fetches for one batch run with bounded
//! concurrency and the successes are put back into request order before
//! anything downstream sees them.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use image::DynamicImage;
use reqwest::{StatusCode, Url};
use tracing::debug;

use unblink_common::config::Config;

use crate::credentials::WorkerKey;
use crate::error::FetchError;

/// Header carrying the worker key on every authenticated request.
pub const WORKER_KEY_HEADER: &str = "X-Worker-Key";

/// A fetched and decoded frame, owned by the batch that fetched it.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub frame_uuid: String,
    pub image: DynamicImage,
}

/// Per-batch fetch result, partitioned by outcome.
///
/// Both halves keep the frame's index in the original request.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Sorted by index.
    pub frames: Vec<(usize, DecodedFrame)>,
    pub failures: Vec<(usize, String, FetchError)>,
}

impl FetchOutcome {
    pub fn into_frames(self) -> Vec<DecodedFrame> {
        self.frames.into_iter().map(|(_, f)| f).collect()
    }
}

pub struct FrameFetcher {
    client: reqwest::Client,
    base_url: Url,
    concurrency: usize,
}

impl FrameFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Cannot create HTTP client")?;
        let base_url = Url::parse(&config.relay_http_url)
            .with_context(|| format!("Invalid relay URL: {}", config.relay_http_url))?;
        if base_url.cannot_be_a_base() {
            bail!("Relay URL cannot carry a path: {base_url}");
        }
        Ok(FrameFetcher {
            client,
            base_url,
            concurrency: config.fetch_concurrency.max(1),
        })
    }

    /// Raw encoded bytes of one frame.
    pub async fn fetch(&self, key: &WorkerKey, frame_uuid: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.frame_url(frame_uuid)?;
        let resp = self
            .client
            .get(url)
            .header(WORKER_KEY_HEADER, key.expose())
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            return Err(FetchError::Status(resp.status()));
        }

        let bytes = resp.bytes().await?;
        debug!("Fetched frame {frame_uuid} ({} bytes)", bytes.len());
        Ok(bytes.to_vec())
    }

    /// Fetch and decode one frame to an RGB raster.
    pub async fn fetch_decoded(
        &self,
        key: &WorkerKey,
        frame_uuid: &str,
    ) -> Result<DecodedFrame, FetchError> {
        let bytes = self.fetch(key, frame_uuid).await?;
        // Decoding is CPU-bound.
        let image = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes).map(|img| DynamicImage::ImageRgb8(img.into_rgb8()))
        })
        .await
        .map_err(|e| FetchError::Aborted(e.to_string()))??;
        Ok(DecodedFrame {
            frame_uuid: frame_uuid.to_string(),
            image,
        })
    }

    /// `{relay}/worker/frames/{uuid}` with the uuid as a single escaped segment.
    fn frame_url(&self, frame_uuid: &str) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["worker", "frames", frame_uuid]);
        Ok(url)
    }

    /// Fetch every frame of a batch, tolerating individual failures.
    pub async fn fetch_all(&self, key: &WorkerKey, frame_uuids: &[String]) -> FetchOutcome {
        // Collected first: a lazily mapped stream leaves the caller non-`Send`.
        let fetches: Vec<_> = frame_uuids
            .iter()
            .enumerate()
            .map(|(index, uuid)| self.fetch_decoded(key, uuid).map(move |r| (index, r)))
            .collect();
        let results: Vec<(usize, Result<DecodedFrame, FetchError>)> = stream::iter(fetches)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut outcome = FetchOutcome::default();
        for (index, result) in results {
            match result {
                Ok(frame) => outcome.frames.push((index, frame)),
                Err(e) => outcome.failures.push((index, frame_uuids[index].clone(), e)),
            }
        }
        outcome.frames.sort_by_key(|(index, _)| *index);
        outcome.failures.sort_by_key(|(index, _, _)| *index);
        outcome
    }
}
