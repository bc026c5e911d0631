//! Full batch pipeline – from a `frame_batch` event to a result summary.
//!
//! fetch all frames → drop failures → temporal context → vision model →
//! [`ResultSummary`].  Frames live only for the duration of one call.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use unblink_common::config::Config;
use unblink_common::protocol::{FrameBatchEvent, ResultSummary};
use unblink_common::temporal::TemporalContext;

use crate::credentials::Credentials;
use crate::error::BatchError;
use crate::fetch::FrameFetcher;
use crate::model::{InferenceRequest, VisionModel};

pub struct BatchProcessor {
    fetcher: FrameFetcher,
    model: Arc<dyn VisionModel>,
    merge_size: usize,
    default_fps: f64,
    prompt: String,
}

impl BatchProcessor {
    pub fn new(fetcher: FrameFetcher, model: Arc<dyn VisionModel>, config: &Config) -> Self {
        BatchProcessor {
            fetcher,
            model,
            merge_size: config.merge_size.max(1),
            default_fps: config.default_fps,
            prompt: config.prompt.clone(),
        }
    }

    /// Process one batch.
    ///
    /// Fails with [`BatchError::EmptyBatch`] when no frame could be fetched;
    /// the model is not called in that case.
    pub async fn process(
        &self,
        event: &FrameBatchEvent,
        credentials: &Credentials,
    ) -> Result<ResultSummary, BatchError> {
        let service_id = &event.service_id;
        info!(
            "Processing batch: {} frames from {service_id}",
            event.frames.len()
        );

        // ── fetch ────────────────────────────────────────────────────────
        let outcome = self.fetcher.fetch_all(&credentials.key, &event.frames).await;
        for (index, uuid, e) in &outcome.failures {
            warn!("[{service_id}] Frame #{index} ({uuid}) dropped: {e}");
        }
        if outcome.frames.is_empty() {
            return Err(BatchError::EmptyBatch {
                requested: event.frames.len(),
            });
        }
        let frames = outcome.into_frames();
        let frame_count = frames.len();

        // ── temporal context ─────────────────────────────────────────────
        let meta = &event.metadata;
        let context = TemporalContext::build(meta, frame_count, self.merge_size, self.default_fps);
        if meta.start_time > 0.0 {
            info!(
                "[{service_id}] Using FPS={:.3} for {frame_count} frames from {:.1}s to {:.1}s",
                context.effective_fps,
                meta.start_time,
                meta.start_time + meta.duration_seconds
            );
        } else {
            info!(
                "[{service_id}] Using FPS={:.3} for {frame_count} frames over {:.1}s",
                context.effective_fps, meta.duration_seconds
            );
        }

        // ── inference ────────────────────────────────────────────────────
        let request = InferenceRequest {
            frames,
            prompt: format!("{}{}", context.preamble, self.prompt),
            context,
            merge_size: self.merge_size,
        };
        info!("[{service_id}] Running inference on {frame_count} frames");
        let output = self.model.describe(request).await?;

        Ok(ResultSummary {
            summary: format!("Video analysis: {output}"),
            service_id: service_id.clone(),
            frame_count,
            duration_seconds: meta.duration_seconds,
            created_at: Utc::now(),
        })
    }

    /// Like [`process`](Self::process), but logs the failure and returns `None`.
    pub async fn process_logged(
        &self,
        event: &FrameBatchEvent,
        credentials: &Credentials,
    ) -> Option<ResultSummary> {
        match self.process(event, credentials).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!("Batch from {} failed: {e}", event.service_id);
                None
            }
        }
    }
}
