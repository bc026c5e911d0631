//! Vision-language inference capability.
//!
//! The batch pipeline only knows the [`VisionModel`] trait: frames plus a
//! temporal context and prompt in, one text description out.  The shipped
//! implementation talks to any OpenAI-compatible chat-completions server
//! (vLLM, llama.cpp, a hosted API) with the frames embedded as JPEG data
//! URLs, each merge group preceded by its timestamp.

use std::io::Cursor;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use unblink_common::config::Config;
use unblink_common::temporal::TemporalContext;

use crate::error::InferenceError;
use crate::fetch::DecodedFrame;

const JPEG_QUALITY: u8 = 85;

/// Input to one inference call.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Frames in capture order.
    pub frames: Vec<DecodedFrame>,
    pub context: TemporalContext,
    /// Frames per entry of `context.timestamps`.
    pub merge_size: usize,
    /// Temporal preamble followed by the instruction.
    pub prompt: String,
}

/// Produces a description of a frame sequence.
///
/// Implementations may take a long time; callers await the result before
/// moving on to the next step of the batch.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe(&self, request: InferenceRequest) -> Result<String, InferenceError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiVisionModel {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    max_frame_edge: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiVisionModel {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.vlm_timeout_secs))
            .build()
            .context("Cannot create model HTTP client")?;

        info!(
            "Vision model: {} at {} (max_tokens={}, max_edge={}px)",
            config.vlm_model, config.vlm_base_url, config.vlm_max_tokens, config.max_frame_edge
        );

        Ok(OpenAiVisionModel {
            client,
            base_url: config.vlm_base_url.clone(),
            api_key: config.vlm_api_key.clone(),
            model: config.vlm_model.clone(),
            max_tokens: config.vlm_max_tokens,
            max_frame_edge: config.max_frame_edge,
        })
    }
}

#[async_trait]
impl VisionModel for OpenAiVisionModel {
    async fn describe(&self, request: InferenceRequest) -> Result<String, InferenceError> {
        let max_edge = self.max_frame_edge;
        // Resizing and JPEG encoding are CPU-bound.
        let content = tokio::task::spawn_blocking(move || build_content(&request, max_edge))
            .await
            .map_err(|e| InferenceError::Aborted(e.to_string()))??;

        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{"role": "user", "content": content}],
        });

        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        debug!("POST {url}");
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::Status { status, body });
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(InferenceError::EmptyResponse)
    }
}

/// Chat content parts: per merge group a timestamp marker, then its frames,
/// and the prompt last.
fn build_content(request: &InferenceRequest, max_edge: u32) -> Result<Vec<Value>, InferenceError> {
    let merge_size = request.merge_size.max(1);
    let mut parts = Vec::with_capacity(request.frames.len() + request.context.timestamps.len() + 1);

    for (i, frame) in request.frames.iter().enumerate() {
        if i % merge_size == 0 {
            if let Some(ts) = request.context.timestamps.get(i / merge_size) {
                parts.push(json!({"type": "text", "text": format!("<{ts:.1} seconds>")}));
            }
        }
        let jpeg = encode_jpeg(&fit_within(&frame.image, max_edge))?;
        let data_url = format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(jpeg)
        );
        parts.push(json!({"type": "image_url", "image_url": {"url": data_url}}));
    }

    parts.push(json!({"type": "text", "text": request.prompt}));
    Ok(parts)
}

/// Scale down so the longest edge is at most `max_edge`, keeping aspect.
fn fit_within(image: &DynamicImage, max_edge: u32) -> DynamicImage {
    if max_edge == 0 || (image.width() <= max_edge && image.height() <= max_edge) {
        return image.clone();
    }
    image.resize(max_edge, max_edge, FilterType::CatmullRom)
}

fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, InferenceError> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockRelay;
    use axum::http::StatusCode;
    use unblink_common::protocol::BatchMetadata;

    fn frames(n: usize, w: u32, h: u32) -> Vec<DecodedFrame> {
        (0..n)
            .map(|i| DecodedFrame {
                frame_uuid: format!("f{i}"),
                image: DynamicImage::ImageRgb8(image::RgbImage::new(w, h)),
            })
            .collect()
    }

    fn request(n: usize) -> InferenceRequest {
        let meta = BatchMetadata {
            duration_seconds: 45.0,
            start_time: 0.0,
            fps: Some(1.0),
        };
        InferenceRequest {
            frames: frames(n, 32, 24),
            context: TemporalContext::build(&meta, n, 2, 2.0),
            merge_size: 2,
            prompt: "Describe.".into(),
        }
    }

    fn model_for(relay: &MockRelay) -> OpenAiVisionModel {
        let config = Config {
            vlm_base_url: format!("{}/v1", relay.http_url),
            vlm_api_key: Some("sk-test".into()),
            vlm_model: "test-vl".into(),
            ..Config::default()
        };
        OpenAiVisionModel::new(&config).unwrap()
    }

    #[test]
    fn test_fit_within_keeps_aspect() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::new(1600, 900));
        let out = fit_within(&img, 800);
        assert_eq!((out.width(), out.height()), (800, 450));

        let img = DynamicImage::ImageRgb8(image::RgbImage::new(600, 1200));
        let out = fit_within(&img, 800);
        assert_eq!((out.width(), out.height()), (400, 800));
    }

    #[test]
    fn test_fit_within_leaves_small_frames() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::new(640, 480));
        let out = fit_within(&img, 800);
        assert_eq!((out.width(), out.height()), (640, 480));
    }

    #[test]
    fn test_content_layout() {
        let parts = build_content(&request(3), 800).unwrap();
        // <t0> img img <t1> img prompt
        let kinds: Vec<&str> = parts.iter().map(|p| p["type"].as_str().unwrap()).collect();
        assert_eq!(
            kinds,
            vec!["text", "image_url", "image_url", "text", "image_url", "text"]
        );
        // 3 frames at 1 fps, padded to 0,1,2,2 -> groups 0.5 and 2.0
        assert_eq!(parts[0]["text"], "<0.5 seconds>");
        assert_eq!(parts[3]["text"], "<2.0 seconds>");
        assert_eq!(parts[5]["text"], "Describe.");
        assert!(parts[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_describe_round_trip() {
        let relay = MockRelay::start().await;
        let model = model_for(&relay);

        let text = model.describe(request(4)).await.unwrap();
        assert_eq!(text, "a person walks by");

        let reqs = relay.state.chat_requests.lock().unwrap().clone();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0]["model"], "test-vl");
        assert_eq!(reqs[0]["max_tokens"], 512);
        let content = reqs[0]["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 4 + 2 + 1);
    }

    #[tokio::test]
    async fn test_describe_error_status() {
        let relay = MockRelay::start().await;
        *relay.state.chat_status.lock().unwrap() = StatusCode::SERVICE_UNAVAILABLE;
        let model = model_for(&relay);

        let err = model.describe(request(2)).await.unwrap_err();
        match err {
            InferenceError::Status { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "model overloaded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
