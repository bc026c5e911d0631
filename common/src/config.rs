//! Configuration parsing – reads a KEY=VALUE file (`worker.conf`).
//!
//! Lines starting with `#` are comments, values may be double-quoted and
//! unknown keys are ignored, so one file can be shared with the relay's own
//! deployment tooling.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // ── relay ────────────────────────────────────────────────────────
    /// WebSocket endpoint the worker registers on.
    pub relay_ws_url: String,
    /// Base URL for frame downloads and result submission.
    pub relay_http_url: String,
    /// Timeout for each frame fetch and each result submission (seconds).
    pub request_timeout_secs: u64,
    /// Heartbeat period while listening (seconds, 0 = off).
    pub heartbeat_interval_secs: u64,
    pub reconnect_attempts: u32,
    pub reconnect_backoff_secs: u64,

    // ── batch pipeline ───────────────────────────────────────────────
    /// Frame fetches in flight per batch.
    pub fetch_concurrency: usize,
    /// Independent batch consumers draining the work queue.
    pub batch_workers: usize,
    /// Bound of both the work queue and the outbound result queue.
    pub queue_capacity: usize,

    // ── temporal context ─────────────────────────────────────────────
    /// Frames collapsed into one temporal patch.
    pub merge_size: usize,
    /// Effective FPS when neither metadata nor duration can provide one.
    pub default_fps: f64,
    /// Instruction appended after the temporal preamble.
    pub prompt: String,

    // ── vision model ─────────────────────────────────────────────────
    pub vlm_base_url: String,
    pub vlm_api_key: Option<String>,
    pub vlm_model: String,
    pub vlm_max_tokens: u32,
    pub vlm_timeout_secs: u64,
    /// Longest edge (pixels) a frame is scaled down to before upload.
    pub max_frame_edge: u32,
}

pub const DEFAULT_PROMPT: &str =
    "Analyze this video sequence. Describe any events, activities, or changes that occur.";

impl Config {
    /// Default config path.
    pub fn default_path() -> &'static str {
        "/etc/unblink/worker.conf"
    }

    /// Build a config from already-parsed `KEY=VALUE` pairs.
    pub fn from_map(map: &HashMap<String, String>) -> Config {
        let get = |key: &str| -> Option<String> { map.get(key).cloned() };
        let get_f64 = |key: &str, default: f64| -> f64 {
            get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let get_u64 = |key: &str, default: u64| -> u64 {
            get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let get_usize = |key: &str, default: usize| -> usize {
            get(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
                .max(1)
        };

        let default_fps = get_f64("DEFAULT_FPS", 2.0);

        Config {
            relay_ws_url: get("RELAY_WS_URL")
                .unwrap_or_else(|| "ws://localhost:7010/connect".into()),
            relay_http_url: get("RELAY_HTTP_URL")
                .unwrap_or_else(|| "http://localhost:7010".into())
                .trim_end_matches('/')
                .to_string(),
            request_timeout_secs: get_u64("REQUEST_TIMEOUT_SECS", 10),
            heartbeat_interval_secs: get_u64("HEARTBEAT_INTERVAL_SECS", 30),
            reconnect_attempts: get("RECONNECT_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            reconnect_backoff_secs: get_u64("RECONNECT_BACKOFF_SECS", 2),

            fetch_concurrency: get_usize("FETCH_CONCURRENCY", 4),
            batch_workers: get_usize("BATCH_WORKERS", 1),
            queue_capacity: get_usize("QUEUE_CAPACITY", 16),

            merge_size: get_usize("MERGE_SIZE", 2),
            default_fps: if default_fps > 0.0 { default_fps } else { 2.0 },
            prompt: get("PROMPT")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_PROMPT.into()),

            vlm_base_url: get("VLM_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8000/v1".into())
                .trim_end_matches('/')
                .to_string(),
            vlm_api_key: get("VLM_API_KEY").filter(|s| !s.is_empty()),
            vlm_model: get("VLM_MODEL").unwrap_or_else(|| "Qwen/Qwen3-VL-4B-Instruct".into()),
            vlm_max_tokens: get("VLM_MAX_TOKENS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(512),
            vlm_timeout_secs: get_u64("VLM_TIMEOUT_SECS", 300),
            max_frame_edge: get("MAX_FRAME_EDGE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(800),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::from_map(&HashMap::new())
    }
}

/// Parse a `KEY=VALUE` configuration file.
pub fn load(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read config: {}", path.display()))?;

    let map = parse_conf(&text);
    info!("Loaded config from {}", path.display());

    Ok(Config::from_map(&map))
}

/// Parse `KEY=VALUE` lines into a map, stripping optional double-quotes.
fn parse_conf(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, val)) = line.split_once('=') {
            let key = key.trim();
            let val = val.trim().trim_matches('"');
            map.insert(key.to_string(), val.to_string());
        }
    }
    map
}

// ─── tests ───────────────────────────────────────────────────────────────
