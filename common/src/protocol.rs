//! Wire types exchanged with the relay.
//!
//! The WebSocket carries JSON envelopes of the form
//! `{"type": "...", "data": {...}}`.  The relay may add envelope fields
//! (`id`, `created_at`) that the worker only logs.  Results travel the other
//! way over HTTP as a bare [`ResultSummary`] body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messages the worker sends over the relay socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    Register {},
    Heartbeat {},
}

/// Raw inbound envelope, decoded before the payload is interpreted.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// An inbound message after its payload has been decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Registered(Registered),
    FrameBatch(FrameBatchEvent),
    /// Any other `type`; forward-compatible and not acted upon.
    Other(String),
}

impl Envelope {
    pub fn parse(text: &str) -> serde_json::Result<Envelope> {
        serde_json::from_str(text)
    }

    /// Interpret `data` according to `type`.
    ///
    /// Fails only when a known kind carries a payload that does not match
    /// its schema.
    pub fn into_event(self) -> serde_json::Result<InboundEvent> {
        match self.kind.as_str() {
            "registered" => Ok(InboundEvent::Registered(serde_json::from_value(self.data)?)),
            "frame_batch" => Ok(InboundEvent::FrameBatch(serde_json::from_value(self.data)?)),
            _ => Ok(InboundEvent::Other(self.kind)),
        }
    }
}

/// Payload of the relay's `registered` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registered {
    pub worker_id: String,
    pub key: String,
}

/// A batch of sampled frames from one continuous source segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameBatchEvent {
    #[serde(default)]
    pub service_id: String,
    /// Frame UUIDs in capture order.
    pub frames: Vec<String>,
    #[serde(default)]
    pub metadata: BatchMetadata,
}

/// Timing metadata attached to a frame batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchMetadata {
    #[serde(default)]
    pub duration_seconds: f64,
    /// Offset of the first frame from the start of the source (seconds).
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub fps: Option<f64>,
}

/// The worker's description of one batch, submitted to `POST /events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub summary: String,
    pub service_id: String,
    /// Frames actually fetched, never more than the batch requested.
    pub frame_count: usize,
    pub duration_seconds: f64,
    /// Completion time, serialized as RFC 3339 with a `Z` suffix.
    pub created_at: DateTime<Utc>,
}
