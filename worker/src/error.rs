//! Error taxonomy for the worker.
//!
//! Only [`SessionError`] ends a session.  Frame, batch and emission errors
//! are logged where they are absorbed and the receive loop carries on.

use thiserror::Error;

/// Transport and handshake failures; fatal to the current session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot connect to relay at {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("registration failed: {0}")]
    Registration(String),

    #[error("session already registered")]
    AlreadyRegistered,

    #[error("relay connection closed unexpectedly: {0}")]
    ConnectionClosed(String),
}

/// A single frame could not be retrieved; the frame is dropped.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("relay returned {0}")]
    Status(reqwest::StatusCode),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("relay URL cannot carry a frame path: {0}")]
    InvalidUrl(String),

    #[error("decode task aborted: {0}")]
    Aborted(String),
}

/// The vision model could not describe a batch.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("model returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("cannot encode frame: {0}")]
    Encode(#[from] image::ImageError),

    #[error("model response had no content")]
    EmptyResponse,

    #[error("inference task aborted: {0}")]
    Aborted(String),
}

/// Terminal failure of one batch; no result is emitted for it.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("no frames could be fetched ({requested} requested)")]
    EmptyBatch { requested: usize },

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// A computed result could not be delivered to the relay.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("relay rejected result with {0}")]
    Status(reqwest::StatusCode),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}
