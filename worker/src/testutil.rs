//! In-process fake relay and vision model used by the unit tests.
//!
//! Routes:
//!   GET  /connect                 → WebSocket, scripted registration reply
//!   GET  /worker/frames/{id}      → frame bytes (requires X-Worker-Key)
//!   POST /events                  → records result bodies
//!   POST /v1/chat/completions     → canned chat-completion reply

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::error::InferenceError;
use crate::model::{InferenceRequest, VisionModel};

pub const TEST_KEY: &str = "test-worker-key-0123456789abcdef";

/// What the fake relay does on the WebSocket after the worker connects.
#[derive(Clone)]
pub struct WsScript {
    /// Sent in reply to the first inbound message.
    pub reply: Value,
    /// Sent right after the reply.
    pub then: Vec<Value>,
    /// Send a close frame after `then`.
    pub close: bool,
}

impl Default for WsScript {
    fn default() -> Self {
        WsScript {
            reply: json!({"type": "registered", "data": {"worker_id": "w-1", "key": TEST_KEY}}),
            then: vec![],
            close: true,
        }
    }
}

#[derive(Clone)]
pub struct MockState {
    pub frames: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    pub frame_requests: Arc<AtomicUsize>,
    pub events: Arc<Mutex<Vec<Value>>>,
    pub events_status: Arc<Mutex<StatusCode>>,
    pub ws_script: Arc<Mutex<WsScript>>,
    pub ws_received: Arc<Mutex<Vec<Value>>>,
    pub chat_requests: Arc<Mutex<Vec<Value>>>,
    pub chat_status: Arc<Mutex<StatusCode>>,
}

impl Default for MockState {
    fn default() -> Self {
        MockState {
            frames: Arc::default(),
            frame_requests: Arc::default(),
            events: Arc::default(),
            events_status: Arc::new(Mutex::new(StatusCode::OK)),
            ws_script: Arc::default(),
            ws_received: Arc::default(),
            chat_requests: Arc::default(),
            chat_status: Arc::new(Mutex::new(StatusCode::OK)),
        }
    }
}

pub struct MockRelay {
    pub http_url: String,
    pub ws_url: String,
    pub state: MockState,
}

impl MockRelay {
    pub async fn start() -> MockRelay {
        let state = MockState::default();
        let app = Router::new()
            .route("/connect", get(connect))
            .route("/worker/frames/{id}", get(frame))
            .route("/events", post(events))
            .route("/v1/chat/completions", post(chat))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockRelay {
            http_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}/connect"),
            state,
        }
    }

    pub fn add_frame(&self, id: &str, bytes: Vec<u8>) {
        self.state.frames.lock().unwrap().insert(id.to_string(), bytes);
    }

    pub fn set_script(&self, script: WsScript) {
        *self.state.ws_script.lock().unwrap() = script;
    }

    pub fn events(&self) -> Vec<Value> {
        self.state.events.lock().unwrap().clone()
    }

    pub fn ws_received(&self) -> Vec<Value> {
        self.state.ws_received.lock().unwrap().clone()
    }

    pub fn frame_requests(&self) -> usize {
        self.state.frame_requests.load(Ordering::SeqCst)
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("x-worker-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|k| k == TEST_KEY)
}

async fn frame(
    State(state): State<MockState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.frame_requests.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let bytes = state.frames.lock().unwrap().get(&id).cloned();
    match bytes {
        Some(b) => (StatusCode::OK, b).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn events(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN;
    }
    let status = *state.events_status.lock().unwrap();
    if status == StatusCode::OK {
        state.events.lock().unwrap().push(body);
    }
    status
}

async fn chat(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    state.chat_requests.lock().unwrap().push(body);
    let status = *state.chat_status.lock().unwrap();
    if status != StatusCode::OK {
        return (status, "model overloaded").into_response();
    }
    Json(json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "a person walks by"}}]
    }))
    .into_response()
}

async fn connect(ws: WebSocketUpgrade, State(state): State<MockState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: MockState) {
    let script = state.ws_script.lock().unwrap().clone();

    // Wait for the worker's first message before replying.
    match socket.recv().await {
        Some(Ok(Message::Text(text))) => record(&state, text.as_str()),
        _ => return,
    }

    let mut outgoing = vec![script.reply];
    outgoing.extend(script.then);
    for msg in outgoing {
        if socket.send(Message::Text(msg.to_string().into())).await.is_err() {
            return;
        }
    }
    if script.close {
        let _ = socket.send(Message::Close(None)).await;
    }

    while let Some(Ok(msg)) = socket.recv().await {
        if let Message::Text(text) = msg {
            record(&state, text.as_str());
        }
    }
}

fn record(state: &MockState, text: &str) {
    if let Ok(v) = serde_json::from_str(text) {
        state.ws_received.lock().unwrap().push(v);
    }
}

/// A small solid-colour PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 30, 30]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// Vision model that records its requests and answers with fixed text.
#[derive(Default)]
pub struct RecordingModel {
    pub calls: Mutex<Vec<RecordedCall>>,
    pub fail: bool,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub frame_ids: Vec<String>,
    pub effective_fps: f64,
    pub timestamps: Vec<f64>,
    pub prompt: String,
}

#[async_trait]
impl VisionModel for RecordingModel {
    async fn describe(&self, request: InferenceRequest) -> Result<String, InferenceError> {
        self.calls.lock().unwrap().push(RecordedCall {
            frame_ids: request.frames.iter().map(|f| f.frame_uuid.clone()).collect(),
            effective_fps: request.context.effective_fps,
            timestamps: request.context.timestamps.clone(),
            prompt: request.prompt.clone(),
        });
        if self.fail {
            return Err(InferenceError::EmptyResponse);
        }
        Ok(format!("{} frames look calm", request.frames.len()))
    }
}
