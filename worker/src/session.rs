//! Persistent WebSocket session with the relay.
//!
//! `connect` → `register` → `listen`.  A session is one connection; the
//! supervisor builds a new one on every reconnect.  `frame_batch` events are
//! handed to the work queue together with the session's credentials; every
//! other event kind is only logged.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use unblink_common::protocol::{Envelope, InboundEvent, OutboundMessage};

use crate::credentials::Credentials;
use crate::error::SessionError;
use crate::pipeline::BatchJob;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of one connection.  "Disconnected" is the absence of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Registered,
    Listening,
    Closed,
    Errored,
}

pub struct RelaySession {
    stream: WsStream,
    state: SessionState,
    credentials: Option<Arc<Credentials>>,
    heartbeat: Option<Duration>,
}

impl RelaySession {
    /// Open one connection.  No retry here; that is the supervisor's job.
    pub async fn connect(url: &str) -> Result<RelaySession, SessionError> {
        info!("Connecting to {url}");
        let (stream, _) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|source| SessionError::Connection {
                    url: url.to_string(),
                    source,
                })?;
        Ok(RelaySession {
            stream,
            state: SessionState::Connected,
            credentials: None,
            heartbeat: None,
        })
    }

    /// Send a heartbeat every `period` while listening.
    pub fn with_heartbeat(mut self, period: Option<Duration>) -> Self {
        self.heartbeat = period.filter(|p| !p.is_zero());
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    #[allow(dead_code)]
    pub fn credentials(&self) -> Option<&Arc<Credentials>> {
        self.credentials.as_ref()
    }

    /// Send `register` and wait for the relay's single reply.
    pub async fn register(&mut self) -> Result<Arc<Credentials>, SessionError> {
        if self.credentials.is_some() {
            return Err(SessionError::AlreadyRegistered);
        }

        self.send(&OutboundMessage::Register {})
            .await
            .map_err(|e| SessionError::Registration(format!("cannot send register: {e}")))?;

        let text = loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(SessionError::Registration(
                        "connection closed before registration reply".into(),
                    ));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SessionError::Registration(e.to_string())),
            }
        };

        let envelope = Envelope::parse(text.as_str())
            .map_err(|e| SessionError::Registration(format!("undecodable reply: {e}")))?;
        let kind = envelope.kind.clone();
        let registered = match envelope.into_event() {
            Ok(InboundEvent::Registered(r)) => r,
            Ok(_) => {
                return Err(SessionError::Registration(format!(
                    "unexpected reply type '{kind}'"
                )));
            }
            Err(e) => {
                return Err(SessionError::Registration(format!(
                    "malformed registered payload: {e}"
                )));
            }
        };

        let credentials = Arc::new(Credentials::from(registered));
        info!("Registered: {}", credentials.worker_id);
        info!("Key: {}", credentials.key);

        self.credentials = Some(Arc::clone(&credentials));
        self.state = SessionState::Registered;
        Ok(credentials)
    }

    /// Receive loop.
    ///
    /// Returns `Ok` when the relay closes the connection normally and
    /// [`SessionError::ConnectionClosed`] on any other termination.
    pub async fn listen(&mut self, work_tx: &mpsc::Sender<BatchJob>) -> Result<(), SessionError> {
        if self.state == SessionState::Registered {
            self.state = SessionState::Listening;
        }
        info!("Listening for events...");

        let mut heartbeat = self
            .heartbeat
            .map(|p| tokio::time::interval_at(Instant::now() + p, p));

        loop {
            let msg = tokio::select! {
                msg = self.stream.next() => msg,
                _ = tick(&mut heartbeat) => {
                    if let Err(e) = self.send(&OutboundMessage::Heartbeat {}).await {
                        self.state = SessionState::Errored;
                        return Err(SessionError::ConnectionClosed(format!("heartbeat failed: {e}")));
                    }
                    debug!("Heartbeat sent");
                    continue;
                }
            };

            match msg {
                Some(Ok(Message::Text(text))) => self.handle_text(text.as_str(), work_tx).await,
                Some(Ok(Message::Close(frame))) => {
                    info!("Connection closed by relay ({frame:?})");
                    self.state = SessionState::Closed;
                    return Ok(());
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("Ignoring binary message ({} bytes)", data.len());
                }
                Some(Ok(_)) => {}
                Some(Err(tungstenite::Error::ConnectionClosed)) => {
                    self.state = SessionState::Closed;
                    return Ok(());
                }
                Some(Err(e)) => {
                    self.state = SessionState::Errored;
                    return Err(SessionError::ConnectionClosed(e.to_string()));
                }
                None => {
                    self.state = SessionState::Errored;
                    return Err(SessionError::ConnectionClosed(
                        "stream ended without close frame".into(),
                    ));
                }
            }
        }
    }

    /// Close the connection from our side.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Close handshake failed: {e}");
        }
    }

    async fn handle_text(&mut self, text: &str, work_tx: &mpsc::Sender<BatchJob>) {
        let envelope = match Envelope::parse(text) {
            Ok(env) => env,
            Err(e) => {
                warn!("Ignoring undecodable message: {e}");
                return;
            }
        };
        let kind = envelope.kind.clone();
        debug!(
            "Inbound '{kind}' (id={:?}, created_at={:?})",
            envelope.id, envelope.created_at
        );

        match envelope.into_event() {
            Ok(InboundEvent::FrameBatch(event)) => {
                let Some(credentials) = &self.credentials else {
                    debug!("Ignoring frame_batch received before registration");
                    return;
                };
                info!(
                    "frame_batch from {}: {} frames",
                    event.service_id,
                    event.frames.len()
                );
                let job = BatchJob {
                    event,
                    credentials: Arc::clone(credentials),
                };
                if work_tx.send(job).await.is_err() {
                    error!("Work queue closed, dropping frame_batch");
                }
            }
            Ok(InboundEvent::Registered(_)) => {
                warn!("Ignoring repeated 'registered' message");
            }
            Ok(InboundEvent::Other(kind)) => {
                debug!("Ignoring '{kind}' event");
            }
            Err(e) => {
                error!("Skipping malformed '{kind}' message: {e}");
            }
        }
    }

    async fn send(&mut self, msg: &OutboundMessage) -> Result<(), tungstenite::Error> {
        let text = serde_json::to_string(msg).map_err(|e| {
            tungstenite::Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        self.stream.send(Message::text(text)).await
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending().await,
    }
}
