//! Session supervisor – connects, registers and listens, reconnecting with
//! exponential backoff when the session fails.
//!
//! Every attempt gets a fresh connection and fresh credentials.  The counter
//! resets once a session registers, so only consecutive failures count
//! towards the limit.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use unblink_common::config::Config;

use crate::error::SessionError;
use crate::pipeline::BatchJob;
use crate::session::RelaySession;

/// Upper bound for the delay between reconnect attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The relay closed the connection normally.
    Closed,
    /// Shutdown was requested locally.
    Shutdown,
}

/// Retry bookkeeping for consecutive session failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    current: Duration,
    failures: u32,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max_attempts: u32) -> Self {
        Backoff {
            initial,
            current: initial,
            failures: 0,
            max_attempts,
        }
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.failures = 0;
    }

    /// Delay before the next attempt, or `None` once attempts are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.failures >= self.max_attempts {
            return None;
        }
        self.failures += 1;
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        Some(delay)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Keep a relay session alive until shutdown, a clean close, or too many
/// consecutive failures.
pub async fn supervise(
    config: &Config,
    work_tx: &mpsc::Sender<BatchJob>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut backoff = Backoff::new(
        Duration::from_secs(config.reconnect_backoff_secs),
        config.reconnect_attempts,
    );

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let err = match run_session(config, work_tx, shutdown, &mut backoff).await {
            Ok(SessionEnd::Closed) => {
                info!("Relay closed the connection");
                return Ok(());
            }
            Ok(SessionEnd::Shutdown) => return Ok(()),
            Err(e) => e,
        };

        let Some(delay) = backoff.next_delay() else {
            return Err(err).with_context(|| {
                format!(
                    "Relay session failed {} times in a row",
                    backoff.failures() + 1
                )
            });
        };
        warn!(
            "Session error: {err}; reconnecting in {delay:?} (attempt {}/{})",
            backoff.failures(),
            config.reconnect_attempts
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

/// One connection: connect → register → listen.
async fn run_session(
    config: &Config,
    work_tx: &mpsc::Sender<BatchJob>,
    shutdown: &mut watch::Receiver<bool>,
    backoff: &mut Backoff,
) -> Result<SessionEnd, SessionError> {
    let heartbeat = Duration::from_secs(config.heartbeat_interval_secs);
    let mut session = RelaySession::connect(&config.relay_ws_url)
        .await?
        .with_heartbeat(Some(heartbeat));

    session.register().await?;
    backoff.reset();

    let result = tokio::select! {
        r = session.listen(work_tx) => r.map(|()| SessionEnd::Closed),
        _ = shutdown.changed() => Ok(SessionEnd::Shutdown),
    };

    if matches!(result, Ok(SessionEnd::Shutdown)) {
        info!("Shutting down...");
        session.close().await;
    }
    result
}
