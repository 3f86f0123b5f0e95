//! WebSocket push adapter (§4.1.2): tries a fixed list of endpoint variants
//! in order, reconnects forever while enabled with bounded exponential
//! backoff.
//!
//! Modeled on the soar `AprsClient`'s retry-loop/stop-channel shape, with
//! the socket swapped for `tokio-tungstenite` and the backoff made
//! exponential instead of fixed-delay.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{AdapterStatus, RawRecord, SourceAdapter};
use crate::message::SourceType;

const ENDPOINT_DELAY: Duration = Duration::from_secs(3);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Outcome of one `run_connection` attempt, distinguishing "a socket
/// actually opened" from "every endpoint variant failed" so the
/// reconnect loop knows whether to reset its backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionOutcome {
    CleanStop,
    ConnectedThenDropped,
    NeverConnected,
}

#[derive(Debug, Clone)]
pub struct WsPushConfig {
    pub name: String,
    /// Endpoint variants tried in order on each connection attempt.
    pub endpoints: Vec<String>,
    pub max_attempts: u32,
}

pub struct WsPushAdapter {
    config: WsPushConfig,
    status: Arc<RwLock<AdapterStatus>>,
    emit: mpsc::Sender<RawRecord>,
    malformed_frames: Arc<AtomicU64>,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
}

impl WsPushAdapter {
    pub fn new(config: WsPushConfig, emit: mpsc::Sender<RawRecord>) -> Self {
        Self {
            config,
            status: Arc::new(RwLock::new(AdapterStatus::default())),
            emit,
            malformed_frames: Arc::new(AtomicU64::new(0)),
            shutdown: Mutex::new(None),
        }
    }

    /// Try each configured endpoint in order, capped at `max_attempts`,
    /// pausing `ENDPOINT_DELAY` between failures. Returns the first open
    /// connection, or `None` if every endpoint in the round was exhausted.
    #[instrument(skip(config), fields(source = %config.name))]
    async fn try_connect(
        config: &WsPushConfig,
    ) -> Option<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>> {
        let attempts = config.max_attempts.max(1) as usize;
        for endpoint in config.endpoints.iter().cycle().take(attempts) {
            match connect_async(endpoint).await {
                Ok((stream, _response)) => {
                    info!(source = %config.name, endpoint, "websocket source connected");
                    return Some(stream);
                }
                Err(e) => {
                    warn!(source = %config.name, endpoint, error = %e, "endpoint attempt failed");
                    tokio::time::sleep(ENDPOINT_DELAY).await;
                }
            }
        }
        None
    }

    async fn run_connection(
        config: &WsPushConfig,
        status: &RwLock<AdapterStatus>,
        emit: &mpsc::Sender<RawRecord>,
        malformed_frames: &AtomicU64,
        stop_rx: &mut mpsc::Receiver<()>,
    ) -> ConnectionOutcome {
        let Some(stream) = Self::try_connect(config).await else {
            let mut s = status.write().await;
            s.connected = false;
            s.last_error = Some("exhausted all endpoint variants".to_string());
            return ConnectionOutcome::NeverConnected;
        };

        {
            let mut s = status.write().await;
            s.connected = true;
            s.last_error = None;
        }

        let (_write, mut read) = stream.split();
        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    info!(source = %config.name, "websocket adapter stopping");
                    return ConnectionOutcome::CleanStop;
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            Self::handle_frame(config, status, emit, malformed_frames, &text).await;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            warn!(source = %config.name, "websocket source closed connection");
                            let mut s = status.write().await;
                            s.connected = false;
                            return ConnectionOutcome::ConnectedThenDropped;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(source = %config.name, error = %e, "websocket transport error");
                            let mut s = status.write().await;
                            s.connected = false;
                            s.last_error = Some(e.to_string());
                            return ConnectionOutcome::ConnectedThenDropped;
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(
        config: &WsPushConfig,
        status: &RwLock<AdapterStatus>,
        emit: &mpsc::Sender<RawRecord>,
        malformed_frames: &AtomicU64,
        text: &str,
    ) {
        let payload: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                malformed_frames.fetch_add(1, Ordering::Relaxed);
                debug!(source = %config.name, error = %e, "discarding malformed frame");
                return;
            }
        };

        let raw = RawRecord {
            source_name: config.name.clone(),
            source_type: SourceType::Acars,
            received_at: Utc::now(),
            payload,
        };
        if emit.send(raw).await.is_err() {
            return;
        }

        let mut s = status.write().await;
        s.messages += 1;
        s.last_update = Some(Utc::now());
    }
}

#[async_trait]
impl SourceAdapter for WsPushAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn start(&self) {
        let mut guard = self.shutdown.lock().await;
        if guard.is_some() {
            return;
        }

        let (tx, mut rx) = mpsc::channel::<()>(1);
        *guard = Some(tx);
        drop(guard);

        {
            let mut status = self.status.write().await;
            status.enabled = true;
        }

        let config = self.config.clone();
        let status = Arc::clone(&self.status);
        let emit = self.emit.clone();
        let malformed_frames = Arc::clone(&self.malformed_frames);

        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                let outcome =
                    Self::run_connection(&config, &status, &emit, &malformed_frames, &mut rx).await;
                match outcome {
                    ConnectionOutcome::CleanStop => break,
                    // A link that reconnects successfully restarts at INITIAL_BACKOFF
                    // instead of continuing to climb toward the cap.
                    ConnectionOutcome::ConnectedThenDropped => backoff = INITIAL_BACKOFF,
                    ConnectionOutcome::NeverConnected => {}
                }

                tokio::select! {
                    _ = rx.recv() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        });
    }

    async fn stop(&self) {
        let mut guard = self.shutdown.lock().await;
        if let Some(tx) = guard.take() {
            let _ = tx.send(()).await;
        }
        let mut status = self.status.write().await;
        status.enabled = false;
        status.connected = false;
    }

    async fn status(&self) -> AdapterStatus {
        self.status.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_frame_counter_is_independent_of_status() {
        let counter = AtomicU64::new(0);
        counter.fetch_add(1, Ordering::Relaxed);
        counter.fetch_add(1, Ordering::Relaxed);
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = INITIAL_BACKOFF;
        for _ in 0..10 {
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        assert_eq!(backoff, MAX_BACKOFF);
    }

    /// Mirrors the reconnect loop in `start()`: a run that never connects
    /// keeps climbing, but a run that connects and then drops resets
    /// `backoff` to `INITIAL_BACKOFF` before the next doubling.
    #[test]
    fn backoff_resets_after_connected_then_dropped() {
        let mut backoff = INITIAL_BACKOFF;
        for outcome in [
            ConnectionOutcome::NeverConnected,
            ConnectionOutcome::NeverConnected,
            ConnectionOutcome::NeverConnected,
        ] {
            match outcome {
                ConnectionOutcome::CleanStop => unreachable!(),
                ConnectionOutcome::ConnectedThenDropped => backoff = INITIAL_BACKOFF,
                ConnectionOutcome::NeverConnected => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        assert_eq!(backoff, Duration::from_secs(8));

        match ConnectionOutcome::ConnectedThenDropped {
            ConnectionOutcome::CleanStop => unreachable!(),
            ConnectionOutcome::ConnectedThenDropped => backoff = INITIAL_BACKOFF,
            ConnectionOutcome::NeverConnected => {}
        }
        assert_eq!(backoff, INITIAL_BACKOFF, "backoff must reset after a successful open, not keep climbing");
    }
}
