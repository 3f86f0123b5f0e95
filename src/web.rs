//! Axum HTTP/WebSocket server: health, metrics, and the subscriber push
//! channel (§6).
//!
//! Grounded in soar's `web.rs` (`start_web_server`, request-logging
//! middleware, `Router::new()` layering) and `actions/fixes.rs`'s
//! `fixes_live_websocket` handler (split socket, one read task, one write
//! task, raced with `tokio::select!`).

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{body::Body, Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::broadcast_hub::{BroadcastHub, Subscriber};
use crate::eam::types::TranscriptionSegment;
use crate::source_manager::SourceManager;

const SUBSCRIBER_SINK_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub sources: Arc<SourceManager>,
    pub hub: Arc<BroadcastHub>,
    pub allowed_origins: Option<Vec<String>>,
    /// Ingress for the (out-of-scope) transcription engine to hand segments
    /// to the EAM pipeline's actor task.
    pub eam_segments: mpsc::Sender<TranscriptionSegment>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    enabled_sources: usize,
    sources: HashMap<String, bool>,
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.sources.status().await;
    let enabled_sources = status.values().filter(|s| s.connected).count();
    let sources = status.iter().map(|(name, s)| (name.clone(), s.connected)).collect();
    Json(HealthResponse { enabled_sources, sources })
}

async fn metrics_endpoint() -> impl IntoResponse {
    (StatusCode::OK, crate::metrics::render())
}

async fn ingest_transcription_segment(State(state): State<AppState>, Json(segment): Json<TranscriptionSegment>) -> impl IntoResponse {
    if state.eam_segments.send(segment).await.is_err() {
        warn!("eam pipeline channel closed, dropping transcription segment");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

#[derive(Debug, serde::Deserialize)]
struct SubscribeParams {
    token: Option<String>,
}

/// Pre-upgrade admission check per §6: restricted-origin mismatch is
/// rejected before the WebSocket handshake completes, not after.
async fn subscribe_websocket(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<SubscribeParams>,
    State(state): State<AppState>,
) -> Response {
    if let Some(allowed) = &state.allowed_origins {
        let origin = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok());
        let ok = origin.is_some_and(|o| allowed.iter().any(|a| a == o));
        if !ok {
            warn!(?origin, "subscriber rejected: origin not allowed");
            return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_subscriber(socket, state, params.token))
}

#[instrument(skip(socket, state))]
async fn handle_subscriber(socket: WebSocket, state: AppState, token: Option<String>) {
    let subscriber_id = uuid::Uuid::new_v4().to_string();
    let (sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Vec<u8>>(SUBSCRIBER_SINK_CAPACITY);
    let buffered_bytes = Arc::new(AtomicU64::new(0));

    let origin = None; // Origin is enforced pre-upgrade; not re-checked per-message.
    let admitted = state
        .hub
        .subscribe(Subscriber { id: subscriber_id.clone(), sink: tx, buffered_bytes: buffered_bytes.clone(), origin, token })
        .await;
    if admitted.is_err() {
        return;
    }
    info!(subscriber_id = %subscriber_id, "subscriber connected");

    let write_task = tokio::spawn(handle_subscriber_write(sender, rx, buffered_bytes));
    let read_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // subscribers never send control frames beyond close
                Err(e) => {
                    info!(subscriber_id = %subscriber_id, error = %e, "subscriber connection error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = write_task => {}
        _ = read_task => {}
    }

    state.hub.unsubscribe(&subscriber_id).await;
    info!(subscriber_id = %subscriber_id, "subscriber disconnected");
}

async fn handle_subscriber_write(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Vec<u8>>,
    buffered_bytes: Arc<AtomicU64>,
) {
    while let Some(payload) = rx.recv().await {
        buffered_bytes.fetch_sub(payload.len() as u64, std::sync::atomic::Ordering::Relaxed);
        if sender.send(Message::Binary(payload.into())).await.is_err() {
            break;
        }
    }
}

async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    info!(%method, %path, status = response.status().as_u16(), elapsed_ms = start.elapsed().as_secs_f64() * 1000.0, "request completed");
    response
}

pub async fn start_web_server(interface: &str, port: u16, state: AppState) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .route("/subscribe", get(subscribe_websocket))
        .route("/ingest/transcription", axum::routing::post(ingest_transcription_segment))
        .with_state(state)
        .layer(middleware::from_fn(request_logging_middleware));

    let listener = tokio::net::TcpListener::bind(format!("{interface}:{port}")).await?;
    info!(%interface, port, "web server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
