//! HTTP pull adapter (§4.1.1): polls a bounded-area aircraft query on a
//! fixed cadence, backing off on rate limiting.
//!
//! Modeled on the soar `AprsClient`'s supervising-task/stop-channel shape,
//! adapted for a poll loop instead of a persistent socket.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::adapters::{AdapterStatus, RawRecord, SourceAdapter};
use crate::message::SourceType;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const RATE_LIMIT_BACKOFF_FACTOR: u32 = 3;
const SUCCESSES_BEFORE_RESTORE: u32 = 2;

#[derive(Debug, Clone)]
pub struct HttpPullConfig {
    pub name: String,
    pub base_url: String,
    pub lat: f64,
    pub lon: f64,
    pub dist_nm: f64,
    pub api_key: Option<String>,
    pub poll_interval: Duration,
}

impl HttpPullConfig {
    /// Strip a known `api-auth:` prefix and warn (advisory only) if the
    /// remaining key doesn't look like a UUID.
    fn normalized_api_key(&self) -> Option<String> {
        let key = self.api_key.as_ref()?;
        let stripped = key.strip_prefix("api-auth:").unwrap_or(key).to_string();
        if !looks_like_uuid(&stripped) {
            warn!(
                source = %self.name,
                "configured API key does not look like a UUID; continuing anyway"
            );
        }
        Some(stripped)
    }

    fn url(&self) -> String {
        format!(
            "{}/lat/{}/lon/{}/dist/{}",
            self.base_url.trim_end_matches('/'),
            self.lat,
            self.lon,
            self.dist_nm
        )
    }
}

fn looks_like_uuid(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    parts.len() == 5
        && [8, 4, 4, 4, 12]
            .iter()
            .zip(parts.iter())
            .all(|(len, part)| part.len() == *len && part.chars().all(|c| c.is_ascii_hexdigit()))
}

struct RunState {
    /// Operator-configured cadence (`config.poll_interval`); the backoff
    /// and restore logic below is always relative to this, never to
    /// `DEFAULT_POLL_INTERVAL`, so a non-default `poll_interval_ms`
    /// survives a 429-backoff/recover cycle.
    base_poll_interval: Duration,
    poll_interval: Duration,
    successes_since_rate_limit: u32,
    known: HashMap<String, Value>,
}

pub struct HttpPullAdapter {
    config: HttpPullConfig,
    client: reqwest::Client,
    status: Arc<RwLock<AdapterStatus>>,
    emit: mpsc::Sender<RawRecord>,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
}

impl HttpPullAdapter {
    pub fn new(config: HttpPullConfig, emit: mpsc::Sender<RawRecord>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            status: Arc::new(RwLock::new(AdapterStatus::default())),
            emit,
            shutdown: Mutex::new(None),
        }
    }

    #[instrument(skip(config, client, status, emit, state), fields(source = %config.name))]
    async fn poll_once(
        config: &HttpPullConfig,
        client: &reqwest::Client,
        status: &RwLock<AdapterStatus>,
        emit: &mpsc::Sender<RawRecord>,
        state: &mut RunState,
    ) {
        let api_key = config.normalized_api_key();
        let mut request = client.get(config.url());
        if let Some(key) = &api_key {
            request = request.header("api-auth", key.clone());
        }

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(source = %config.name, error = %e, "transport error polling source");
                let mut status = status.write().await;
                status.connected = false;
                status.last_error = Some(e.to_string());
                return;
            }
        };

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(
                    source = %config.name,
                    "authentication rejected, source will not retry until re-enabled"
                );
                let mut status = status.write().await;
                status.connected = false;
                status.last_error = Some("authentication rejected".to_string());
                return;
            }
            StatusCode::TOO_MANY_REQUESTS => {
                state.poll_interval = state.base_poll_interval * RATE_LIMIT_BACKOFF_FACTOR;
                state.successes_since_rate_limit = 0;
                warn!(
                    source = %config.name,
                    interval_secs = state.poll_interval.as_secs(),
                    "rate limited, backing off"
                );
                return;
            }
            status_code if !status_code.is_success() => {
                let mut s = status.write().await;
                s.last_error = Some(format!("unexpected status {status_code}"));
                return;
            }
            _ => {}
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(source = %config.name, error = %e, "failed to parse response body");
                return;
            }
        };

        let records = body
            .get("aircraft")
            .or_else(|| body.get("ac"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut current_ids = HashSet::new();
        let mut accepted = Vec::new();

        for record in records {
            let id = record
                .get("icao")
                .or_else(|| record.get("hex"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let Some(id) = id else { continue };

            let lat = record.get("lat").and_then(Value::as_f64);
            let lon = record.get("lon").and_then(Value::as_f64);
            let (Some(lat), Some(lon)) = (lat, lon) else {
                continue;
            };
            if !lat.is_finite() || !lon.is_finite() {
                continue;
            }

            current_ids.insert(id.clone());
            state.known.insert(id, record.clone());
            accepted.push(record);
        }

        // Invariant I3: anything not seen in this snapshot drops out of the
        // adapter-local map before the next emission cycle.
        state.known.retain(|id, _| current_ids.contains(id));

        let now = Utc::now();
        for record in accepted {
            let raw = RawRecord {
                source_name: config.name.clone(),
                source_type: SourceType::Adsb,
                received_at: now,
                payload: record,
            };
            if emit.send(raw).await.is_err() {
                debug!(source = %config.name, "processor channel closed, stopping emission");
                break;
            }
        }

        {
            let mut s = status.write().await;
            s.connected = true;
            s.messages += current_ids.len() as u64;
            s.last_update = Some(now);
            s.last_error = None;
        }

        if state.poll_interval != state.base_poll_interval {
            state.successes_since_rate_limit += 1;
            if state.successes_since_rate_limit >= SUCCESSES_BEFORE_RESTORE {
                info!(source = %config.name, "restoring configured poll interval after recovery");
                state.poll_interval = state.base_poll_interval;
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for HttpPullAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn start(&self) {
        let mut guard = self.shutdown.lock().await;
        if guard.is_some() {
            return; // already running: start() is idempotent
        }

        let (tx, mut rx) = mpsc::channel::<()>(1);
        *guard = Some(tx);
        drop(guard);

        {
            let mut status = self.status.write().await;
            status.enabled = true;
        }

        let config = self.config.clone();
        let client = self.client.clone();
        let status = Arc::clone(&self.status);
        let emit = self.emit.clone();
        let name = config.name.clone();

        tokio::spawn(async move {
            let mut state = RunState {
                base_poll_interval: config.poll_interval,
                poll_interval: config.poll_interval,
                successes_since_rate_limit: 0,
                known: HashMap::new(),
            };

            loop {
                tokio::select! {
                    _ = rx.recv() => {
                        info!(source = %name, "http pull adapter stopping");
                        break;
                    }
                    _ = tokio::time::sleep(state.poll_interval) => {
                        Self::poll_once(&config, &client, &status, &emit, &mut state).await;
                    }
                }
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
    fn strips_known_api_auth_prefix() {
        let config = HttpPullConfig {
            name: "adsb".into(),
            base_url: "http://example.test".into(),
            lat: 0.0,
            lon: 0.0,
            dist_nm: 100.0,
            api_key: Some("api-auth:abcdef12-3456-7890-abcd-ef1234567890".into()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        };
        assert_eq!(
            config.normalized_api_key().as_deref(),
            Some("abcdef12-3456-7890-abcd-ef1234567890")
        );
    }

    #[test]
    fn builds_expected_url() {
        let config = HttpPullConfig {
            name: "adsb".into(),
            base_url: "http://example.test/".into(),
            lat: 55.86,
            lon: -4.25,
            dist_nm: 250.0,
            api_key: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        };
        assert_eq!(config.url(), "http://example.test/lat/55.86/lon/-4.25/dist/250");
    }

    #[test]
    fn uuid_heuristic_accepts_well_formed_uuid() {
        assert!(looks_like_uuid("abcdef12-3456-7890-abcd-ef1234567890"));
        assert!(!looks_like_uuid("not-a-uuid"));
    }

    /// Mirrors `poll_once`'s 429-backoff and recovery branches against a
    /// configured interval that differs from `DEFAULT_POLL_INTERVAL`, so a
    /// non-default `poll_interval_ms` must survive a backoff/recover cycle
    /// rather than being clobbered by the hard-coded default.
    #[test]
    fn backoff_and_restore_are_relative_to_configured_interval_not_default() {
        let configured = Duration::from_secs(20);
        assert_ne!(configured, DEFAULT_POLL_INTERVAL);

        let mut state = RunState {
            base_poll_interval: configured,
            poll_interval: configured,
            successes_since_rate_limit: 0,
            known: HashMap::new(),
        };

        // 429 branch.
        state.poll_interval = state.base_poll_interval * RATE_LIMIT_BACKOFF_FACTOR;
        state.successes_since_rate_limit = 0;
        assert_eq!(state.poll_interval, Duration::from_secs(60));

        // Recovery branch: two successes at the backed-off cadence restore
        // the configured interval, not DEFAULT_POLL_INTERVAL.
        for _ in 0..SUCCESSES_BEFORE_RESTORE {
            if state.poll_interval != state.base_poll_interval {
                state.successes_since_rate_limit += 1;
                if state.successes_since_rate_limit >= SUCCESSES_BEFORE_RESTORE {
                    state.poll_interval = state.base_poll_interval;
                }
            }
        }
        assert_eq!(state.poll_interval, configured);
    }
}
