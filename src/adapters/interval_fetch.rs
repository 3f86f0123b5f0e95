//! Interval fetch adapter (§4.1.3): polls a REST endpoint on a fixed
//! cadence, tracking a cursor so subsequent polls only ask for new records.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::adapters::{AdapterStatus, RawRecord, SourceAdapter};
use crate::message::SourceType;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const FALLBACK_LIMIT: u32 = 50;

#[derive(Debug, Clone)]
pub struct IntervalFetchConfig {
    pub name: String,
    pub url: String,
    pub bearer_token: Option<String>,
    pub poll_interval: Duration,
}

struct RunState {
    last_message_id: Option<String>,
}

pub struct IntervalFetchAdapter {
    config: IntervalFetchConfig,
    client: reqwest::Client,
    status: Arc<RwLock<AdapterStatus>>,
    emit: mpsc::Sender<RawRecord>,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
}

impl IntervalFetchAdapter {
    pub fn new(config: IntervalFetchConfig, emit: mpsc::Sender<RawRecord>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            client,
            status: Arc::new(RwLock::new(AdapterStatus::default())),
            emit,
            shutdown: Mutex::new(None),
        }
    }

    #[instrument(skip(config, client, status, emit, state), fields(source = %config.name))]
    async fn poll_once(
        config: &IntervalFetchConfig,
        client: &reqwest::Client,
        status: &RwLock<AdapterStatus>,
        emit: &mpsc::Sender<RawRecord>,
        state: &mut RunState,
    ) {
        let mut request = client.get(&config.url);
        if let Some(token) = &config.bearer_token {
            request = request.bearer_auth(token);
        }
        request = match &state.last_message_id {
            Some(since) => request.query(&[("since", since.as_str())]),
            None => request.query(&[("limit", FALLBACK_LIMIT.to_string())]),
        };

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                let reason = if e.is_timeout() { "timed out" } else { "transport error" };
                warn!(source = %config.name, error = %e, reason, "interval fetch request failed");
                let mut s = status.write().await;
                s.connected = false;
                s.last_error = Some(e.to_string());
                return;
            }
        };

        if !response.status().is_success() {
            let mut s = status.write().await;
            s.last_error = Some(format!("unexpected status {}", response.status()));
            return;
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(source = %config.name, error = %e, "failed to parse response body");
                return;
            }
        };

        let records: Vec<Value> = if let Some(arr) = body.as_array() {
            arr.clone()
        } else {
            body.get("data")
                .or_else(|| body.get("messages"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };

        let now = Utc::now();
        let mut accepted = 0u64;
        for record in &records {
            if let Some(id) = record.get("id").and_then(Value::as_str) {
                state.last_message_id = Some(id.to_string());
            } else if let Some(id) = record.get("id").and_then(Value::as_i64) {
                state.last_message_id = Some(id.to_string());
            }

            let raw = RawRecord {
                source_name: config.name.clone(),
                source_type: SourceType::Eam,
                received_at: now,
                payload: record.clone(),
            };
            if emit.send(raw).await.is_err() {
                debug!(source = %config.name, "processor channel closed, stopping emission");
                break;
            }
            accepted += 1;
        }

        let mut s = status.write().await;
        s.connected = true;
        s.messages += accepted;
        s.last_update = Some(now);
        s.last_error = None;
    }
}

#[async_trait]
impl SourceAdapter for IntervalFetchAdapter {
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
        let client = self.client.clone();
        let status = Arc::clone(&self.status);
        let emit = self.emit.clone();
        let name = config.name.clone();
        let poll_interval = if config.poll_interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            config.poll_interval
        };

        tokio::spawn(async move {
            let mut state = RunState { last_message_id: None };
            loop {
                tokio::select! {
                    _ = rx.recv() => {
                        info!(source = %name, "interval fetch adapter stopping");
                        break;
                    }
                    _ = tokio::time::sleep(poll_interval) => {
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
    fn default_poll_interval_applied_when_unset() {
        let cfg = IntervalFetchConfig {
            name: "eam".into(),
            url: "http://example.test".into(),
            bearer_token: None,
            poll_interval: Duration::from_secs(0),
        };
        let interval = if cfg.poll_interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            cfg.poll_interval
        };
        assert_eq!(interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn accepts_root_array_or_wrapped_shapes() {
        let root_array = serde_json::json!([{"id": 1}, {"id": 2}]);
        assert!(root_array.as_array().is_some());

        let wrapped = serde_json::json!({"data": [{"id": 3}]});
        assert!(wrapped.get("data").and_then(Value::as_array).is_some());

        let messages = serde_json::json!({"messages": [{"id": 4}]});
        assert!(messages.get("messages").and_then(Value::as_array).is_some());
    }
}
