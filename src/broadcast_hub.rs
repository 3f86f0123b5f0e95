//! Broadcast hub (C7): owns the subscriber set, batches ADS-B traffic,
//! dispatches everything else directly, and enforces per-subscriber
//! backpressure and heartbeat policy.
//!
//! Grounded in soar's `live_fixes.rs` `LiveFixService` (a map of
//! broadcaster handles behind one `RwLock`, with per-key fan-out) and the
//! `actions/fixes.rs` websocket handler's split read/write task shape —
//! generalized from a single NATS subject per aircraft to the fixed,
//! batched/direct topic split this spec requires.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::hub_events::SubscriptionEvent;
use crate::message::CanonicalMessage;

pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 500;
pub const DEFAULT_BATCH_LIMIT: usize = 100;
pub const DEFAULT_QUEUE_WARN_THRESHOLD: usize = 100;
pub const DEFAULT_QUEUE_HARD_LIMIT: usize = 10_000;
pub const DEFAULT_BACKPRESSURE_THRESHOLD_BYTES: u64 = 100 * 1024;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
const MISSED_PROBES_BEFORE_TERMINATION: u32 = 2;

/// A push-channel consumer. `sink` carries serialized event bytes to
/// whatever transport owns the actual socket (an axum websocket write
/// task in production, a channel in tests); `buffered_bytes` is an
/// estimate the transport keeps updated so the hub can apply
/// backpressure without inspecting the socket itself.
pub struct Subscriber {
    pub id: String,
    pub sink: mpsc::Sender<Vec<u8>>,
    pub buffered_bytes: Arc<AtomicU64>,
    pub origin: Option<String>,
    pub token: Option<String>,
}

struct SubscriberState {
    sink: mpsc::Sender<Vec<u8>>,
    buffered_bytes: Arc<AtomicU64>,
    #[allow(dead_code)]
    token: Option<String>,
    missed_probes: u32,
}

#[derive(Debug, Default, Clone)]
pub struct HubCounters {
    pub slow_subscriber_skips: u64,
    pub dropped_messages: u64,
    pub queue_warnings: u64,
    pub terminated_subscribers: u64,
}

pub struct BroadcastHubConfig {
    pub batch_limit: usize,
    pub queue_warn_threshold: usize,
    pub queue_hard_limit: usize,
    pub backpressure_threshold_bytes: u64,
    pub allowed_origins: Option<Vec<String>>,
}

impl Default for BroadcastHubConfig {
    fn default() -> Self {
        Self {
            batch_limit: DEFAULT_BATCH_LIMIT,
            queue_warn_threshold: DEFAULT_QUEUE_WARN_THRESHOLD,
            queue_hard_limit: DEFAULT_QUEUE_HARD_LIMIT,
            backpressure_threshold_bytes: DEFAULT_BACKPRESSURE_THRESHOLD_BYTES,
            allowed_origins: None,
        }
    }
}

/// The sole owner of the subscriber set and the ADS-B batch queue. Every
/// mutation goes through `&self` methods backed by internal locks, but no
/// external caller ever sees or holds the lock directly — matching the
/// "in-memory maps shared with handlers" redesign flag's ownership-
/// transfer fix.
pub struct BroadcastHub {
    config: BroadcastHubConfig,
    subscribers: RwLock<HashMap<String, SubscriberState>>,
    adsb_queue: RwLock<VecDeque<CanonicalMessage>>,
    counters: RwLock<HubCounters>,
}

impl BroadcastHub {
    pub fn new(config: BroadcastHubConfig) -> Self {
        Self {
            config,
            subscribers: RwLock::new(HashMap::new()),
            adsb_queue: RwLock::new(VecDeque::new()),
            counters: RwLock::new(HubCounters::default()),
        }
    }

    /// Admits a subscriber, rejecting on origin mismatch when a restricted
    /// origin policy is configured. The connection token is recorded for
    /// audit only and never gates admission.
    pub async fn subscribe(&self, subscriber: Subscriber) -> Result<(), &'static str> {
        if let Some(allowed) = &self.config.allowed_origins {
            match &subscriber.origin {
                Some(origin) if allowed.iter().any(|a| a == origin) => {}
                _ => return Err("Origin not allowed"),
            }
        }

        self.subscribers.write().await.insert(
            subscriber.id.clone(),
            SubscriberState {
                sink: subscriber.sink,
                buffered_bytes: subscriber.buffered_bytes,
                token: subscriber.token,
                missed_probes: 0,
            },
        );
        metrics::gauge!("hub_subscribers").set(self.subscriber_count().await as f64);
        info!(subscriber_id = %subscriber.id, "subscriber admitted");
        Ok(())
    }

    pub async fn unsubscribe(&self, subscriber_id: &str) {
        self.subscribers.write().await.remove(subscriber_id);
        metrics::gauge!("hub_subscribers").set(self.subscriber_count().await as f64);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn counters(&self) -> HubCounters {
        self.counters.read().await.clone()
    }

    /// Enqueues a normalized ADS-B message for the next batch flush.
    /// Drops the oldest entries once the hard limit is exceeded
    /// (invariant: queue never exceeds `queue_hard_limit`).
    pub async fn enqueue_adsb(&self, msg: CanonicalMessage) {
        let mut queue = self.adsb_queue.write().await;
        queue.push_back(msg);

        if queue.len() > self.config.queue_warn_threshold {
            self.counters.write().await.queue_warnings += 1;
        }

        while queue.len() > self.config.queue_hard_limit {
            queue.pop_front();
            self.counters.write().await.dropped_messages += 1;
        }
    }

    pub async fn queue_depth(&self) -> usize {
        self.adsb_queue.read().await.len()
    }

    /// Drains up to `batch_limit` queued ADS-B messages and dispatches
    /// them as one `adsb_batch` event to every eligible subscriber. A
    /// no-op when the queue is empty.
    pub async fn flush_batch(&self) {
        let batch: Vec<CanonicalMessage> = {
            let mut queue = self.adsb_queue.write().await;
            let n = queue.len().min(self.config.batch_limit);
            queue.drain(..n).collect()
        };

        if batch.is_empty() {
            return;
        }

        let event = SubscriptionEvent::AdsbBatch {
            count: batch.len(),
            data: batch,
            timestamp: Utc::now(),
        };
        self.dispatch(&event).await;
    }

    /// ACARS/HFGCS/EAM/conflict/recording/transcription events take the
    /// direct path: one send per subscriber, immediately.
    pub async fn publish_direct(&self, event: SubscriptionEvent) {
        self.dispatch(&event).await;
    }

    async fn dispatch(&self, event: &SubscriptionEvent) {
        let payload = match serde_json::to_vec(event) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to serialize subscription event");
                return;
            }
        };
        let payload_len = payload.len() as u64;

        let subscribers = self.subscribers.read().await;
        let mut skipped = 0u64;
        for state in subscribers.values() {
            // B3: equal to the threshold still sends; strictly greater skips.
            if state.buffered_bytes.load(Ordering::Relaxed) > self.config.backpressure_threshold_bytes {
                skipped += 1;
                continue;
            }
            if state.sink.try_send(payload.clone()).is_ok() {
                state.buffered_bytes.fetch_add(payload_len, Ordering::Relaxed);
            }
        }
        drop(subscribers);

        if skipped > 0 {
            self.counters.write().await.slow_subscriber_skips += skipped;
        }
    }

    /// Sends a liveness probe to every subscriber and terminates any that
    /// missed the previous `MISSED_PROBES_BEFORE_TERMINATION` probes.
    pub async fn heartbeat_tick(&self) {
        let probe = SubscriptionEvent::Connection {
            data: crate::hub_events::ConnectionInfo {
                subscriber_id: String::new(),
                message: "heartbeat".to_string(),
            },
            timestamp: Utc::now(),
        };
        let payload = serde_json::to_vec(&probe).unwrap_or_default();

        let mut to_terminate = Vec::new();
        {
            let mut subscribers = self.subscribers.write().await;
            for (id, state) in subscribers.iter_mut() {
                match state.sink.try_send(payload.clone()) {
                    Ok(()) => state.missed_probes = 0,
                    Err(_) => {
                        state.missed_probes += 1;
                        if state.missed_probes >= MISSED_PROBES_BEFORE_TERMINATION {
                            to_terminate.push(id.clone());
                        }
                    }
                }
            }
            for id in &to_terminate {
                subscribers.remove(id);
            }
        }

        if !to_terminate.is_empty() {
            self.counters.write().await.terminated_subscribers += to_terminate.len() as u64;
            for id in to_terminate {
                warn!(subscriber_id = %id, "subscriber missed two heartbeats, terminating");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{SourceInfo, SourceType, Validation};

    fn msg(id: &str) -> CanonicalMessage {
        CanonicalMessage {
            id: id.to_string(),
            sequence: 0,
            timestamp: Utc::now(),
            source: SourceInfo { source_type: SourceType::Adsb, station_id: "adsb".into(), api: "adsb".into(), data_type: None },
            hex: Some("a1b2c3".into()),
            tail: None,
            flight: None,
            registration: None,
            aircraft_type: None,
            position: None,
            ground_speed_kt: None,
            heading_deg: None,
            vertical_rate_fpm: None,
            on_ground: None,
            squawk: None,
            emitter_category: None,
            emergency: None,
            spi: None,
            alert: None,
            nic: None,
            nac_p: None,
            nac_v: None,
            sil: None,
            label: None,
            text: None,
            flight_phase: None,
            oooi: None,
            cpdlc: None,
            military: false,
            validation: Validation { valid: true },
        }
    }

    async fn add_subscriber(hub: &BroadcastHub, id: &str, buffered: u64) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(16);
        hub.subscribe(Subscriber {
            id: id.to_string(),
            sink: tx,
            buffered_bytes: Arc::new(AtomicU64::new(buffered)),
            origin: None,
            token: None,
        })
        .await
        .unwrap();
        rx
    }

    #[tokio::test]
    async fn batch_flush_emits_exactly_batch_limit_when_queue_deeper() {
        let hub = BroadcastHub::new(BroadcastHubConfig { batch_limit: 3, ..Default::default() });
        let mut rx = add_subscriber(&hub, "sub1", 0).await;

        for i in 0..10 {
            hub.enqueue_adsb(msg(&format!("m{i}"))).await;
        }
        hub.flush_batch().await;

        let bytes = rx.recv().await.unwrap();
        let event: SubscriptionEvent = serde_json::from_slice(&bytes).unwrap();
        match event {
            SubscriptionEvent::AdsbBatch { count, .. } => assert_eq!(count, 3),
            _ => panic!("expected AdsbBatch"),
        }
        assert_eq!(hub.queue_depth().await, 7);
    }

    #[tokio::test]
    async fn hard_limit_drops_oldest_messages() {
        let hub = BroadcastHub::new(BroadcastHubConfig { queue_hard_limit: 5, ..Default::default() });
        for i in 0..12 {
            hub.enqueue_adsb(msg(&format!("m{i}"))).await;
        }
        assert_eq!(hub.queue_depth().await, 5);
        assert_eq!(hub.counters().await.dropped_messages, 7);
    }

    #[tokio::test]
    async fn slow_subscriber_is_skipped_not_disconnected() {
        let hub = BroadcastHub::new(BroadcastHubConfig::default());
        let mut fast = add_subscriber(&hub, "fast", 0).await;
        let mut slow = add_subscriber(&hub, "slow", 150 * 1024).await;

        hub.publish_direct(SubscriptionEvent::Adsb { data: msg("m1"), timestamp: Utc::now() }).await;

        assert!(fast.try_recv().is_ok());
        assert!(slow.try_recv().is_err());
        assert_eq!(hub.subscriber_count().await, 2);
        assert_eq!(hub.counters().await.slow_subscriber_skips, 1);
    }

    #[tokio::test]
    async fn buffered_bytes_exactly_at_threshold_still_sends() {
        let hub = BroadcastHub::new(BroadcastHubConfig::default());
        let mut rx = add_subscriber(&hub, "sub1", DEFAULT_BACKPRESSURE_THRESHOLD_BYTES).await;
        hub.publish_direct(SubscriptionEvent::Adsb { data: msg("m1"), timestamp: Utc::now() }).await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn origin_mismatch_is_rejected_when_restricted() {
        let hub = BroadcastHub::new(BroadcastHubConfig {
            allowed_origins: Some(vec!["https://ok.example".to_string()]),
            ..Default::default()
        });
        let (tx, _rx) = mpsc::channel(1);
        let result = hub
            .subscribe(Subscriber {
                id: "sub1".into(),
                sink: tx,
                buffered_bytes: Arc::new(AtomicU64::new(0)),
                origin: Some("https://evil.example".into()),
                token: None,
            })
            .await;
        assert_eq!(result, Err("Origin not allowed"));
    }

    #[tokio::test]
    async fn heartbeat_terminates_after_two_missed_probes() {
        let hub = BroadcastHub::new(BroadcastHubConfig::default());
        let (tx, rx) = mpsc::channel::<Vec<u8>>(1);
        drop(rx); // closed receiver: every send fails, simulating a dead subscriber
        hub.subscribe(Subscriber {
            id: "dead".into(),
            sink: tx,
            buffered_bytes: Arc::new(AtomicU64::new(0)),
            origin: None,
            token: None,
        })
        .await
        .unwrap();

        hub.heartbeat_tick().await;
        assert_eq!(hub.subscriber_count().await, 1);
        hub.heartbeat_tick().await;
        assert_eq!(hub.subscriber_count().await, 0);
        assert_eq!(hub.counters().await.terminated_subscribers, 1);
    }
}
