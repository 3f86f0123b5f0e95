//! Message processor (C3): the single normalization point between raw
//! adapter records and every downstream consumer.
//!
//! Grounded in soar's `aprs_client.rs` `MessageProcessor` trait (one
//! narrow callback invoked per parsed message) and `flight_tracker.rs`'s
//! significant-move heuristics, generalized from APRS fixes to the
//! multi-source canonical message shape.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use crate::adapters::RawRecord;
use crate::aircraft_tracker::AircraftTracker;
use crate::errors::HubError;
use crate::hfgcs::{HfgcsAircraft, HfgcsTracker, HfgcsTransition};
use crate::message::{CanonicalMessage, FlightPhase, OooiEvent, Position, SourceInfo, SourceType, Validation};

/// Heartbeat interval: emit even without a qualifying change after this
/// much silence on a given `hex`.
const HEARTBEAT_INTERVAL: ChronoDuration = ChronoDuration::seconds(30);
const SIGNIFICANT_POSITION_MOVE_M: f64 = 100.0;
const SIGNIFICANT_ALTITUDE_CHANGE_FT: f64 = 50.0;
const SIGNIFICANT_SPEED_CHANGE_KT: f64 = 5.0;
const SIGNIFICANT_HEADING_CHANGE_DEG: f64 = 2.0;

#[derive(Clone)]
struct EmittedSnapshot {
    position: Option<Position>,
    altitude_ft: Option<f64>,
    ground_speed_kt: Option<f64>,
    heading_deg: Option<f64>,
    on_ground: Option<bool>,
    emitted_at: DateTime<Utc>,
}

/// Downstream consumers a normalized message is dispatched to. Trackers
/// are shared actors mutated in place; persistence and the broadcast hub
/// are reached over bounded channels so a slow consumer never blocks
/// normalization.
pub struct Dispatch {
    pub aircraft_tracker: Arc<AircraftTracker>,
    pub hfgcs_tracker: Arc<HfgcsTracker>,
    pub persistence: mpsc::Sender<CanonicalMessage>,
    pub hub: mpsc::Sender<CanonicalMessage>,
    pub hfgcs_events: mpsc::Sender<(HfgcsTransition, HfgcsAircraft)>,
}

pub struct MessageProcessor {
    dispatch: Dispatch,
    last_emitted: RwLock<HashMap<(String, String), EmittedSnapshot>>,
    first_seen: RwLock<HashMap<(String, String), DateTime<Utc>>>,
    next_sequence: std::sync::atomic::AtomicU64,
}

impl MessageProcessor {
    pub fn new(dispatch: Dispatch) -> Self {
        Self {
            dispatch,
            last_emitted: RwLock::new(HashMap::new()),
            first_seen: RwLock::new(HashMap::new()),
            next_sequence: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn coerce_on_ground(value: &Value) -> Option<bool> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|i| i != 0),
            Value::String(s) => match s.as_str() {
                "1" | "true" | "true " => Some(true),
                "0" | "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn coerce_str(payload: &Value, keys: &[&str]) -> Option<String> {
        keys.iter()
            .find_map(|k| payload.get(*k))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn coerce_f64(payload: &Value, keys: &[&str]) -> Option<f64> {
        keys.iter().find_map(|k| payload.get(*k)).and_then(Value::as_f64)
    }

    fn derive_flight_phase(on_ground: Option<bool>, vertical_rate_fpm: Option<f64>) -> Option<FlightPhase> {
        if on_ground == Some(true) {
            return Some(FlightPhase::Ground);
        }
        match vertical_rate_fpm {
            Some(vs) if vs > 500.0 => Some(FlightPhase::Climb),
            Some(vs) if vs < -500.0 => Some(FlightPhase::Descent),
            Some(_) => Some(FlightPhase::Cruise),
            None => None,
        }
    }

    /// Step 1-3 of §4.3: coerce raw fields into a `CanonicalMessage`,
    /// deriving `on_ground`, `military`, and `flight_phase`. Returns
    /// `Err` when required fields for the source type are missing.
    async fn normalize(&self, raw: &RawRecord) -> Result<CanonicalMessage, HubError> {
        let payload = &raw.payload;

        let hex = Self::coerce_str(payload, &["hex", "icao", "icao24"])
            .and_then(|h| CanonicalMessage::canonicalize_hex(&h));
        let tail = Self::coerce_str(payload, &["tail", "registration", "reg"]);
        let flight = Self::coerce_str(payload, &["flight", "callsign", "fltno"]);
        let position = match (
            Self::coerce_f64(payload, &["lat", "latitude"]),
            Self::coerce_f64(payload, &["lon", "lng", "longitude"]),
        ) {
            (Some(lat), Some(lon)) => {
                let candidate = Position {
                    lat,
                    lon,
                    altitude_ft: Self::coerce_f64(payload, &["alt_baro", "altitude", "alt"]),
                };
                candidate.is_valid().then_some(candidate)
            }
            _ => None,
        };

        let valid = match raw.source_type {
            SourceType::Adsb => hex.is_some() && position.is_some(),
            SourceType::Acars => tail.is_some() || flight.is_some(),
            SourceType::Hf | SourceType::Eam => true,
        };

        if !valid {
            return Err(HubError::Validation {
                record_id: hex.clone().or_else(|| flight.clone()).unwrap_or_else(|| "unknown".to_string()),
                reason: format!("missing required fields for source type {:?}", raw.source_type),
            });
        }

        let on_ground = payload.get("on_ground").and_then(Self::coerce_on_ground);
        let ground_speed_kt = Self::coerce_f64(payload, &["gs", "ground_speed", "speed"]);
        let heading_deg = Self::coerce_f64(payload, &["track", "heading", "hdg"]);
        let vertical_rate_fpm = Self::coerce_f64(payload, &["baro_rate", "vert_rate", "vertical_rate"]);

        let explicit_military = payload.get("military").and_then(Value::as_bool).unwrap_or(false);
        let military = explicit_military
            || hex
                .as_deref()
                .map(|h| self.dispatch.hfgcs_tracker.is_military_hex(h))
                .unwrap_or(false);

        let flight_phase = Self::derive_flight_phase(on_ground, vertical_rate_fpm);

        let station_id = raw.source_name.clone();
        let id = if let Some(hex) = &hex {
            let key = (station_id.clone(), hex.clone());
            let mut first_seen = self.first_seen.write().await;
            let first = *first_seen.entry(key).or_insert(raw.received_at);
            CanonicalMessage::derive_adsb_id(&station_id, hex, first)
        } else {
            uuid::Uuid::new_v4().to_string()
        };

        Ok(CanonicalMessage {
            id,
            sequence: self.next_sequence.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            timestamp: raw.received_at,
            source: SourceInfo {
                source_type: raw.source_type,
                station_id,
                api: raw.source_name.clone(),
                data_type: None,
            },
            hex,
            tail,
            flight,
            registration: Self::coerce_str(payload, &["registration"]),
            aircraft_type: Self::coerce_str(payload, &["type", "aircraft_type"]),
            position,
            ground_speed_kt,
            heading_deg,
            vertical_rate_fpm,
            on_ground,
            squawk: Self::coerce_str(payload, &["squawk"]),
            emitter_category: Self::coerce_str(payload, &["category", "emitter_category"]),
            emergency: Self::coerce_str(payload, &["emergency"]),
            spi: payload.get("spi").and_then(Value::as_bool),
            alert: payload.get("alert").and_then(Value::as_bool),
            nic: payload.get("nic").and_then(Value::as_u64).map(|v| v as u8),
            nac_p: payload.get("nac_p").and_then(Value::as_u64).map(|v| v as u8),
            nac_v: payload.get("nac_v").and_then(Value::as_u64).map(|v| v as u8),
            sil: payload.get("sil").and_then(Value::as_u64).map(|v| v as u8),
            label: Self::coerce_str(payload, &["label"]),
            text: Self::coerce_str(payload, &["text"]),
            flight_phase,
            oooi: Self::coerce_str(payload, &["oooi_event"]).map(|event| OooiEvent { event, time: None }),
            cpdlc: None,
            military,
            validation: Validation { valid },
        })
    }

    /// Step 4 of §4.3: emit only when the message differs meaningfully
    /// from the last emitted snapshot for this `hex`, or on heartbeat.
    async fn is_significant_change(&self, msg: &CanonicalMessage) -> bool {
        let Some(hex) = &msg.hex else {
            return true; // non-ADS-B sources aren't subject to this gate
        };
        let key = (msg.source.station_id.clone(), hex.clone());

        let mut last_emitted = self.last_emitted.write().await;
        let significant = match last_emitted.get(&key) {
            None => true,
            Some(prev) => {
                let position_moved = match (prev.position, msg.position) {
                    (Some(a), Some(b)) => haversine_distance_m(a, b) > SIGNIFICANT_POSITION_MOVE_M,
                    (None, Some(_)) => true,
                    _ => false,
                };
                let altitude_changed = match (
                    prev.position.and_then(|p| p.altitude_ft),
                    msg.position.and_then(|p| p.altitude_ft),
                ) {
                    (Some(a), Some(b)) => (a - b).abs() >= SIGNIFICANT_ALTITUDE_CHANGE_FT,
                    _ => false,
                };
                let speed_changed = match (prev.ground_speed_kt, msg.ground_speed_kt) {
                    (Some(a), Some(b)) => (a - b).abs() >= SIGNIFICANT_SPEED_CHANGE_KT,
                    _ => false,
                };
                let heading_changed = match (prev.heading_deg, msg.heading_deg) {
                    (Some(a), Some(b)) => (a - b).abs() >= SIGNIFICANT_HEADING_CHANGE_DEG,
                    _ => false,
                };
                let ground_flipped = prev.on_ground != msg.on_ground;
                let heartbeat_due = msg.timestamp - prev.emitted_at >= HEARTBEAT_INTERVAL;

                position_moved || altitude_changed || speed_changed || heading_changed || ground_flipped || heartbeat_due
            }
        };

        if significant {
            last_emitted.insert(
                key,
                EmittedSnapshot {
                    position: msg.position,
                    altitude_ft: msg.position.and_then(|p| p.altitude_ft),
                    ground_speed_kt: msg.ground_speed_kt,
                    heading_deg: msg.heading_deg,
                    on_ground: msg.on_ground,
                    emitted_at: msg.timestamp,
                },
            );
        }
        significant
    }

    /// Normalizes `raw`, applies the significant-change gate, and
    /// dispatches the result to persistence, the trackers, and the hub.
    /// A normalization failure is logged and swallowed; the caller's
    /// pipeline continues unaffected.
    pub async fn process(&self, raw: RawRecord) {
        let msg = match self.normalize(&raw).await {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, category = e.category(), "discarding record that failed normalization");
                return;
            }
        };

        if !self.is_significant_change(&msg).await {
            debug!(hex = ?msg.hex, "suppressing non-significant update");
            return;
        }

        self.dispatch.aircraft_tracker.upsert(&msg).await;
        if let Some(transition) = self.dispatch.hfgcs_tracker.observe(&msg).await
            && self.dispatch.hfgcs_events.send(transition).await.is_err()
        {
            warn!("hfgcs event channel closed, lifecycle event will not be published");
        }

        if self.dispatch.persistence.send(msg.clone()).await.is_err() {
            warn!("persistence channel closed, message will not be saved");
        }
        if self.dispatch.hub.send(msg).await.is_err() {
            warn!("broadcast hub channel closed, message will not be published");
        }
    }
}

fn haversine_distance_m(a: Position, b: Position) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hfgcs::default_types;
    use serde_json::json;

    fn dispatch() -> (Dispatch, mpsc::Receiver<CanonicalMessage>, mpsc::Receiver<CanonicalMessage>) {
        let (persistence_tx, persistence_rx) = mpsc::channel(16);
        let (hub_tx, hub_rx) = mpsc::channel(16);
        let (hfgcs_events_tx, _hfgcs_events_rx) = mpsc::channel(16);
        (
            Dispatch {
                aircraft_tracker: Arc::new(AircraftTracker::new()),
                hfgcs_tracker: Arc::new(HfgcsTracker::new(default_types())),
                persistence: persistence_tx,
                hub: hub_tx,
                hfgcs_events: hfgcs_events_tx,
            },
            persistence_rx,
            hub_rx,
        )
    }

    fn adsb_record(hex: &str, lat: f64, lon: f64) -> RawRecord {
        RawRecord {
            source_name: "adsb_feed".into(),
            source_type: SourceType::Adsb,
            received_at: Utc::now(),
            payload: json!({"hex": hex, "lat": lat, "lon": lon, "alt_baro": 10000}),
        }
    }

    #[tokio::test]
    async fn rejects_adsb_record_missing_position() {
        let (dispatch, _p, _h) = dispatch();
        let processor = MessageProcessor::new(dispatch);
        let raw = RawRecord {
            source_name: "adsb_feed".into(),
            source_type: SourceType::Adsb,
            received_at: Utc::now(),
            payload: json!({"hex": "a1b2c3"}),
        };
        let result = processor.normalize(&raw).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn accepts_acars_record_with_only_flight() {
        let (dispatch, _p, _h) = dispatch();
        let processor = MessageProcessor::new(dispatch);
        let raw = RawRecord {
            source_name: "acars_feed".into(),
            source_type: SourceType::Acars,
            received_at: Utc::now(),
            payload: json!({"flight": "UAL123", "text": "OOOI OUT"}),
        };
        let msg = processor.normalize(&raw).await.unwrap();
        assert!(msg.validation.valid);
        assert_eq!(msg.flight.as_deref(), Some("UAL123"));
    }

    #[tokio::test]
    async fn first_message_is_always_significant() {
        let (dispatch, _p, _h) = dispatch();
        let processor = MessageProcessor::new(dispatch);
        processor.process(adsb_record("a1b2c3", 40.0, -70.0)).await;
        let track = processor.dispatch.aircraft_tracker.get("a1b2c3").await;
        assert!(track.is_some());
    }

    #[tokio::test]
    async fn tiny_position_move_is_suppressed() {
        let (dispatch, mut persistence_rx, _h) = dispatch();
        let processor = MessageProcessor::new(dispatch);
        processor.process(adsb_record("a1b2c3", 40.0, -70.0)).await;
        let _first = persistence_rx.recv().await.unwrap();

        processor.process(adsb_record("a1b2c3", 40.00001, -70.00001)).await;
        let second = tokio::time::timeout(std::time::Duration::from_millis(50), persistence_rx.recv()).await;
        assert!(second.is_err(), "sub-threshold move should not emit");
    }

    #[tokio::test]
    async fn large_position_move_triggers_reemission() {
        let (dispatch, mut persistence_rx, _h) = dispatch();
        let processor = MessageProcessor::new(dispatch);
        processor.process(adsb_record("a1b2c3", 40.0, -70.0)).await;
        let _first = persistence_rx.recv().await.unwrap();

        processor.process(adsb_record("a1b2c3", 40.01, -70.0)).await;
        let second = persistence_rx.recv().await;
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn military_hex_range_flags_message() {
        let (dispatch, _p, _h) = dispatch();
        let processor = MessageProcessor::new(dispatch);
        let raw = adsb_record("ae0c70", 40.0, -70.0);
        let msg = processor.normalize(&raw).await.unwrap();
        assert!(msg.military);
    }

    #[tokio::test]
    async fn on_ground_coerces_from_string_and_numeric_forms() {
        let (dispatch, _p, _h) = dispatch();
        let processor = MessageProcessor::new(dispatch);
        let raw = RawRecord {
            source_name: "adsb_feed".into(),
            source_type: SourceType::Adsb,
            received_at: Utc::now(),
            payload: json!({"hex": "a1b2c3", "lat": 40.0, "lon": -70.0, "on_ground": "1"}),
        };
        let msg = processor.normalize(&raw).await.unwrap();
        assert_eq!(msg.on_ground, Some(true));
        assert_eq!(msg.flight_phase, Some(FlightPhase::Ground));
    }
}
