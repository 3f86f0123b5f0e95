//! HFGCS tracker (C5): watches for a configurable set of aircraft types
//! by hex range, callsign prefix, or explicit type tag, and drives a
//! per-aircraft `detected -> updated -> lost` state machine.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tracing::info;

use crate::message::CanonicalMessage;

/// Default staleness window before a tracked HFGCS aircraft is considered
/// lost. Longer than the ADS-B default (1h) since HF contacts are sparse.
pub const DEFAULT_TTL: ChronoDuration = ChronoDuration::hours(24);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HexRange {
    pub start: u32,
    pub end: u32,
}

impl HexRange {
    pub fn contains(&self, hex_value: u32) -> bool {
        (self.start..=self.end).contains(&hex_value)
    }
}

#[derive(Debug, Clone)]
pub struct HfgcsTypeConfig {
    pub id: String,
    pub name: String,
    pub hex_ranges: Vec<HexRange>,
    pub callsign_prefixes: Vec<String>,
}

/// Built-in examples named in the domain: E-6B "Mercury" and E-4B "Nightwatch".
pub fn default_types() -> Vec<HfgcsTypeConfig> {
    vec![
        HfgcsTypeConfig {
            id: "E-6B".to_string(),
            name: "E-6B Mercury".to_string(),
            hex_ranges: vec![
                HexRange { start: 0xAE0C6E, end: 0xAE0C7D },
                HexRange { start: 0xAE1026, end: 0xAE1027 },
                HexRange { start: 0xAE140B, end: 0xAE1422 },
            ],
            callsign_prefixes: vec!["IRON".to_string(), "GOTO".to_string()],
        },
        HfgcsTypeConfig {
            id: "E-4B".to_string(),
            name: "E-4B Nightwatch".to_string(),
            hex_ranges: vec![HexRange { start: 0xADFEB3, end: 0xADFEB6 }],
            callsign_prefixes: vec!["GORDO".to_string(), "TITAN".to_string(), "SLICK".to_string()],
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    HexRange,
    CallsignPrefix,
    ExplicitType,
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub type_id: String,
    pub detection_method: DetectionMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HfgcsTransition {
    Detected,
    Updated,
    Lost,
}

#[derive(Debug, Clone)]
pub struct HfgcsAircraft {
    pub aircraft_id: String,
    pub aircraft_type: String,
    pub hex: Option<String>,
    pub callsign: Option<String>,
    pub tail: Option<String>,
    pub first_detected: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_messages: u64,
    pub detection_method: DetectionMethod,
}

/// Classifies canonical messages against the configured type list and
/// tracks per-aircraft lifecycle state.
pub struct HfgcsTracker {
    types: Vec<HfgcsTypeConfig>,
    ttl: ChronoDuration,
    aircraft: RwLock<HashMap<String, HfgcsAircraft>>,
}

impl HfgcsTracker {
    pub fn new(types: Vec<HfgcsTypeConfig>) -> Self {
        Self {
            types,
            ttl: DEFAULT_TTL,
            aircraft: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: ChronoDuration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Parses a canonical 6-hex-character address into its numeric value.
    fn hex_value(hex: &str) -> Option<u32> {
        u32::from_str_radix(hex, 16).ok()
    }

    /// `hex_range` is checked before `callsign_prefix`, which is checked
    /// before `explicit_type`; the first match wins.
    pub fn classify(&self, msg: &CanonicalMessage) -> Option<Classification> {
        if let Some(hex) = &msg.hex {
            if let Some(value) = Self::hex_value(hex) {
                for t in &self.types {
                    if t.hex_ranges.iter().any(|r| r.contains(value)) {
                        return Some(Classification {
                            type_id: t.id.clone(),
                            detection_method: DetectionMethod::HexRange,
                        });
                    }
                }
            }
        }

        if let Some(flight) = &msg.flight {
            let callsign = flight.trim().to_uppercase();
            for t in &self.types {
                if t.callsign_prefixes.iter().any(|p| callsign.starts_with(p.as_str())) {
                    return Some(Classification {
                        type_id: t.id.clone(),
                        detection_method: DetectionMethod::CallsignPrefix,
                    });
                }
            }
        }

        if let Some(explicit) = &msg.aircraft_type {
            if self.types.iter().any(|t| &t.id == explicit) {
                return Some(Classification {
                    type_id: explicit.clone(),
                    detection_method: DetectionMethod::ExplicitType,
                });
            }
        }

        None
    }

    /// Returns `true` if the hex falls in any configured type's range, or
    /// in the generic U.S. military allocation (`0xAE0000..=0xAEFFFF`),
    /// used by the message processor's `military` derivation.
    pub fn is_military_hex(&self, hex: &str) -> bool {
        let Some(value) = Self::hex_value(hex) else {
            return false;
        };
        (0xAE0000..=0xAEFFFF).contains(&value)
            || self.types.iter().any(|t| t.hex_ranges.iter().any(|r| r.contains(value)))
    }

    /// Classifies `msg` and, on a match, advances that aircraft's state
    /// machine. Returns the transition and the updated snapshot when the
    /// message matched a configured type.
    pub async fn observe(&self, msg: &CanonicalMessage) -> Option<(HfgcsTransition, HfgcsAircraft)> {
        let classification = self.classify(msg)?;
        let aircraft_id = msg
            .hex
            .clone()
            .or_else(|| msg.flight.clone())
            .unwrap_or_else(|| classification.type_id.clone());

        let mut aircraft = self.aircraft.write().await;
        let transition = match aircraft.get_mut(&aircraft_id) {
            Some(existing) => {
                existing.last_seen = msg.timestamp;
                existing.total_messages += 1;
                existing.hex = msg.hex.clone().or_else(|| existing.hex.clone());
                existing.callsign = msg.flight.clone().or_else(|| existing.callsign.clone());
                existing.tail = msg.tail.clone().or_else(|| existing.tail.clone());
                HfgcsTransition::Updated
            }
            None => {
                aircraft.insert(
                    aircraft_id.clone(),
                    HfgcsAircraft {
                        aircraft_id: aircraft_id.clone(),
                        aircraft_type: classification.type_id.clone(),
                        hex: msg.hex.clone(),
                        callsign: msg.flight.clone(),
                        tail: msg.tail.clone(),
                        first_detected: msg.timestamp,
                        last_seen: msg.timestamp,
                        total_messages: 1,
                        detection_method: classification.detection_method,
                    },
                );
                HfgcsTransition::Detected
            }
        };

        aircraft.get(&aircraft_id).cloned().map(|a| (transition, a))
    }

    /// Removes aircraft idle longer than the configured TTL, returning
    /// their last known snapshot for `lost` event emission.
    pub async fn evict_stale(&self, now: DateTime<Utc>) -> Vec<HfgcsAircraft> {
        let mut aircraft = self.aircraft.write().await;
        let mut lost = Vec::new();
        aircraft.retain(|_, a| {
            let stale = now - a.last_seen > self.ttl;
            if stale {
                info!(aircraft_id = %a.aircraft_id, aircraft_type = %a.aircraft_type, "hfgcs aircraft lost");
                lost.push(a.clone());
            }
            !stale
        });
        lost
    }

    pub async fn active(&self) -> Vec<HfgcsAircraft> {
        self.aircraft.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{SourceInfo, SourceType, Validation};

    fn msg(hex: Option<&str>, flight: Option<&str>) -> CanonicalMessage {
        CanonicalMessage {
            id: "x".into(),
            sequence: 0,
            timestamp: Utc::now(),
            source: SourceInfo {
                source_type: SourceType::Adsb,
                station_id: "adsb".into(),
                api: "adsb".into(),
                data_type: None,
            },
            hex: hex.map(str::to_string),
            tail: None,
            flight: flight.map(str::to_string),
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

    #[test]
    fn classifies_e6b_by_hex_range() {
        let tracker = HfgcsTracker::new(default_types());
        let classification = tracker.classify(&msg(Some("ae0c70"), None)).unwrap();
        assert_eq!(classification.type_id, "E-6B");
        assert_eq!(classification.detection_method, DetectionMethod::HexRange);
    }

    #[test]
    fn classifies_e4b_by_callsign_prefix() {
        let tracker = HfgcsTracker::new(default_types());
        let classification = tracker.classify(&msg(None, Some("GORDO25"))).unwrap();
        assert_eq!(classification.type_id, "E-4B");
        assert_eq!(classification.detection_method, DetectionMethod::CallsignPrefix);
    }

    #[test]
    fn non_matching_message_classifies_to_none() {
        let tracker = HfgcsTracker::new(default_types());
        assert!(tracker.classify(&msg(Some("a1b2c3"), Some("UAL123"))).is_none());
    }

    #[test]
    fn military_hex_detection_covers_generic_ae_allocation() {
        let tracker = HfgcsTracker::new(default_types());
        assert!(tracker.is_military_hex("ae5555"));
        assert!(!tracker.is_military_hex("a15555"));
    }

    #[tokio::test]
    async fn observe_transitions_detected_then_updated() {
        let tracker = HfgcsTracker::new(default_types());
        let first = tracker.observe(&msg(Some("ae0c70"), None)).await.unwrap();
        assert_eq!(first.0, HfgcsTransition::Detected);

        let second = tracker.observe(&msg(Some("ae0c70"), None)).await.unwrap();
        assert_eq!(second.0, HfgcsTransition::Updated);
        assert_eq!(second.1.total_messages, 2);
    }

    #[tokio::test]
    async fn evict_stale_removes_idle_aircraft_past_ttl() {
        let tracker = HfgcsTracker::new(default_types()).with_ttl(ChronoDuration::seconds(1));
        let mut m = msg(Some("ae0c70"), None);
        m.timestamp = Utc::now() - ChronoDuration::seconds(10);
        tracker.observe(&m).await;

        let lost = tracker.evict_stale(Utc::now()).await;
        assert_eq!(lost.len(), 1);
        assert!(tracker.active().await.is_empty());
    }
}
