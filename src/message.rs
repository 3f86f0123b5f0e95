//! The canonical message model emitted by the message processor (C3) to
//! every downstream consumer: the trackers, the persistence facade, and
//! the broadcast hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Adsb,
    Acars,
    Hf,
    Eam,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub station_id: String,
    pub api: String,
    pub data_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub altitude_ft: Option<f64>,
}

impl Position {
    /// `lat in [-90, 90]` and `lon in [-180, 180]`. `(0.0, 0.0)` is a valid
    /// position — only missing/NaN coordinates are rejected upstream.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    pub fn coordinates(&self) -> String {
        format!("{:.5}, {:.5}", self.lat, self.lon)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightPhase {
    Ground,
    Climb,
    Cruise,
    Descent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OooiEvent {
    pub event: String,
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpdlcInfo {
    #[serde(rename = "type")]
    pub message_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
}

/// The single normalized record shape produced by the message processor.
///
/// `id` is stable for the lifetime of a track: for ADS-B sources it is
/// derived once as `<source>_<hex>_<first-seen-epoch>` and reused on every
/// subsequent update for the same (adapter, hex) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: SourceInfo,

    /// Per-process monotonic counter, not persisted. Only meaningful as a
    /// tie-breaker for batch ordering in the broadcast hub; the FIFO queue
    /// it feeds already preserves arrival order on its own.
    #[serde(skip)]
    pub sequence: u64,

    pub hex: Option<String>,
    pub tail: Option<String>,
    pub flight: Option<String>,
    pub registration: Option<String>,
    pub aircraft_type: Option<String>,

    pub position: Option<Position>,

    pub ground_speed_kt: Option<f64>,
    pub heading_deg: Option<f64>,
    pub vertical_rate_fpm: Option<f64>,
    pub on_ground: Option<bool>,

    pub squawk: Option<String>,
    pub emitter_category: Option<String>,
    pub emergency: Option<String>,
    pub spi: Option<bool>,
    pub alert: Option<bool>,

    pub nic: Option<u8>,
    pub nac_p: Option<u8>,
    pub nac_v: Option<u8>,
    pub sil: Option<u8>,

    pub label: Option<String>,
    pub text: Option<String>,
    pub flight_phase: Option<FlightPhase>,
    pub oooi: Option<OooiEvent>,
    pub cpdlc: Option<CpdlcInfo>,

    pub military: bool,
    pub validation: Validation,
}

impl CanonicalMessage {
    /// Canonicalize hex to a lowercase 6-character string, or `None` if it
    /// doesn't look like a 24-bit ICAO address. Enforces invariant I1.
    pub fn canonicalize_hex(raw: &str) -> Option<String> {
        let trimmed = raw.trim().to_lowercase();
        if trimmed.len() == 6 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(trimmed)
        } else {
            None
        }
    }

    /// Stable per-aircraft ID for an ADS-B style source:
    /// `<source>_<hex>_<first-seen-epoch>`.
    pub fn derive_adsb_id(source_station_id: &str, hex: &str, first_seen: DateTime<Utc>) -> String {
        format!("{source_station_id}_{hex}_{}", first_seen.timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_hex_to_lowercase() {
        assert_eq!(
            CanonicalMessage::canonicalize_hex(" A1B2C3 "),
            Some("a1b2c3".to_string())
        );
    }

    #[test]
    fn rejects_non_hex_or_wrong_length() {
        assert_eq!(CanonicalMessage::canonicalize_hex("a1b2c"), None);
        assert_eq!(CanonicalMessage::canonicalize_hex("zzzzzz"), None);
    }

    #[test]
    fn position_accepts_origin_but_rejects_nan() {
        let origin = Position {
            lat: 0.0,
            lon: 0.0,
            altitude_ft: None,
        };
        assert!(origin.is_valid());

        let nan = Position {
            lat: f64::NAN,
            lon: 0.0,
            altitude_ft: None,
        };
        assert!(!nan.is_valid());

        let out_of_range = Position {
            lat: 95.0,
            lon: 0.0,
            altitude_ft: None,
        };
        assert!(!out_of_range.is_valid());
    }

    #[test]
    fn derives_stable_adsb_id() {
        let ts = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = CanonicalMessage::derive_adsb_id("adsb_feed", "a1b2c3", ts);
        assert_eq!(id, format!("adsb_feed_a1b2c3_{}", ts.timestamp()));
    }
}
