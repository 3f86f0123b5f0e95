//! Aircraft tracker (C4): owns `hex -> Track`, the bounded position
//! history per aircraft, and staleness eviction.
//!
//! Grounded in soar's `flight_tracker.rs`, which keeps an in-memory map of
//! `AircraftState` behind a single owning task and exposes immutable
//! snapshots to callers; the haversine/significant-move helpers here are
//! ported from the same file.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tracing::info;

use crate::message::{CanonicalMessage, Position};

pub const DEFAULT_TRACK_TTL: ChronoDuration = ChronoDuration::hours(1);
const MAX_TRACK_POINTS: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub struct TrackPoint {
    pub position: Position,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub aircraft_id: String,
    pub hex: String,
    pub flight: Option<String>,
    pub tail: Option<String>,
    pub aircraft_type: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub position_count: u64,
    pub current_position: Option<Position>,
    pub track_points: VecDeque<TrackPoint>,
}

/// Recent ACARS positions, sourced from persistence for the `positions()`
/// union. Defined narrowly here rather than depending on the full
/// persistence facade.
#[derive(Debug, Clone)]
pub struct AcarsPosition {
    pub flight: String,
    pub tail: String,
    pub position: Position,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait AcarsPositionSource: Send + Sync {
    async fn recent_acars_positions(&self, since: DateTime<Utc>) -> Vec<AcarsPosition>;
}

/// Haversine great-circle distance in meters.
fn haversine_distance_m(a: Position, b: Position) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

pub struct AircraftTracker {
    tracks: RwLock<HashMap<String, Track>>,
    ttl: ChronoDuration,
}

impl AircraftTracker {
    pub fn new() -> Self {
        Self {
            tracks: RwLock::new(HashMap::new()),
            ttl: DEFAULT_TRACK_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: ChronoDuration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Creates the track if new, otherwise updates it in place. A new
    /// `track_points` entry is only appended when the position actually
    /// changed (invariant I4 caps the history at `MAX_TRACK_POINTS`,
    /// dropping the oldest).
    pub async fn upsert(&self, msg: &CanonicalMessage) -> Option<Track> {
        let hex = msg.hex.clone()?;
        let mut tracks = self.tracks.write().await;

        let track = tracks.entry(hex.clone()).or_insert_with(|| Track {
            aircraft_id: msg.id.clone(),
            hex: hex.clone(),
            flight: msg.flight.clone(),
            tail: msg.tail.clone(),
            aircraft_type: msg.aircraft_type.clone(),
            first_seen: msg.timestamp,
            last_seen: msg.timestamp,
            position_count: 0,
            current_position: None,
            track_points: VecDeque::new(),
        });

        track.last_seen = msg.timestamp;
        if msg.flight.is_some() {
            track.flight = msg.flight.clone();
        }
        if msg.tail.is_some() {
            track.tail = msg.tail.clone();
        }
        if msg.aircraft_type.is_some() {
            track.aircraft_type = msg.aircraft_type.clone();
        }

        if let Some(position) = msg.position {
            let moved = track
                .current_position
                .map(|prev| haversine_distance_m(prev, position) > 0.0)
                .unwrap_or(true);

            if moved {
                track.current_position = Some(position);
                track.position_count += 1;
                track.track_points.push_back(TrackPoint {
                    position,
                    timestamp: msg.timestamp,
                });
                while track.track_points.len() > MAX_TRACK_POINTS {
                    track.track_points.pop_front();
                }
            }
        }

        Some(track.clone())
    }

    pub async fn get(&self, hex: &str) -> Option<Track> {
        self.tracks.read().await.get(hex).cloned()
    }

    /// Removes tracks idle longer than the TTL, returning the evicted
    /// snapshots so callers can emit `aircraft_lost`.
    pub async fn evict_stale(&self, now: DateTime<Utc>) -> Vec<Track> {
        let mut tracks = self.tracks.write().await;
        let mut lost = Vec::new();
        tracks.retain(|_, track| {
            let stale = now - track.last_seen > self.ttl;
            if stale {
                info!(hex = %track.hex, "aircraft track lost");
                lost.push(track.clone());
            }
            !stale
        });
        lost
    }

    pub async fn all(&self) -> Vec<Track> {
        self.tracks.read().await.values().cloned().collect()
    }

    /// Union of currently tracked ADS-B positions and recent ACARS
    /// positions (last 6h, deduplicated by `flight+tail+lat+lon`).
    pub async fn positions(&self, acars_source: &dyn AcarsPositionSource) -> Vec<Position> {
        let since = Utc::now() - ChronoDuration::hours(6);
        let acars = acars_source.recent_acars_positions(since).await;

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();

        for p in acars {
            let key = format!(
                "{}|{}|{:.5}|{:.5}",
                p.flight, p.tail, p.position.lat, p.position.lon
            );
            if seen.insert(key) {
                out.push(p.position);
            }
        }

        for track in self.tracks.read().await.values() {
            if let Some(position) = track.current_position {
                out.push(position);
            }
        }

        out
    }
}

impl Default for AircraftTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{SourceInfo, SourceType, Validation};

    fn msg(hex: &str, lat: f64, lon: f64, timestamp: DateTime<Utc>) -> CanonicalMessage {
        CanonicalMessage {
            id: format!("id_{hex}"),
            sequence: 0,
            timestamp,
            source: SourceInfo {
                source_type: SourceType::Adsb,
                station_id: "adsb".into(),
                api: "adsb".into(),
                data_type: None,
            },
            hex: Some(hex.to_string()),
            tail: None,
            flight: Some("UAL123".into()),
            registration: None,
            aircraft_type: Some("B738".into()),
            position: Some(Position { lat, lon, altitude_ft: Some(35000.0) }),
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

    #[tokio::test]
    async fn upsert_creates_then_updates_same_track() {
        let tracker = AircraftTracker::new();
        let now = Utc::now();
        tracker.upsert(&msg("a1b2c3", 40.0, -70.0, now)).await;
        let track = tracker
            .upsert(&msg("a1b2c3", 40.01, -70.01, now + ChronoDuration::seconds(5)))
            .await
            .unwrap();

        assert_eq!(track.position_count, 2);
        assert_eq!(track.track_points.len(), 2);
    }

    #[tokio::test]
    async fn track_points_capped_at_max() {
        let tracker = AircraftTracker::new();
        let base = Utc::now();
        for i in 0..(MAX_TRACK_POINTS + 50) {
            let lat = 40.0 + (i as f64) * 0.0001;
            tracker
                .upsert(&msg("a1b2c3", lat, -70.0, base + ChronoDuration::seconds(i as i64)))
                .await;
        }
        let track = tracker.get("a1b2c3").await.unwrap();
        assert_eq!(track.track_points.len(), MAX_TRACK_POINTS);
    }

    #[tokio::test]
    async fn evict_stale_removes_tracks_past_ttl() {
        let tracker = AircraftTracker::new().with_ttl(ChronoDuration::seconds(1));
        let old = Utc::now() - ChronoDuration::seconds(10);
        tracker.upsert(&msg("a1b2c3", 40.0, -70.0, old)).await;

        let lost = tracker.evict_stale(Utc::now()).await;
        assert_eq!(lost.len(), 1);
        assert!(tracker.get("a1b2c3").await.is_none());
    }

    #[test]
    fn haversine_distance_matches_known_values() {
        let a = Position { lat: 0.0, lon: 0.0, altitude_ft: None };
        let b = Position { lat: 0.0, lon: 1.0, altitude_ft: None };
        let d = haversine_distance_m(a, b);
        assert!((d - 111_195.0).abs() < 1000.0);
    }
}
