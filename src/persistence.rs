//! Persistence facade (C9): the narrow set of write/read operations C3–C6
//! use against the external store.
//!
//! Grounded in soar's `airports_repo.rs`/`aircraft_repo.rs` shape: a
//! `Pool<ConnectionManager<PgConnection>>` held behind a small repository
//! struct, every public method wrapping its (synchronous) Diesel call in
//! `tokio::task::spawn_blocking` so the async runtime never blocks on
//! database I/O. The facade is expressed as a trait so pipeline tests can
//! swap in an in-memory fake instead of standing up Postgres (§4.14/C14).

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};

use crate::aircraft_tracker::Track;
use crate::eam::types::{EamMessage, EamMessageType};
use crate::hfgcs::{DetectionMethod, HfgcsAircraft};
use crate::message::CanonicalMessage;
use crate::schema::{aircraft_tracks, atc_recordings, eam_messages, hfgcs_aircraft, messages, settings};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// A recorded ATC voice segment, independent of whether it was ever
/// promoted into an [`EamMessage`].
#[derive(Debug, Clone)]
pub struct AtcRecording {
    pub segment_id: String,
    pub feed_id: String,
    pub recorded_at: DateTime<Utc>,
    pub duration_s: f64,
    pub transcription_text: Option<String>,
    pub transcription_confidence: Option<f64>,
}

/// Transcription data attached to a recording after the fact.
#[derive(Debug, Clone)]
pub struct TranscriptionUpdate {
    pub text: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default)]
pub struct EamQueryOptions {
    pub message_type: Option<EamMessageType>,
    pub since: Option<DateTime<Utc>>,
    pub limit: i64,
}

#[derive(Debug, Clone, Default)]
pub struct HfgcsStatistics {
    pub total_aircraft: i64,
    pub by_type: Vec<(String, i64)>,
}

fn message_type_str(kind: EamMessageType) -> &'static str {
    match kind {
        EamMessageType::Eam => "eam",
        EamMessageType::SkyKing => "sky_king",
    }
}

fn message_type_from_str(raw: &str) -> EamMessageType {
    match raw {
        "sky_king" => EamMessageType::SkyKing,
        _ => EamMessageType::Eam,
    }
}

fn detection_method_str(method: DetectionMethod) -> &'static str {
    match method {
        DetectionMethod::HexRange => "hex_range",
        DetectionMethod::CallsignPrefix => "callsign_prefix",
        DetectionMethod::ExplicitType => "explicit_type",
    }
}

fn detection_method_from_str(raw: &str) -> DetectionMethod {
    match raw {
        "callsign_prefix" => DetectionMethod::CallsignPrefix,
        "explicit_type" => DetectionMethod::ExplicitType,
        _ => DetectionMethod::HexRange,
    }
}

/// Narrow write/read interface used by C3–C6. Every method is atomic on
/// its own; callers must not hold tracker state across a call (§5).
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save_message(&self, msg: &CanonicalMessage) -> Result<()>;
    async fn update_aircraft_tracking(&self, msg: &CanonicalMessage) -> Result<()>;
    async fn save_aircraft_track(&self, track: &Track) -> Result<()>;
    async fn get_aircraft_by_identifier(&self, aircraft_id: &str) -> Result<Option<Track>>;
    async fn get_aircraft_positions(&self) -> Result<Vec<Track>>;

    async fn save_hfgcs_aircraft(&self, aircraft: &HfgcsAircraft) -> Result<()>;
    async fn get_active_hfgcs_aircraft(&self, limit: i64, hours_back: i64) -> Result<Vec<HfgcsAircraft>>;
    async fn get_hfgcs_statistics(&self) -> Result<HfgcsStatistics>;

    async fn save_eam_message(&self, eam: &EamMessage) -> Result<()>;
    async fn update_eam_repeat(&self, id: &str, recording_ids: &[String]) -> Result<()>;
    async fn get_eam_messages(&self, opts: &EamQueryOptions) -> Result<Vec<EamMessage>>;
    async fn search_eams(&self, query: &str, limit: i64) -> Result<Vec<EamMessage>>;
    async fn clear_eams(&self, older_than_days: i64) -> Result<u64>;

    async fn save_atc_recording(&self, recording: &AtcRecording) -> Result<()>;
    async fn update_recording_transcription(&self, segment_id: &str, data: &TranscriptionUpdate) -> Result<()>;
    async fn get_recordings(&self, feed_id: Option<&str>, limit: i64) -> Result<Vec<AtcRecording>>;
    async fn get_recordings_in_time_window(&self, feed_id: &str, center_ts: DateTime<Utc>, window_sec: i64) -> Result<Vec<AtcRecording>>;

    async fn get_setting(&self, category: &str, key: &str) -> Result<Option<serde_json::Value>>;
    async fn set_setting(&self, category: &str, key: &str, value: serde_json::Value) -> Result<()>;
    async fn get_settings_by_category(&self, category: &str) -> Result<HashMap<String, serde_json::Value>>;
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = messages)]
struct MessageRow {
    id: String,
    timestamp: DateTime<Utc>,
    source_type: String,
    station_id: String,
    api: String,
    data_type: Option<String>,
    hex: Option<String>,
    tail: Option<String>,
    flight: Option<String>,
    registration: Option<String>,
    aircraft_type: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    altitude_ft: Option<f64>,
    ground_speed_kt: Option<f64>,
    heading_deg: Option<f64>,
    vertical_rate_fpm: Option<f64>,
    on_ground: Option<bool>,
    squawk: Option<String>,
    emitter_category: Option<String>,
    emergency: Option<bool>,
    spi: Option<bool>,
    alert: Option<bool>,
    military: bool,
    valid: bool,
    raw_json: serde_json::Value,
}

impl MessageRow {
    fn from_canonical(msg: &CanonicalMessage) -> Result<Self> {
        let source_type = match msg.source.source_type {
            crate::message::SourceType::Adsb => "adsb",
            crate::message::SourceType::Acars => "acars",
            crate::message::SourceType::Hf => "hf",
            crate::message::SourceType::Eam => "eam",
        };
        Ok(Self {
            id: msg.id.clone(),
            timestamp: msg.timestamp,
            source_type: source_type.to_string(),
            station_id: msg.source.station_id.clone(),
            api: msg.source.api.clone(),
            data_type: msg.source.data_type.clone(),
            hex: msg.hex.clone(),
            tail: msg.tail.clone(),
            flight: msg.flight.clone(),
            registration: msg.registration.clone(),
            aircraft_type: msg.aircraft_type.clone(),
            lat: msg.position.map(|p| p.lat),
            lon: msg.position.map(|p| p.lon),
            altitude_ft: msg.position.and_then(|p| p.altitude_ft),
            ground_speed_kt: msg.ground_speed_kt,
            heading_deg: msg.heading_deg,
            vertical_rate_fpm: msg.vertical_rate_fpm,
            on_ground: msg.on_ground,
            squawk: msg.squawk.clone(),
            emitter_category: msg.emitter_category.clone(),
            emergency: msg.emergency.as_ref().map(|_| true),
            spi: msg.spi,
            alert: msg.alert,
            military: msg.military,
            valid: msg.validation.valid,
            raw_json: serde_json::to_value(msg).context("serializing canonical message")?,
        })
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = aircraft_tracks)]
struct AircraftTrackRow {
    aircraft_id: String,
    hex: Option<String>,
    flight: Option<String>,
    tail: Option<String>,
    aircraft_type: Option<String>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    position_count: i64,
    current_lat: Option<f64>,
    current_lon: Option<f64>,
    current_altitude_ft: Option<f64>,
    track_points: serde_json::Value,
}

impl AircraftTrackRow {
    fn from_track(track: &Track) -> Result<Self> {
        Ok(Self {
            aircraft_id: track.aircraft_id.clone(),
            hex: Some(track.hex.clone()),
            flight: track.flight.clone(),
            tail: track.tail.clone(),
            aircraft_type: track.aircraft_type.clone(),
            first_seen: track.first_seen,
            last_seen: track.last_seen,
            position_count: track.position_count as i64,
            current_lat: track.current_position.map(|p| p.lat),
            current_lon: track.current_position.map(|p| p.lon),
            current_altitude_ft: track.current_position.and_then(|p| p.altitude_ft),
            track_points: serde_json::to_value(
                track
                    .track_points
                    .iter()
                    .map(|tp| serde_json::json!({"lat": tp.position.lat, "lon": tp.position.lon, "altitude_ft": tp.position.altitude_ft, "timestamp": tp.timestamp}))
                    .collect::<Vec<_>>(),
            )
            .context("serializing track points")?,
        })
    }

    fn into_track(self) -> Track {
        use crate::aircraft_tracker::TrackPoint;
        use crate::message::Position;
        use std::collections::VecDeque;

        let track_points: VecDeque<TrackPoint> = serde_json::from_value::<Vec<serde_json::Value>>(self.track_points)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| {
                Some(TrackPoint {
                    position: Position {
                        lat: v.get("lat")?.as_f64()?,
                        lon: v.get("lon")?.as_f64()?,
                        altitude_ft: v.get("altitude_ft").and_then(|a| a.as_f64()),
                    },
                    timestamp: v.get("timestamp").and_then(|t| t.as_str()).and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|d| d.with_timezone(&Utc))?,
                })
            })
            .collect();

        Track {
            aircraft_id: self.aircraft_id,
            hex: self.hex.unwrap_or_default(),
            flight: self.flight,
            tail: self.tail,
            aircraft_type: self.aircraft_type,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            position_count: self.position_count as u64,
            current_position: self.current_lat.zip(self.current_lon).map(|(lat, lon)| crate::message::Position {
                lat,
                lon,
                altitude_ft: self.current_altitude_ft,
            }),
            track_points,
        }
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = hfgcs_aircraft)]
struct HfgcsAircraftRow {
    aircraft_id: String,
    aircraft_type: String,
    hex: Option<String>,
    callsign: Option<String>,
    tail: Option<String>,
    first_detected: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    total_messages: i64,
    detection_method: String,
}

impl HfgcsAircraftRow {
    fn from_domain(a: &HfgcsAircraft) -> Self {
        Self {
            aircraft_id: a.aircraft_id.clone(),
            aircraft_type: a.aircraft_type.clone(),
            hex: a.hex.clone(),
            callsign: a.callsign.clone(),
            tail: a.tail.clone(),
            first_detected: a.first_detected,
            last_seen: a.last_seen,
            total_messages: a.total_messages as i64,
            detection_method: detection_method_str(a.detection_method).to_string(),
        }
    }

    fn into_domain(self) -> HfgcsAircraft {
        HfgcsAircraft {
            aircraft_id: self.aircraft_id,
            aircraft_type: self.aircraft_type,
            hex: self.hex,
            callsign: self.callsign,
            tail: self.tail,
            first_detected: self.first_detected,
            last_seen: self.last_seen,
            total_messages: self.total_messages as u64,
            detection_method: detection_method_from_str(&self.detection_method),
        }
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = eam_messages)]
struct EamMessageRow {
    id: String,
    message_type: String,
    header: String,
    message_body: String,
    message_length: i32,
    confidence_score: i16,
    first_detected: DateTime<Utc>,
    last_detected: DateTime<Utc>,
    repeat_count: i32,
    recording_ids: serde_json::Value,
    raw_transcription: String,
    codeword: Option<String>,
    time_code: Option<String>,
    authentication: Option<String>,
    multi_segment: bool,
    segment_count: i32,
    duration_seconds: f64,
}

impl EamMessageRow {
    fn from_domain(e: &EamMessage) -> Result<Self> {
        Ok(Self {
            id: e.id.clone(),
            message_type: message_type_str(e.message_type).to_string(),
            header: e.header.clone(),
            message_body: e.message_body.clone(),
            message_length: e.message_length as i32,
            confidence_score: e.confidence_score as i16,
            first_detected: e.first_detected,
            last_detected: e.last_detected,
            repeat_count: e.repeat_count as i32,
            recording_ids: serde_json::to_value(&e.recording_ids).context("serializing recording ids")?,
            raw_transcription: e.raw_transcription.clone(),
            codeword: e.codeword.clone(),
            time_code: e.time_code.clone(),
            authentication: e.authentication.clone(),
            multi_segment: e.multi_segment,
            segment_count: e.segment_count as i32,
            duration_seconds: e.duration_seconds,
        })
    }

    fn into_domain(self) -> EamMessage {
        EamMessage {
            id: self.id,
            message_type: message_type_from_str(&self.message_type),
            header: self.header,
            message_body: self.message_body,
            message_length: self.message_length as usize,
            confidence_score: self.confidence_score as u8,
            first_detected: self.first_detected,
            last_detected: self.last_detected,
            repeat_count: self.repeat_count as u32,
            recording_ids: serde_json::from_value(self.recording_ids).unwrap_or_default(),
            raw_transcription: self.raw_transcription,
            codeword: self.codeword,
            time_code: self.time_code,
            authentication: self.authentication,
            multi_segment: self.multi_segment,
            segment_count: self.segment_count as u32,
            duration_seconds: self.duration_seconds,
        }
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = atc_recordings)]
struct AtcRecordingRow {
    segment_id: String,
    feed_id: String,
    recorded_at: DateTime<Utc>,
    duration_s: f64,
    transcription_text: Option<String>,
    transcription_confidence: Option<f64>,
}

impl AtcRecordingRow {
    fn from_domain(r: &AtcRecording) -> Self {
        Self {
            segment_id: r.segment_id.clone(),
            feed_id: r.feed_id.clone(),
            recorded_at: r.recorded_at,
            duration_s: r.duration_s,
            transcription_text: r.transcription_text.clone(),
            transcription_confidence: r.transcription_confidence,
        }
    }

    fn into_domain(self) -> AtcRecording {
        AtcRecording {
            segment_id: self.segment_id,
            feed_id: self.feed_id,
            recorded_at: self.recorded_at,
            duration_s: self.duration_s,
            transcription_text: self.transcription_text,
            transcription_confidence: self.transcription_confidence,
        }
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = settings)]
struct SettingRow {
    category: String,
    key: String,
    value: serde_json::Value,
    updated_at: DateTime<Utc>,
}

/// Diesel-backed implementation of [`Persistence`] against PostgreSQL.
#[derive(Clone)]
pub struct DieselPersistence {
    pool: PgPool,
}

impl DieselPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn connect(database_url: &str, max_size: u32) -> Result<Self> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder().max_size(max_size).build(manager).context("building persistence connection pool")?;
        Ok(Self::new(pool))
    }

    fn get_connection(&self) -> Result<PgPooledConnection> {
        self.pool.get().map_err(|e| anyhow::anyhow!("failed to get database connection: {e}"))
    }
}

#[async_trait]
impl Persistence for DieselPersistence {
    async fn save_message(&self, msg: &CanonicalMessage) -> Result<()> {
        let row = MessageRow::from_canonical(msg)?;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            diesel::insert_into(messages::table).values(&row).execute(&mut conn)?;
            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("save_message task panicked")??;
        Ok(())
    }

    async fn update_aircraft_tracking(&self, msg: &CanonicalMessage) -> Result<()> {
        // Folded into save_aircraft_track by callers: the processor always
        // upserts the in-memory Track first and persists the resulting
        // snapshot, so this is a thin pass-through kept for interface
        // parity with spec.md's named operation.
        let _ = msg;
        Ok(())
    }

    async fn save_aircraft_track(&self, track: &Track) -> Result<()> {
        let row = AircraftTrackRow::from_track(track)?;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            diesel::insert_into(aircraft_tracks::table)
                .values(&row)
                .on_conflict(aircraft_tracks::aircraft_id)
                .do_update()
                .set(&row)
                .execute(&mut conn)?;
            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("save_aircraft_track task panicked")??;
        Ok(())
    }

    async fn get_aircraft_by_identifier(&self, aircraft_id: &str) -> Result<Option<Track>> {
        let aircraft_id = aircraft_id.to_string();
        let pool = self.pool.clone();
        let row: Option<AircraftTrackRow> = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            aircraft_tracks::table
                .filter(aircraft_tracks::aircraft_id.eq(&aircraft_id))
                .select(AircraftTrackRow::as_select())
                .first(&mut conn)
                .optional()
                .map_err(anyhow::Error::from)
        })
        .await
        .context("get_aircraft_by_identifier task panicked")??;
        Ok(row.map(AircraftTrackRow::into_track))
    }

    async fn get_aircraft_positions(&self) -> Result<Vec<Track>> {
        let pool = self.pool.clone();
        let rows: Vec<AircraftTrackRow> = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            aircraft_tracks::table.select(AircraftTrackRow::as_select()).load(&mut conn).map_err(anyhow::Error::from)
        })
        .await
        .context("get_aircraft_positions task panicked")??;
        Ok(rows.into_iter().map(AircraftTrackRow::into_track).collect())
    }

    async fn save_hfgcs_aircraft(&self, aircraft: &HfgcsAircraft) -> Result<()> {
        let row = HfgcsAircraftRow::from_domain(aircraft);
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            diesel::insert_into(hfgcs_aircraft::table)
                .values(&row)
                .on_conflict(hfgcs_aircraft::aircraft_id)
                .do_update()
                .set(&row)
                .execute(&mut conn)?;
            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("save_hfgcs_aircraft task panicked")??;
        Ok(())
    }

    async fn get_active_hfgcs_aircraft(&self, limit: i64, hours_back: i64) -> Result<Vec<HfgcsAircraft>> {
        let since = Utc::now() - chrono::Duration::hours(hours_back);
        let pool = self.pool.clone();
        let rows: Vec<HfgcsAircraftRow> = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            hfgcs_aircraft::table
                .filter(hfgcs_aircraft::last_seen.ge(since))
                .order(hfgcs_aircraft::last_seen.desc())
                .limit(limit)
                .select(HfgcsAircraftRow::as_select())
                .load(&mut conn)
                .map_err(anyhow::Error::from)
        })
        .await
        .context("get_active_hfgcs_aircraft task panicked")??;
        Ok(rows.into_iter().map(HfgcsAircraftRow::into_domain).collect())
    }

    async fn get_hfgcs_statistics(&self) -> Result<HfgcsStatistics> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let total: i64 = hfgcs_aircraft::table.count().get_result(&mut conn)?;
            let rows: Vec<(String, i64)> = hfgcs_aircraft::table
                .group_by(hfgcs_aircraft::aircraft_type)
                .select((hfgcs_aircraft::aircraft_type, diesel::dsl::count(hfgcs_aircraft::aircraft_id)))
                .load(&mut conn)?;
            Ok::<HfgcsStatistics, anyhow::Error>(HfgcsStatistics { total_aircraft: total, by_type: rows })
        })
        .await
        .context("get_hfgcs_statistics task panicked")?
    }

    async fn save_eam_message(&self, eam: &EamMessage) -> Result<()> {
        let row = EamMessageRow::from_domain(eam)?;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            diesel::insert_into(eam_messages::table)
                .values(&row)
                .on_conflict(eam_messages::id)
                .do_update()
                .set(&row)
                .execute(&mut conn)?;
            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("save_eam_message task panicked")??;
        Ok(())
    }

    async fn update_eam_repeat(&self, id: &str, recording_ids: &[String]) -> Result<()> {
        let id = id.to_string();
        let recording_ids = serde_json::to_value(recording_ids).context("serializing recording ids")?;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            diesel::update(eam_messages::table.filter(eam_messages::id.eq(&id)))
                .set((
                    eam_messages::recording_ids.eq(recording_ids),
                    eam_messages::repeat_count.eq(eam_messages::repeat_count + 1),
                    eam_messages::last_detected.eq(diesel::dsl::now),
                ))
                .execute(&mut conn)?;
            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("update_eam_repeat task panicked")??;
        Ok(())
    }

    async fn get_eam_messages(&self, opts: &EamQueryOptions) -> Result<Vec<EamMessage>> {
        let opts = opts.clone();
        let pool = self.pool.clone();
        let rows: Vec<EamMessageRow> = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let mut query = eam_messages::table.into_boxed();
            if let Some(kind) = opts.message_type {
                query = query.filter(eam_messages::message_type.eq(message_type_str(kind)));
            }
            if let Some(since) = opts.since {
                query = query.filter(eam_messages::last_detected.ge(since));
            }
            query
                .order(eam_messages::last_detected.desc())
                .limit(if opts.limit > 0 { opts.limit } else { 100 })
                .select(EamMessageRow::as_select())
                .load(&mut conn)
                .map_err(anyhow::Error::from)
        })
        .await
        .context("get_eam_messages task panicked")??;
        Ok(rows.into_iter().map(EamMessageRow::into_domain).collect())
    }

    async fn search_eams(&self, query: &str, limit: i64) -> Result<Vec<EamMessage>> {
        let pattern = format!("%{query}%");
        let pool = self.pool.clone();
        let rows: Vec<EamMessageRow> = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            eam_messages::table
                .filter(eam_messages::message_body.ilike(&pattern).or(eam_messages::header.ilike(&pattern)))
                .order(eam_messages::last_detected.desc())
                .limit(limit)
                .select(EamMessageRow::as_select())
                .load(&mut conn)
                .map_err(anyhow::Error::from)
        })
        .await
        .context("search_eams task panicked")??;
        Ok(rows.into_iter().map(EamMessageRow::into_domain).collect())
    }

    async fn clear_eams(&self, older_than_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
        let pool = self.pool.clone();
        let deleted: usize = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            diesel::delete(eam_messages::table.filter(eam_messages::last_detected.lt(cutoff))).execute(&mut conn).map_err(anyhow::Error::from)
        })
        .await
        .context("clear_eams task panicked")??;
        Ok(deleted as u64)
    }

    async fn save_atc_recording(&self, recording: &AtcRecording) -> Result<()> {
        let row = AtcRecordingRow::from_domain(recording);
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            diesel::insert_into(atc_recordings::table)
                .values(&row)
                .on_conflict(atc_recordings::segment_id)
                .do_update()
                .set(&row)
                .execute(&mut conn)?;
            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("save_atc_recording task panicked")??;
        Ok(())
    }

    async fn update_recording_transcription(&self, segment_id: &str, data: &TranscriptionUpdate) -> Result<()> {
        let segment_id = segment_id.to_string();
        let text = data.text.clone();
        let confidence = data.confidence;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            diesel::update(atc_recordings::table.filter(atc_recordings::segment_id.eq(&segment_id)))
                .set((atc_recordings::transcription_text.eq(Some(text)), atc_recordings::transcription_confidence.eq(Some(confidence))))
                .execute(&mut conn)?;
            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("update_recording_transcription task panicked")??;
        Ok(())
    }

    async fn get_recordings(&self, feed_id: Option<&str>, limit: i64) -> Result<Vec<AtcRecording>> {
        let feed_id = feed_id.map(|s| s.to_string());
        let pool = self.pool.clone();
        let rows: Vec<AtcRecordingRow> = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let mut query = atc_recordings::table.into_boxed();
            if let Some(feed_id) = feed_id {
                query = query.filter(atc_recordings::feed_id.eq(feed_id));
            }
            query
                .order(atc_recordings::recorded_at.desc())
                .limit(limit)
                .select(AtcRecordingRow::as_select())
                .load(&mut conn)
                .map_err(anyhow::Error::from)
        })
        .await
        .context("get_recordings task panicked")??;
        Ok(rows.into_iter().map(AtcRecordingRow::into_domain).collect())
    }

    async fn get_recordings_in_time_window(&self, feed_id: &str, center_ts: DateTime<Utc>, window_sec: i64) -> Result<Vec<AtcRecording>> {
        let feed_id = feed_id.to_string();
        let half_window = chrono::Duration::seconds(window_sec / 2);
        let (start, end) = (center_ts - half_window, center_ts + half_window);
        let pool = self.pool.clone();
        let rows: Vec<AtcRecordingRow> = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            atc_recordings::table
                .filter(atc_recordings::feed_id.eq(feed_id))
                .filter(atc_recordings::recorded_at.between(start, end))
                .order(atc_recordings::recorded_at.asc())
                .select(AtcRecordingRow::as_select())
                .load(&mut conn)
                .map_err(anyhow::Error::from)
        })
        .await
        .context("get_recordings_in_time_window task panicked")??;
        Ok(rows.into_iter().map(AtcRecordingRow::into_domain).collect())
    }

    async fn get_setting(&self, category: &str, key: &str) -> Result<Option<serde_json::Value>> {
        let category = category.to_string();
        let key = key.to_string();
        let pool = self.pool.clone();
        let row: Option<SettingRow> = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            settings::table
                .filter(settings::category.eq(&category))
                .filter(settings::key.eq(&key))
                .select(SettingRow::as_select())
                .first(&mut conn)
                .optional()
                .map_err(anyhow::Error::from)
        })
        .await
        .context("get_setting task panicked")??;
        Ok(row.map(|r| r.value))
    }

    async fn set_setting(&self, category: &str, key: &str, value: serde_json::Value) -> Result<()> {
        let row = SettingRow { category: category.to_string(), key: key.to_string(), value, updated_at: Utc::now() };
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            diesel::insert_into(settings::table)
                .values(&row)
                .on_conflict((settings::category, settings::key))
                .do_update()
                .set(&row)
                .execute(&mut conn)?;
            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("set_setting task panicked")??;
        Ok(())
    }

    async fn get_settings_by_category(&self, category: &str) -> Result<HashMap<String, serde_json::Value>> {
        let category = category.to_string();
        let pool = self.pool.clone();
        let rows: Vec<SettingRow> = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            settings::table.filter(settings::category.eq(&category)).select(SettingRow::as_select()).load(&mut conn).map_err(anyhow::Error::from)
        })
        .await
        .context("get_settings_by_category task panicked")??;
        Ok(rows.into_iter().map(|r| (r.key, r.value)).collect())
    }
}

/// In-memory fake used by pipeline tests that need a `Persistence`
/// implementation but not a database (§4.14/C14).
#[derive(Default)]
pub struct InMemoryPersistence {
    messages: Mutex<Vec<CanonicalMessage>>,
    tracks: Mutex<HashMap<String, Track>>,
    hfgcs: Mutex<HashMap<String, HfgcsAircraft>>,
    eams: Mutex<HashMap<String, EamMessage>>,
    recordings: Mutex<HashMap<String, AtcRecording>>,
    settings: Mutex<HashMap<(String, String), serde_json::Value>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn save_message(&self, msg: &CanonicalMessage) -> Result<()> {
        self.messages.lock().unwrap().push(msg.clone());
        Ok(())
    }

    async fn update_aircraft_tracking(&self, _msg: &CanonicalMessage) -> Result<()> {
        Ok(())
    }

    async fn save_aircraft_track(&self, track: &Track) -> Result<()> {
        self.tracks.lock().unwrap().insert(track.aircraft_id.clone(), track.clone());
        Ok(())
    }

    async fn get_aircraft_by_identifier(&self, aircraft_id: &str) -> Result<Option<Track>> {
        Ok(self.tracks.lock().unwrap().get(aircraft_id).cloned())
    }

    async fn get_aircraft_positions(&self) -> Result<Vec<Track>> {
        Ok(self.tracks.lock().unwrap().values().cloned().collect())
    }

    async fn save_hfgcs_aircraft(&self, aircraft: &HfgcsAircraft) -> Result<()> {
        self.hfgcs.lock().unwrap().insert(aircraft.aircraft_id.clone(), aircraft.clone());
        Ok(())
    }

    async fn get_active_hfgcs_aircraft(&self, limit: i64, hours_back: i64) -> Result<Vec<HfgcsAircraft>> {
        let since = Utc::now() - chrono::Duration::hours(hours_back);
        let mut out: Vec<HfgcsAircraft> = self.hfgcs.lock().unwrap().values().filter(|a| a.last_seen >= since).cloned().collect();
        out.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn get_hfgcs_statistics(&self) -> Result<HfgcsStatistics> {
        let guard = self.hfgcs.lock().unwrap();
        let mut by_type: HashMap<String, i64> = HashMap::new();
        for a in guard.values() {
            *by_type.entry(a.aircraft_type.clone()).or_insert(0) += 1;
        }
        Ok(HfgcsStatistics { total_aircraft: guard.len() as i64, by_type: by_type.into_iter().collect() })
    }

    async fn save_eam_message(&self, eam: &EamMessage) -> Result<()> {
        self.eams.lock().unwrap().insert(eam.id.clone(), eam.clone());
        Ok(())
    }

    async fn update_eam_repeat(&self, id: &str, recording_ids: &[String]) -> Result<()> {
        if let Some(e) = self.eams.lock().unwrap().get_mut(id) {
            e.recording_ids = recording_ids.to_vec();
            e.repeat_count += 1;
            e.last_detected = Utc::now();
        }
        Ok(())
    }

    async fn get_eam_messages(&self, opts: &EamQueryOptions) -> Result<Vec<EamMessage>> {
        let guard = self.eams.lock().unwrap();
        let mut out: Vec<EamMessage> = guard
            .values()
            .filter(|e| opts.message_type.is_none_or(|t| t == e.message_type))
            .filter(|e| opts.since.is_none_or(|since| e.last_detected >= since))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.last_detected.cmp(&a.last_detected));
        if opts.limit > 0 {
            out.truncate(opts.limit as usize);
        }
        Ok(out)
    }

    async fn search_eams(&self, query: &str, limit: i64) -> Result<Vec<EamMessage>> {
        let needle = query.to_uppercase();
        let mut out: Vec<EamMessage> =
            self.eams.lock().unwrap().values().filter(|e| e.message_body.contains(&needle) || e.header.contains(&needle)).cloned().collect();
        out.sort_by(|a, b| b.last_detected.cmp(&a.last_detected));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn clear_eams(&self, older_than_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
        let mut guard = self.eams.lock().unwrap();
        let before = guard.len();
        guard.retain(|_, e| e.last_detected >= cutoff);
        Ok((before - guard.len()) as u64)
    }

    async fn save_atc_recording(&self, recording: &AtcRecording) -> Result<()> {
        self.recordings.lock().unwrap().insert(recording.segment_id.clone(), recording.clone());
        Ok(())
    }

    async fn update_recording_transcription(&self, segment_id: &str, data: &TranscriptionUpdate) -> Result<()> {
        if let Some(r) = self.recordings.lock().unwrap().get_mut(segment_id) {
            r.transcription_text = Some(data.text.clone());
            r.transcription_confidence = Some(data.confidence);
        }
        Ok(())
    }

    async fn get_recordings(&self, feed_id: Option<&str>, limit: i64) -> Result<Vec<AtcRecording>> {
        let mut out: Vec<AtcRecording> =
            self.recordings.lock().unwrap().values().filter(|r| feed_id.is_none_or(|f| r.feed_id == f)).cloned().collect();
        out.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn get_recordings_in_time_window(&self, feed_id: &str, center_ts: DateTime<Utc>, window_sec: i64) -> Result<Vec<AtcRecording>> {
        let half_window = chrono::Duration::seconds(window_sec / 2);
        let (start, end) = (center_ts - half_window, center_ts + half_window);
        let mut out: Vec<AtcRecording> =
            self.recordings.lock().unwrap().values().filter(|r| r.feed_id == feed_id && r.recorded_at >= start && r.recorded_at <= end).cloned().collect();
        out.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(out)
    }

    async fn get_setting(&self, category: &str, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.settings.lock().unwrap().get(&(category.to_string(), key.to_string())).cloned())
    }

    async fn set_setting(&self, category: &str, key: &str, value: serde_json::Value) -> Result<()> {
        self.settings.lock().unwrap().insert((category.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn get_settings_by_category(&self, category: &str) -> Result<HashMap<String, serde_json::Value>> {
        Ok(self.settings.lock().unwrap().iter().filter(|((c, _), _)| c == category).map(|((_, k), v)| (k.clone(), v.clone())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hfgcs::DetectionMethod;

    fn hfgcs_aircraft(id: &str, kind: &str, last_seen: DateTime<Utc>) -> HfgcsAircraft {
        HfgcsAircraft {
            aircraft_id: id.to_string(),
            aircraft_type: kind.to_string(),
            hex: Some("ae0c70".to_string()),
            callsign: Some("IRON91".to_string()),
            tail: None,
            first_detected: last_seen,
            last_seen,
            total_messages: 1,
            detection_method: DetectionMethod::HexRange,
        }
    }

    #[tokio::test]
    async fn in_memory_fake_round_trips_hfgcs_aircraft() {
        let store = InMemoryPersistence::new();
        let a = hfgcs_aircraft("a1", "E-6B", Utc::now());
        store.save_hfgcs_aircraft(&a).await.unwrap();

        let active = store.get_active_hfgcs_aircraft(10, 24).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].aircraft_id, "a1");

        let stats = store.get_hfgcs_statistics().await.unwrap();
        assert_eq!(stats.total_aircraft, 1);
    }

    #[tokio::test]
    async fn in_memory_fake_filters_stale_hfgcs_aircraft() {
        let store = InMemoryPersistence::new();
        let stale = hfgcs_aircraft("old", "E-4B", Utc::now() - chrono::Duration::hours(48));
        store.save_hfgcs_aircraft(&stale).await.unwrap();

        let active = store.get_active_hfgcs_aircraft(10, 24).await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn in_memory_fake_settings_roundtrip() {
        let store = InMemoryPersistence::new();
        store.set_setting("adapters", "poll_interval_ms", serde_json::json!(5000)).await.unwrap();
        let v = store.get_setting("adapters", "poll_interval_ms").await.unwrap().unwrap();
        assert_eq!(v, serde_json::json!(5000));

        let category = store.get_settings_by_category("adapters").await.unwrap();
        assert_eq!(category.len(), 1);
    }

    #[tokio::test]
    async fn in_memory_fake_clears_eams_older_than_cutoff() {
        let store = InMemoryPersistence::new();
        let old = EamMessage {
            id: "eam-1".into(),
            message_type: EamMessageType::Eam,
            header: "PIANO".into(),
            message_body: "ABCDE".into(),
            message_length: 5,
            confidence_score: 80,
            first_detected: Utc::now() - chrono::Duration::days(10),
            last_detected: Utc::now() - chrono::Duration::days(10),
            repeat_count: 1,
            recording_ids: vec!["s1".into()],
            raw_transcription: "PIANO ABCDE PIANO".into(),
            codeword: None,
            time_code: None,
            authentication: None,
            multi_segment: false,
            segment_count: 1,
            duration_seconds: 5.0,
        };
        store.save_eam_message(&old).await.unwrap();

        let removed = store.clear_eams(7).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_eam_messages(&EamQueryOptions::default()).await.unwrap().is_empty());
    }
}
