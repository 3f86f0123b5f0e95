//! The tagged event union the broadcast hub (C7) fans out to subscribers,
//! and that the trackers and EAM pipeline construct. Collapses the
//! "cross-component callbacks via loosely-typed event emitters" redesign
//! flag (spec.md §9) into one typed enum delivered over a bounded queue.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::eam::types::EamMessage;
use crate::hfgcs::HfgcsAircraft;
use crate::message::CanonicalMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HfgcsLifecycleEvent {
    Detected,
    Updated,
    Lost,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SubscriptionEvent {
    #[serde(rename = "connection")]
    Connection { data: ConnectionInfo, timestamp: DateTime<Utc> },

    #[serde(rename = "acars")]
    Acars { data: CanonicalMessage, timestamp: DateTime<Utc> },

    #[serde(rename = "adsb")]
    Adsb { data: CanonicalMessage, timestamp: DateTime<Utc> },

    #[serde(rename = "adsb_batch")]
    AdsbBatch { data: Vec<CanonicalMessage>, count: usize, timestamp: DateTime<Utc> },

    #[serde(rename = "hfgcs_aircraft")]
    HfgcsAircraft { event: HfgcsLifecycleEvent, data: HfgcsAircraftView, timestamp: DateTime<Utc> },

    #[serde(rename = "eam_detected")]
    EamDetected { data: EamMessage, timestamp: DateTime<Utc> },

    #[serde(rename = "skyking_detected")]
    SkykingDetected { data: EamMessage, timestamp: DateTime<Utc> },

    #[serde(rename = "eam_repeat_detected")]
    EamRepeatDetected { data: EamMessage, timestamp: DateTime<Utc> },

    #[serde(rename = "conflict_detected")]
    ConflictDetected { data: ConflictInfo, timestamp: DateTime<Utc> },

    #[serde(rename = "conflict_updated")]
    ConflictUpdated { data: ConflictInfo, timestamp: DateTime<Utc> },

    #[serde(rename = "conflict_resolved")]
    ConflictResolved { data: ConflictInfo, timestamp: DateTime<Utc> },

    #[serde(rename = "transcription")]
    Transcription { data: TranscriptionInfo, timestamp: DateTime<Utc> },

    #[serde(rename = "recording_started")]
    RecordingStarted { data: RecordingInfo, timestamp: DateTime<Utc> },

    #[serde(rename = "recording_stopped")]
    RecordingStopped { data: RecordingInfo, timestamp: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub subscriber_id: String,
    pub message: String,
}

/// Narrow, serializable view of an [`HfgcsAircraft`] suitable for the wire.
#[derive(Debug, Clone, Serialize)]
pub struct HfgcsAircraftView {
    pub aircraft_id: String,
    pub aircraft_type: String,
    pub hex: Option<String>,
    pub callsign: Option<String>,
    pub tail: Option<String>,
    pub first_detected: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_messages: u64,
}

impl From<&HfgcsAircraft> for HfgcsAircraftView {
    fn from(a: &HfgcsAircraft) -> Self {
        Self {
            aircraft_id: a.aircraft_id.clone(),
            aircraft_type: a.aircraft_type.clone(),
            hex: a.hex.clone(),
            callsign: a.callsign.clone(),
            tail: a.tail.clone(),
            first_detected: a.first_detected,
            last_seen: a.last_seen,
            total_messages: a.total_messages,
        }
    }
}

/// Out of the core's scope (spec.md §1 non-goals exclude trajectory
/// modeling/conflict detection logic), but the wire shape is part of the
/// subscriber protocol (§3) so the hub can still relay conflict events
/// raised by an external collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictInfo {
    pub conflict_id: String,
    pub aircraft_ids: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionInfo {
    pub segment_id: String,
    pub feed_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingInfo {
    pub segment_id: String,
    pub feed_id: String,
}

impl SubscriptionEvent {
    /// Every direct-path event (everything but `adsb`, which is folded
    /// into batches by the hub) is dispatched immediately, one send per
    /// subscriber, per §4.7.
    pub fn is_batched(&self) -> bool {
        matches!(self, SubscriptionEvent::Adsb { .. })
    }
}
