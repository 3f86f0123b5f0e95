//! Shared types for the EAM pipeline (C6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single voice-transcription segment handed to the pipeline by the
/// (out-of-scope) transcription engine.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionSegment {
    pub segment_id: String,
    pub feed_id: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub confidence: f64,
    pub duration_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EamMessageType {
    Eam,
    SkyKing,
}

/// A promoted, deduplicated emergency action message.
#[derive(Debug, Clone, Serialize)]
pub struct EamMessage {
    pub id: String,
    pub message_type: EamMessageType,
    pub header: String,
    /// Uppercase letter/digit stream grouped into 5-character blocks.
    pub message_body: String,
    pub message_length: usize,
    pub confidence_score: u8,
    pub first_detected: DateTime<Utc>,
    pub last_detected: DateTime<Utc>,
    pub repeat_count: u32,
    /// Ordered, deduplicated source segment IDs.
    pub recording_ids: Vec<String>,
    pub raw_transcription: String,
    pub codeword: Option<String>,
    pub time_code: Option<String>,
    pub authentication: Option<String>,
    pub multi_segment: bool,
    pub segment_count: u32,
    pub duration_seconds: f64,
}

impl EamMessage {
    /// Invariant: a repeated EAM's `recording_ids` count is never smaller
    /// than its `repeat_count`, and `last_detected >= first_detected`.
    pub fn invariants_hold(&self) -> bool {
        self.last_detected >= self.first_detected
            && (self.repeat_count <= 1 || self.recording_ids.len() as u32 >= self.repeat_count)
    }

    pub fn add_recording_id(&mut self, id: String) {
        if !self.recording_ids.contains(&id) {
            self.recording_ids.push(id);
        }
    }
}
