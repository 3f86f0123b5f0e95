//! Deduplicator (§4.6): compares a newly promoted draft's normalized body
//! against recently promoted EAMs of the same type and merges repeats
//! instead of inserting duplicate rows.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::aggregator::ClosedDraft;
use super::types::{EamMessage, EamMessageType};

pub const DEFAULT_LOOKBACK_COUNT: usize = 20;
pub const DEFAULT_LOOKBACK_WINDOW_SECS: i64 = 3600;

/// Outcome of running a closed draft through the deduplicator.
pub enum DedupOutcome {
    /// Score was below the promotion threshold; nothing is emitted.
    BelowThreshold,
    /// A genuinely new EAM.
    New(EamMessage),
    /// A repeat of `existing_id`; the caller should merge and re-save.
    Repeat { existing_id: String, merged: EamMessage },
}

/// Collapse runs of whitespace so two transcriptions that differ only in
/// spacing compare equal.
fn collapse_whitespace(body: &str) -> String {
    body.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct Deduplicator {
    lookback_count: usize,
    lookback_window: ChronoDuration,
}

impl Deduplicator {
    pub fn new(lookback_count: usize, lookback_window: ChronoDuration) -> Self {
        Self { lookback_count, lookback_window }
    }

    /// `recent` should be the caller's most recent EAMs of the same
    /// message type, newest first, already filtered to a reasonable
    /// upper bound — this method applies the count/window limits itself
    /// so callers can pass a slightly larger candidate set cheaply.
    pub fn evaluate(
        &self,
        draft: ClosedDraft,
        promotion_threshold: u8,
        recent: &[EamMessage],
        id_for_new: impl FnOnce() -> String,
        now: DateTime<Utc>,
    ) -> DedupOutcome {
        if draft.confidence_score < promotion_threshold {
            return DedupOutcome::BelowThreshold;
        }

        let normalized = collapse_whitespace(&draft.body);
        let candidate = recent
            .iter()
            .take(self.lookback_count)
            .filter(|e| now - e.last_detected <= self.lookback_window)
            .find(|e| collapse_whitespace(&e.message_body) == normalized);

        if let Some(existing) = candidate {
            let mut merged = existing.clone();
            merged.last_detected = draft.last_detected.max(merged.last_detected);
            merged.repeat_count += 1;
            for id in &draft.recording_ids {
                merged.add_recording_id(id.clone());
            }
            return DedupOutcome::Repeat { existing_id: existing.id.clone(), merged };
        }

        let message_body = normalized;
        let message_length = message_body.chars().filter(|c| !c.is_whitespace()).count();

        DedupOutcome::New(EamMessage {
            id: id_for_new(),
            message_type: draft.message_type,
            header: draft.header,
            message_body,
            message_length,
            confidence_score: draft.confidence_score,
            first_detected: draft.first_detected,
            last_detected: draft.last_detected,
            repeat_count: 1,
            recording_ids: draft.recording_ids,
            raw_transcription: draft.raw_transcription,
            codeword: draft.codeword,
            time_code: draft.time_code,
            authentication: draft.authentication,
            multi_segment: draft.multi_segment,
            segment_count: draft.segment_count,
            duration_seconds: draft.duration_seconds,
        })
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKBACK_COUNT, ChronoDuration::seconds(DEFAULT_LOOKBACK_WINDOW_SECS))
    }
}
