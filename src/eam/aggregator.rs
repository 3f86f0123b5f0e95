//! Aggregator (§4.6): reconstructs multi-segment EAM/SKYKING transmissions
//! from individual transcription segments within a time window, and scores
//! confidence on close.
//!
//! Grounded in the same "in-memory map owned by one actor" shape as
//! [`crate::aircraft_tracker::AircraftTracker`], specialized to drafts
//! keyed by `(feed_id, header)` instead of `hex`.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::preprocessor::DetectedEnvelope;
use super::types::{EamMessageType, TranscriptionSegment};

pub const DEFAULT_WINDOW_SECS: i64 = 120;
pub const DEFAULT_PROMOTION_THRESHOLD: u8 = 50;

#[derive(Debug, Clone)]
struct Draft {
    kind: EamMessageType,
    header: String,
    body_parts: Vec<String>,
    codeword: Option<String>,
    time_code: Option<String>,
    authentication: Option<String>,
    segment_ids: Vec<String>,
    confidences: Vec<f64>,
    total_duration_s: f64,
    opened_at: DateTime<Utc>,
    last_extended_at: DateTime<Utc>,
}

/// A draft that has closed (by sentinel or by window expiry) and is ready
/// to be scored and handed to the deduplicator.
#[derive(Debug, Clone)]
pub struct ClosedDraft {
    pub message_type: EamMessageType,
    pub header: String,
    pub body: String,
    pub codeword: Option<String>,
    pub time_code: Option<String>,
    pub authentication: Option<String>,
    pub recording_ids: Vec<String>,
    pub confidence_score: u8,
    pub multi_segment: bool,
    pub segment_count: u32,
    pub duration_seconds: f64,
    pub first_detected: DateTime<Utc>,
    pub last_detected: DateTime<Utc>,
    pub raw_transcription: String,
}

pub struct Aggregator {
    window: ChronoDuration,
    promotion_threshold: u8,
    drafts: HashMap<(String, String), Draft>,
    dropped_count: u64,
}

impl Aggregator {
    pub fn new(window: ChronoDuration, promotion_threshold: u8) -> Self {
        Self {
            window,
            promotion_threshold,
            drafts: HashMap::new(),
            dropped_count: 0,
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    /// Feeds one segment's detected envelope into the aggregator. Returns
    /// any draft that closed as a result. A segment whose own text carries
    /// the closing sentinel (`envelope.closes`) closes immediately,
    /// whether it opens a brand-new draft (a complete single-segment
    /// message) or terminates one already open; otherwise it opens or
    /// extends a draft that stays open until a later segment closes it or
    /// the window expires.
    pub fn ingest(
        &mut self,
        segment: &TranscriptionSegment,
        envelope: DetectedEnvelope,
    ) -> Option<ClosedDraft> {
        let key = (segment.feed_id.clone(), envelope.header.clone());

        if let Some(draft) = self.drafts.get_mut(&key) {
            draft.body_parts.push(envelope.body.clone());
            draft.segment_ids.push(segment.segment_id.clone());
            draft.confidences.push(segment.confidence);
            draft.total_duration_s += segment.duration_s;
            draft.last_extended_at = segment.timestamp;
            if envelope.codeword.is_some() {
                draft.codeword = envelope.codeword;
            }
            if envelope.time_code.is_some() {
                draft.time_code = envelope.time_code;
            }
            if envelope.authentication.is_some() {
                draft.authentication = envelope.authentication;
            }

            // The EAM sentinel is a segment that itself closes (a second
            // announcement of the header); for SKYKING, a fully-formed
            // envelope (auth present) closes it regardless.
            let sentinel = envelope.closes
                || (envelope.kind == EamMessageType::SkyKing && draft.authentication.is_some());

            if sentinel {
                let draft = self.drafts.remove(&key).unwrap();
                return Some(self.close(draft));
            }
            return None;
        }

        let new_draft = Draft {
            kind: envelope.kind,
            header: envelope.header,
            body_parts: vec![envelope.body],
            codeword: envelope.codeword,
            time_code: envelope.time_code,
            authentication: envelope.authentication,
            segment_ids: vec![segment.segment_id.clone()],
            confidences: vec![segment.confidence],
            total_duration_s: segment.duration_s,
            opened_at: segment.timestamp,
            last_extended_at: segment.timestamp,
        };

        if envelope.closes {
            return Some(self.close(new_draft));
        }

        self.drafts.insert(key, new_draft);
        None
    }

    /// Drops drafts that have sat open past `2 * window` without closing
    /// (§4.6 failure semantics), incrementing the drop counter silently.
    pub fn expire(&mut self, now: DateTime<Utc>) {
        let stale_keys: Vec<(String, String)> = self
            .drafts
            .iter()
            .filter(|(_, d)| now - d.last_extended_at > self.window * 2)
            .map(|(k, _)| k.clone())
            .collect();

        for key in stale_keys {
            self.drafts.remove(&key);
            self.dropped_count += 1;
        }
    }

    /// Drafts that have been open at least `window` without a sentinel are
    /// closed by expiry and scored as-is.
    pub fn close_expired(&mut self, now: DateTime<Utc>) -> Vec<ClosedDraft> {
        let due_keys: Vec<(String, String)> = self
            .drafts
            .iter()
            .filter(|(_, d)| now - d.opened_at >= self.window)
            .map(|(k, _)| k.clone())
            .collect();

        due_keys
            .into_iter()
            .filter_map(|key| self.drafts.remove(&key))
            .map(|d| self.close(d))
            .collect()
    }

    fn close(&self, draft: Draft) -> ClosedDraft {
        let body = draft.body_parts.join(" ");
        let score = Self::score(&draft);
        let raw_transcription = format!("{} {} {}", draft.header, body, draft.header);

        ClosedDraft {
            message_type: draft.kind,
            header: draft.header,
            body,
            codeword: draft.codeword,
            time_code: draft.time_code,
            authentication: draft.authentication,
            recording_ids: draft.segment_ids,
            confidence_score: score,
            multi_segment: draft.confidences.len() > 1,
            segment_count: draft.confidences.len() as u32,
            duration_seconds: draft.total_duration_s,
            first_detected: draft.opened_at,
            last_detected: draft.last_extended_at,
            raw_transcription,
        }
    }

    /// §4.6 scoring: header recognition (0..40) + body grouping
    /// regularity (0..30) + average segment transcription confidence
    /// (0..30).
    fn score(draft: &Draft) -> u8 {
        let header_score = if draft.header.is_empty() { 0.0 } else { 40.0 };

        let regular_groups = draft
            .body_parts
            .iter()
            .flat_map(|part| part.split_whitespace())
            .filter(|group| group.len() == 5)
            .count();
        let total_groups = draft
            .body_parts
            .iter()
            .flat_map(|part| part.split_whitespace())
            .count()
            .max(1);
        let grouping_score = 30.0 * (regular_groups as f64 / total_groups as f64);

        let avg_confidence = if draft.confidences.is_empty() {
            0.0
        } else {
            draft.confidences.iter().sum::<f64>() / draft.confidences.len() as f64
        };
        let confidence_score = 30.0 * avg_confidence.clamp(0.0, 1.0);

        (header_score + grouping_score + confidence_score).round().clamp(0.0, 100.0) as u8
    }

    pub fn promotion_threshold(&self) -> u8 {
        self.promotion_threshold
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(ChronoDuration::seconds(DEFAULT_WINDOW_SECS), DEFAULT_PROMOTION_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: &str, feed: &str, confidence: f64, ts: DateTime<Utc>) -> TranscriptionSegment {
        TranscriptionSegment {
            segment_id: id.to_string(),
            feed_id: feed.to_string(),
            timestamp: ts,
            text: String::new(),
            confidence,
            duration_s: 5.0,
        }
    }

    fn envelope(header: &str, body: &str, closes: bool) -> DetectedEnvelope {
        DetectedEnvelope {
            kind: EamMessageType::Eam,
            header: header.to_string(),
            body: body.to_string(),
            codeword: None,
            time_code: None,
            authentication: None,
            closes,
        }
    }

    #[test]
    fn three_segments_close_on_repeated_header_sentinel() {
        let mut agg = Aggregator::default();
        let now = Utc::now();

        assert!(agg.ingest(&segment("s1", "feed1", 0.9, now), envelope("8A8A8A", "ABCDE", false)).is_none());
        assert!(
            agg.ingest(&segment("s2", "feed1", 0.9, now + ChronoDuration::seconds(10)), envelope("8A8A8A", "FGHIJ", false))
                .is_none()
        );

        // The third segment is the sentinel: it restates the header a
        // second time, closing the draft opened by s1 and extended by s2.
        let closed = agg
            .ingest(&segment("s3", "feed1", 0.9, now + ChronoDuration::seconds(20)), envelope("8A8A8A", "KLMNO", true))
            .unwrap();

        assert_eq!(closed.segment_count, 3);
        assert!(closed.multi_segment);
        assert!(closed.confidence_score >= 50);
        assert_eq!(closed.recording_ids, vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn close_expired_scores_single_segment_draft() {
        let mut agg = Aggregator::new(ChronoDuration::seconds(60), DEFAULT_PROMOTION_THRESHOLD);
        let now = Utc::now();
        agg.ingest(&segment("s1", "feed1", 0.95, now), envelope("PIANO", "ABCDE FGHIJ", false));

        let closed = agg.close_expired(now + ChronoDuration::seconds(61));
        assert_eq!(closed.len(), 1);
        assert!(!closed[0].multi_segment);
    }

    #[test]
    fn drafts_older_than_double_window_are_dropped_silently() {
        let mut agg = Aggregator::new(ChronoDuration::seconds(60), DEFAULT_PROMOTION_THRESHOLD);
        let now = Utc::now();
        agg.ingest(&segment("s1", "feed1", 0.9, now), envelope("PIANO", "ABCDE", false));

        agg.expire(now + ChronoDuration::seconds(121));
        assert_eq!(agg.dropped_count(), 1);
        assert_eq!(agg.close_expired(now + ChronoDuration::seconds(121)).len(), 0);
    }
}
