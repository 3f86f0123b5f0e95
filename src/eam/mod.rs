//! EAM pipeline (C6): wires the preprocessor, aggregator, and deduplicator
//! into a single actor that owns its own `mpsc::Receiver<TranscriptionSegment>`,
//! per the "third actor" redesign note (spec.md §9) — no shared lock with
//! the aircraft/HFGCS trackers.

pub mod aggregator;
pub mod deduplicator;
pub mod preprocessor;
pub mod types;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration as StdDuration};
use tracing::{info, warn};

use crate::hub_events::SubscriptionEvent;
use aggregator::Aggregator;
use deduplicator::{DedupOutcome, Deduplicator};
use preprocessor::Preprocessor;
use types::{EamMessage, EamMessageType, TranscriptionSegment};

/// How often the pipeline sweeps for drafts that should close by expiry
/// rather than by sentinel, and for drafts stale enough to drop.
const SWEEP_INTERVAL_SECS: u64 = 10;
/// How many promoted messages per type the pipeline keeps in memory for
/// the deduplicator's lookback window, independent of persistence.
const RECENT_CACHE_CAP: usize = 64;

pub struct EamPipelineConfig {
    pub known_headers: Vec<String>,
    pub window: ChronoDuration,
    pub promotion_threshold: u8,
    pub lookback_count: usize,
    pub lookback_window: ChronoDuration,
}

impl Default for EamPipelineConfig {
    fn default() -> Self {
        Self {
            known_headers: Vec::new(),
            window: ChronoDuration::seconds(aggregator::DEFAULT_WINDOW_SECS),
            promotion_threshold: aggregator::DEFAULT_PROMOTION_THRESHOLD,
            lookback_count: deduplicator::DEFAULT_LOOKBACK_COUNT,
            lookback_window: ChronoDuration::seconds(deduplicator::DEFAULT_LOOKBACK_WINDOW_SECS),
        }
    }
}

/// Outcome of handing one promoted/repeated draft downstream, surfaced for
/// callers that need it (tests, persistence) without re-deriving it from
/// the dispatched event.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    BelowThreshold,
    New(EamMessage),
    Repeat(EamMessage),
}

pub struct EamPipeline {
    preprocessor: Preprocessor,
    aggregator: Aggregator,
    deduplicator: Deduplicator,
    recent_eam: Vec<EamMessage>,
    recent_skyking: Vec<EamMessage>,
    persistence: mpsc::Sender<EamMessage>,
    hub: mpsc::Sender<SubscriptionEvent>,
    next_id: u64,
}

impl EamPipeline {
    pub fn new(config: EamPipelineConfig, persistence: mpsc::Sender<EamMessage>, hub: mpsc::Sender<SubscriptionEvent>) -> Self {
        Self {
            preprocessor: Preprocessor::new(config.known_headers),
            aggregator: Aggregator::new(config.window, config.promotion_threshold),
            deduplicator: Deduplicator::new(config.lookback_count, config.lookback_window),
            recent_eam: Vec::new(),
            recent_skyking: Vec::new(),
            persistence,
            hub,
            next_id: 0,
        }
    }

    fn next_segment_closed_id(&mut self) -> String {
        self.next_id += 1;
        format!("eam-{}", self.next_id)
    }

    fn recent_for(&self, kind: EamMessageType) -> &[EamMessage] {
        match kind {
            EamMessageType::Eam => &self.recent_eam,
            EamMessageType::SkyKing => &self.recent_skyking,
        }
    }

    fn remember(&mut self, msg: &EamMessage) {
        let bucket = match msg.message_type {
            EamMessageType::Eam => &mut self.recent_eam,
            EamMessageType::SkyKing => &mut self.recent_skyking,
        };
        bucket.retain(|m| m.id != msg.id);
        bucket.insert(0, msg.clone());
        bucket.truncate(RECENT_CACHE_CAP);
    }

    /// Feeds one transcription segment through preprocessing and the
    /// aggregator, promoting and dispatching any draft it closes.
    pub async fn ingest_segment(&mut self, segment: TranscriptionSegment) -> Option<PipelineOutcome> {
        let envelope = self.preprocessor.detect(&segment.text)?;
        let closed = self.aggregator.ingest(&segment, envelope)?;
        Some(self.promote(closed).await)
    }

    async fn promote(&mut self, closed: aggregator::ClosedDraft) -> PipelineOutcome {
        let kind = closed.message_type;
        let threshold = self.aggregator.promotion_threshold();
        let recent = self.recent_for(kind).to_vec();
        let now = Utc::now();

        let outcome = self.deduplicator.evaluate(closed, threshold, &recent, || self.next_segment_closed_id(), now);

        match outcome {
            DedupOutcome::BelowThreshold => PipelineOutcome::BelowThreshold,
            DedupOutcome::New(msg) => {
                self.remember(&msg);
                self.dispatch_new(&msg).await;
                PipelineOutcome::New(msg)
            }
            DedupOutcome::Repeat { merged, .. } => {
                self.remember(&merged);
                self.dispatch_repeat(&merged).await;
                PipelineOutcome::Repeat(merged)
            }
        }
    }

    async fn dispatch_new(&self, msg: &EamMessage) {
        let event = match msg.message_type {
            EamMessageType::Eam => SubscriptionEvent::EamDetected { data: msg.clone(), timestamp: Utc::now() },
            EamMessageType::SkyKing => SubscriptionEvent::SkykingDetected { data: msg.clone(), timestamp: Utc::now() },
        };
        if self.persistence.send(msg.clone()).await.is_err() {
            warn!(eam_id = %msg.id, "persistence channel closed, dropping save");
        }
        if self.hub.send(event).await.is_err() {
            warn!(eam_id = %msg.id, "hub channel closed, dropping broadcast");
        }
        info!(eam_id = %msg.id, header = %msg.header, score = msg.confidence_score, "promoted new message");
    }

    async fn dispatch_repeat(&self, msg: &EamMessage) {
        let event = SubscriptionEvent::EamRepeatDetected { data: msg.clone(), timestamp: Utc::now() };
        if self.persistence.send(msg.clone()).await.is_err() {
            warn!(eam_id = %msg.id, "persistence channel closed, dropping repeat update");
        }
        if self.hub.send(event).await.is_err() {
            warn!(eam_id = %msg.id, "hub channel closed, dropping repeat broadcast");
        }
        info!(eam_id = %msg.id, repeat_count = msg.repeat_count, "repeat detected");
    }

    /// Closes any draft that has aged past its window without a sentinel,
    /// and drops drafts aged past twice that without ever closing.
    pub async fn sweep(&mut self) {
        let now = Utc::now();
        let due = self.aggregator.close_expired(now);
        for closed in due {
            self.promote(closed).await;
        }
        self.aggregator.expire(now);
    }

    /// Runs the pipeline as its own task: consumes segments until the
    /// channel closes, sweeping for expired drafts on a fixed interval.
    pub async fn run(mut self, mut segments: mpsc::Receiver<TranscriptionSegment>) {
        let mut sweep_timer = interval(StdDuration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            tokio::select! {
                maybe_segment = segments.recv() => {
                    match maybe_segment {
                        Some(segment) => { self.ingest_segment(segment).await; }
                        None => {
                            info!("transcription segment channel closed, stopping EAM pipeline");
                            break;
                        }
                    }
                }
                _ = sweep_timer.tick() => {
                    self.sweep().await;
                }
            }
        }
    }
}
