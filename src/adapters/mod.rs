//! Source adapters (C1): one task per external feed, all implementing the
//! same narrow capability set so the source manager (C2) can drive them
//! without knowing their transport.

pub mod http_pull;
pub mod interval_fetch;
pub mod ws_push;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// A raw record handed from an adapter to the message processor (C3),
/// still in the adapter's own shape. The processor is the single place
/// that knows how to coerce each `source_type` into a `CanonicalMessage`.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub source_name: String,
    pub source_type: crate::message::SourceType,
    pub received_at: DateTime<Utc>,
    pub payload: Value,
}

/// Point-in-time status snapshot for a source adapter.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AdapterStatus {
    pub enabled: bool,
    pub connected: bool,
    pub messages: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// The capability set every adapter implements (duck-typed polymorphism
/// redesign flag in spec.md §9, collapsed into one trait object).
///
/// `start`/`stop` are idempotent: calling `start` on an already-started
/// adapter, or `stop` on an already-stopped one, is a no-op (invariant R1).
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self);

    async fn stop(&self);

    async fn status(&self) -> AdapterStatus;
}
