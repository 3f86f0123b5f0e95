//! Error taxonomy shared across the ingestion and fan-out pipeline.
//!
//! Components return `anyhow::Result` at their public boundaries (matching
//! the rest of the crate's error-handling style) but construct `HubError`
//! variants internally so callers can match on category to decide policy:
//! suspend a source on `AuthError`, back off on `RateLimitError`, discard
//! and continue on `ValidationError`, and so on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    /// Network I/O or timeout talking to an external feed. Never fatal.
    #[error("transport error talking to {source_name}: {message}")]
    Transport { source_name: String, message: String },

    /// 401/403 from an external feed. The source is suspended until an
    /// operator re-enables it; never retried automatically.
    #[error("authentication rejected by {source_name}: {message}")]
    Auth { source_name: String, message: String },

    /// 429 from an external feed. Adapter-local backoff applies.
    #[error("rate limited by {source_name}, retry after {retry_after_secs:?}s")]
    RateLimit {
        source_name: String,
        retry_after_secs: Option<u64>,
    },

    /// A single raw record failed normalization or required-field checks.
    /// The record is discarded; the pipeline continues.
    #[error("validation failed for record {record_id}: {reason}")]
    Validation { record_id: String, reason: String },

    /// The persistence facade failed a write or read. Logged; the
    /// triggering event is not replayed.
    #[error("persistence error during {operation}: {message}")]
    Persistence { operation: String, message: String },

    /// A malformed subscriber frame or a rejected origin. The connection
    /// is closed with the given reason.
    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    /// An unrecoverable invariant violation. The process should exit and
    /// rely on a supervisor to restart it.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl HubError {
    pub fn category(&self) -> &'static str {
        match self {
            HubError::Transport { .. } => "transport",
            HubError::Auth { .. } => "auth",
            HubError::RateLimit { .. } => "rate_limit",
            HubError::Validation { .. } => "validation",
            HubError::Persistence { .. } => "persistence",
            HubError::Protocol { .. } => "protocol",
            HubError::Fatal(_) => "fatal",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, HubError::Fatal(_))
    }
}

/// Redact field values whose key looks like a credential before they reach
/// a log line. Matches spec-mandated redaction for
/// `api[_-]?key|token|secret|password|authorization|bearer` (case
/// insensitive).
pub fn redact_if_sensitive(key: &str, value: &str) -> String {
    static SENSITIVE: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
        regex::Regex::new(r"(?i)api[_-]?key|token|secret|password|authorization|bearer").unwrap()
    });

    if SENSITIVE.is_match(key) {
        "***REDACTED***".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_known_sensitive_keys() {
        assert_eq!(redact_if_sensitive("api_key", "secretvalue"), "***REDACTED***");
        assert_eq!(redact_if_sensitive("Authorization", "Bearer xyz"), "***REDACTED***");
        assert_eq!(redact_if_sensitive("EAM_WATCH_API_TOKEN", "abc"), "***REDACTED***");
    }

    #[test]
    fn leaves_ordinary_fields_alone() {
        assert_eq!(redact_if_sensitive("flight", "UAL123"), "UAL123");
    }

    #[test]
    fn category_matches_variant() {
        let e = HubError::Auth {
            source_name: "adsb".into(),
            message: "401".into(),
        };
        assert_eq!(e.category(), "auth");
        assert!(!e.is_fatal());
        assert!(HubError::Fatal("boom".into()).is_fatal());
    }
}
