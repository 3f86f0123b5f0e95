//! Custom log format and field redaction (C10).
//!
//! `TargetFirstFormat` is a near-verbatim port of soar's formatter:
//!
//! Default tracing format: `LEVEL span1:span2: target: message`
//! This format:            `LEVEL target: span1:span2: message`

use std::fmt;
use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::field::RecordFields;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Field names this layer redacts before they ever reach an appender,
/// matching spec.md §7's redaction requirement. Shared with
/// [`crate::errors::redact_if_sensitive`], which applies the same pattern
/// to error messages.
pub static SENSITIVE_FIELD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)api[_-]?key|token|secret|password|authorization|bearer").unwrap());

pub const REDACTED_PLACEHOLDER: &str = "***REDACTED***";

/// Custom event formatter that puts target before span context.
pub struct TargetFirstFormat;

impl<S, N> FormatEvent<S, N> for TargetFirstFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: format::Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let metadata = event.metadata();

        let level = metadata.level();
        let level_style = match *level {
            tracing::Level::ERROR => "\x1b[31m",
            tracing::Level::WARN => "\x1b[33m",
            tracing::Level::INFO => "\x1b[32m",
            tracing::Level::DEBUG => "\x1b[34m",
            tracing::Level::TRACE => "\x1b[35m",
        };
        write!(writer, "{}{:>5}\x1b[0m ", level_style, level)?;
        write!(writer, "{}: ", metadata.target())?;

        if let Some(scope) = ctx.event_scope() {
            let mut first = true;
            for span in scope.from_root() {
                if !first {
                    write!(writer, ":")?;
                }
                write!(writer, "{}", span.name())?;
                first = false;
            }
            if !first {
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// A [`FormatFields`] implementation that writes `name=value` pairs like
/// tracing-subscriber's default visitor, but substitutes
/// [`REDACTED_PLACEHOLDER`] for any field whose name matches
/// [`SENSITIVE_FIELD_NAME`]. Installed as the field formatter on the fmt
/// layer (`.fmt_fields(RedactingFields)`) so redaction happens at the one
/// place every event's fields are rendered, regardless of which
/// `FormatEvent` is in use — this operationalizes spec.md §7's redaction
/// requirement.
#[derive(Clone, Copy, Default)]
pub struct RedactingFields;

struct RedactingVisitor<'a, 'w> {
    writer: &'a mut format::Writer<'w>,
    first: bool,
    result: fmt::Result,
}

impl RedactingVisitor<'_, '_> {
    fn write_value(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if self.result.is_err() {
            return;
        }
        let sep = if self.first { "" } else { " " };
        self.first = false;
        self.result = if field.name() == "message" {
            write!(self.writer, "{sep}{value:?}")
        } else if SENSITIVE_FIELD_NAME.is_match(field.name()) {
            write!(self.writer, "{sep}{}={REDACTED_PLACEHOLDER}", field.name())
        } else {
            write!(self.writer, "{sep}{}={value:?}", field.name())
        };
    }
}

impl Visit for RedactingVisitor<'_, '_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.write_value(field, value);
    }
}

impl<'writer> FormatFields<'writer> for RedactingFields {
    fn format_fields<R: RecordFields>(&self, mut writer: format::Writer<'writer>, fields: R) -> fmt::Result {
        let mut visitor = RedactingVisitor { writer: &mut writer, first: true, result: Ok(()) };
        fields.record(&mut visitor);
        visitor.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_field_name_pattern_matches_known_variants() {
        for name in ["api_key", "apikey", "token", "Secret", "PASSWORD", "Authorization", "bearer_token"] {
            assert!(SENSITIVE_FIELD_NAME.is_match(name), "expected {name} to match");
        }
        assert!(!SENSITIVE_FIELD_NAME.is_match("station_id"));
    }
}
