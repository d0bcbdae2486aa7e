use chrono::{SecondsFormat, Utc};

/// Current UTC time as RFC 3339 with millisecond precision, e.g.
/// `2026-03-01T12:00:00.123Z`. This is the only timestamp format persisted
/// or put on the wire.
pub fn now_rfc3339_millis() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
