//! Shared utility functions used across multiple modules.

use chrono::{DateTime, Duration, Utc};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current UTC time truncated to whole milliseconds.
///
/// Records cross the wire as ISO-8601 strings with millisecond precision, so
/// local stamps carry the same precision to compare equal after a round trip.
pub fn now() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

/// Convert a ms-epoch value into a UTC timestamp, clamping out-of-range input.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Next mutation stamp for a record last changed at `previous`.
///
/// Always strictly greater than `previous`, even if the wall clock stalls or
/// moves backwards.
pub fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let candidate = now();
    let floor = previous + Duration::milliseconds(1);
    candidate.max(floor)
}
