//! GPX timestamp handling. All times are epoch milliseconds in UTC.

use chrono::{DateTime, Utc};

use crate::gpx_types::NO_TIME;

const GPX_TIME_PATTERN: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Parses `yyyy-MM-ddTHH:mm:ssXXX` or `yyyy-MM-ddTHH:mm:ss.SSSXXX`.
///
/// Returns [`NO_TIME`] when the text matches neither.
pub fn parse_time(text: &str) -> i64 {
    let text = text.trim();
    match DateTime::parse_from_rfc3339(text) {
        Ok(dt) => dt.timestamp_millis(),
        Err(e) => {
            tracing::debug!("Unparseable time '{text}': {e}");
            NO_TIME
        }
    }
}

/// Formats as `yyyy-MM-ddTHH:mm:ssZ`, dropping sub-second precision.
pub fn format_time(millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(dt) => dt.format(GPX_TIME_PATTERN).to_string(),
        None => {
            tracing::warn!("Time {millis} is out of range");
            String::new()
        }
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_utc() {
        assert_eq!(parse_time("2020-01-01T00:00:00Z"), 1_577_836_800_000);
    }

    #[test]
    fn test_parse_with_offset() {
        assert_eq!(parse_time("2020-01-01T02:00:00+02:00"), 1_577_836_800_000);
    }

    #[test]
    fn test_parse_millis() {
        assert_eq!(parse_time("2020-01-01T00:00:00.250Z"), 1_577_836_800_250);
    }

    #[test]
    fn test_parse_failure_is_zero() {
        assert_eq!(parse_time("yesterday"), NO_TIME);
        assert_eq!(parse_time(""), NO_TIME);
    }

    #[test]
    fn test_format_drops_millis() {
        assert_eq!(format_time(1_577_836_800_250), "2020-01-01T00:00:00Z");
    }
}
