//! Timestamp helpers used for checkpoint records and events.

use chrono::{DateTime, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// The format is `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`.
///
/// # Examples
///
/// ```
/// use stagegraph::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    format_iso8601(&Utc::now())
}

/// Formats a timestamp the same way [`iso_timestamp`] does.
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_is_rfc3339_with_micros() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let formatted = format_iso8601(&dt);
        assert_eq!(formatted, "2024-03-09T07:05:01.000000+00:00");
        assert_eq!(DateTime::parse_from_rfc3339(&formatted).unwrap(), dt);
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let earlier = format_iso8601(&Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let later = iso_timestamp();
        assert!(earlier < later);
    }
}
