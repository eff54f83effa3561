use chrono::{DateTime, Duration, Utc};

// Microsecond precision with a literal `Z`, the shape the dashboard parses.
const ISO_UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn format_iso_utc(ts: DateTime<Utc>) -> String {
    ts.format(ISO_UTC_FORMAT).to_string()
}

pub fn from_unix_secs(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Midnight of the exchange-local trading date that contains `secs`.
///
/// Daily bars are labelled by session date rather than by the instant the session opened, so
/// `2024-01-02 14:30 UTC` on a UTC-5 exchange becomes `2024-01-02T00:00:00Z`.
pub fn session_date_midnight(secs: i64, gmt_offset_secs: i64) -> Option<DateTime<Utc>> {
    let local = from_unix_secs(secs)? + Duration::seconds(gmt_offset_secs);
    Some(local.date_naive().and_hms_opt(0, 0, 0)?.and_utc())
}
