use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{EvidenceError, Result};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// RFC 3339 with millisecond precision and a `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_rfc3339() -> String {
    format_timestamp(&now())
}

pub fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            EvidenceError::shape(field, format!("`{value}` is not an RFC 3339 timestamp: {e}"))
        })
}

/// `YYYYMMDDTHHMMSSZ`, separators and sub-second digits dropped.
pub fn compact_stamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}
