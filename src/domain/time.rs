//! Timestamp normalization boundary.
//!
//! The upstream API mixes offset-tagged RFC 3339 strings with naive
//! variants on some historical records. Every timestamp crossing into
//! the store goes through `parse_utc`, so duration arithmetic inside
//! the crate only ever sees `DateTime<Utc>`.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{FragcastError, Result};

/// Parse an upstream timestamp into an explicit UTC instant.
///
/// Accepts RFC 3339 with any offset (normalized to UTC) and naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]` strings, which upstream documents as UTC.
pub fn parse_utc(raw: &str) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(naive.and_utc());
        }
    }

    Err(FragcastError::InvalidTimestamp(raw.to_string()))
}

/// Hours between two UTC instants, signed.
pub fn hours_between(newer: DateTime<Utc>, older: DateTime<Utc>) -> f64 {
    (newer - older).num_seconds() as f64 / 3600.0
}

/// Serde helper for nullable upstream timestamp fields.
pub mod flexible_utc {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => super::parse_utc(s).map(Some).map_err(serde::de::Error::custom),
        }
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_with_offset() {
        let dt = parse_utc("2024-03-01T18:30:00+02:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T16:30:00+00:00");
    }

    #[test]
    fn parses_rfc3339_zulu() {
        let dt = parse_utc("2024-03-01T16:30:00Z").unwrap();
        assert_eq!(dt.timestamp(), 1709310600);
    }

    #[test]
    fn parses_naive_as_utc() {
        let naive = parse_utc("2024-03-01T16:30:00").unwrap();
        let aware = parse_utc("2024-03-01T16:30:00Z").unwrap();
        assert_eq!(naive, aware);
    }

    #[test]
    fn mixed_representations_subtract_safely() {
        let aware = parse_utc("2024-03-03T12:00:00+00:00").unwrap();
        let naive = parse_utc("2024-03-01T12:00:00").unwrap();
        assert_eq!(hours_between(aware, naive), 48.0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_utc("not a timestamp").is_err());
        assert!(parse_utc("").is_err());
    }
}
