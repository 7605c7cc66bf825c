//! Time primitives for peersync
//!
//! Deltas carry wall-clock timestamps. They are compared as integers and
//! rendered as RFC 3339 UTC text on the wire.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{SyncError, SyncResult};

/// Wall time in microseconds since the Unix epoch (UTC)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn now() -> Self {
        Timestamp(Utc::now().timestamp_micros())
    }

    #[inline]
    pub fn from_micros(micros: i64) -> Self {
        Timestamp(micros)
    }

    #[inline]
    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis * 1000)
    }

    #[inline]
    pub fn as_micros(self) -> i64 {
        self.0
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_micros(self.0)
    }

    /// RFC 3339 with microsecond precision and a `Z` suffix
    pub fn to_rfc3339(self) -> String {
        match self.to_datetime() {
            Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Micros, true),
            None => self.0.to_string(),
        }
    }

    /// Parse RFC 3339, falling back to a zone-less ISO form read as UTC
    pub fn parse(text: &str) -> SyncResult<Self> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Ok(Timestamp(dt.with_timezone(&Utc).timestamp_micros()));
        }
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| Timestamp(naive.and_utc().timestamp_micros()))
            .map_err(|e| SyncError::Codec(format!("bad timestamp {text:?}: {e}")))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.to_rfc3339())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl FromStr for Timestamp {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        Timestamp::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Timestamp::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3339_roundtrip() {
        let t = Timestamp::from_micros(1_565_000_000_123_456);
        let text = t.to_rfc3339();
        assert!(text.ends_with('Z'));
        assert_eq!(Timestamp::parse(&text).unwrap(), t);
    }

    #[test]
    fn test_naive_iso_is_utc() {
        let t = Timestamp::parse("2019-08-05T10:00:00.5").unwrap();
        let z = Timestamp::parse("2019-08-05T10:00:00.500Z").unwrap();
        assert_eq!(t, z);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(Timestamp::parse("yesterday"), Err(SyncError::Codec(_))));
    }

    #[test]
    fn test_serde_as_text() {
        let t = Timestamp::from_millis(1_000);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"1970-01-01T00:00:01.000000Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
