//! Backup generation identifiers.
//!
//! A [`Timestamp`] is the textual form `YYYY-MM-DD_HHMMSS`. The encoding is
//! fixed width, so lexicographic order equals chronological order and the
//! derived `Ord` on the inner string is the ordering used everywhere.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// chrono format string for [`Timestamp`].
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

const TIMESTAMP_LEN: usize = 17;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid timestamp {0:?}: expected YYYY-MM-DD_HHMMSS")]
pub struct TimestampParseError(pub String);

impl Timestamp {
    /// Parse and validate a timestamp string.
    pub fn parse(s: &str) -> Result<Self, TimestampParseError> {
        if s.len() != TIMESTAMP_LEN || NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).is_err() {
            return Err(TimestampParseError(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        Self(dt.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Timestamp {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for Timestamp {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Timestamp {
    type Err = TimestampParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Timestamp {
    type Error = TimestampParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

/// Source of new backup timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_datetime(Utc::now().naive_utc())
    }
}

/// Clock pinned to a single instant.
#[derive(Debug, Clone)]
pub struct FixedClock(pub Timestamp);

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_accepts_canonical_form() {
        let ts = Timestamp::parse("2024-01-02_030405").unwrap();
        assert_eq!(ts.as_str(), "2024-01-02_030405");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Timestamp::parse("2024-01-02").is_err());
        assert!(Timestamp::parse("2024-13-02_030405").is_err());
        assert!(Timestamp::parse("2024-01-02_03040").is_err());
        assert!(Timestamp::parse("2024-01-02T030405").is_err());
        assert!(Timestamp::parse("").is_err());
    }

    #[test]
    fn test_ordering_is_chronological() {
        let a = Timestamp::parse("2023-12-31_235959").unwrap();
        let b = Timestamp::parse("2024-01-01_000000").unwrap();
        let c = Timestamp::parse("2024-01-01_000001").unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_from_datetime() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 5, 7)
            .unwrap();
        assert_eq!(Timestamp::from_datetime(dt).as_str(), "2024-03-01_090507");
    }

    #[test]
    fn test_system_clock_output_parses() {
        let ts = SystemClock.now();
        assert!(Timestamp::parse(ts.as_str()).is_ok());
    }

    #[test]
    fn test_serde_validates() {
        let ts: Timestamp = serde_json::from_str("\"2024-01-01_000000\"").unwrap();
        assert_eq!(ts.as_str(), "2024-01-01_000000");
        assert!(serde_json::from_str::<Timestamp>("\"yesterday\"").is_err());
    }
}
