/// Time utilities for bucket flooring and timezone handling
use chrono::{DateTime, Duration, TimeZone};
use chrono_tz::Tz;
use serde::Serializer;

use crate::error::{FeedError, Result};

/// Display timezone used when none is configured
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Argentina::Buenos_Aires;

/// Resolve an IANA timezone name such as `America/New_York`
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| FeedError::ConfigError(format!("Unknown timezone: {}", name)))
}

/// Floor a timestamp to the start of its `width` bucket.
///
/// The bucket is computed on absolute epoch seconds and then re-expressed in
/// `tz`, so a bucket start is the same instant no matter which zone the
/// input carried.
pub fn floor_timestamp(timestamp: &DateTime<Tz>, width: Duration, tz: Tz) -> Result<DateTime<Tz>> {
    let seconds = width.num_seconds();
    if seconds <= 0 {
        return Err(FeedError::InvalidParameter(format!(
            "Bucket width must be positive, got {}s",
            seconds
        )));
    }

    let epoch = timestamp.timestamp();
    let floored = epoch - epoch.rem_euclid(seconds);
    tz.timestamp_opt(floored, 0)
        .single()
        .ok_or_else(|| FeedError::InvalidTimestamp(format!("Epoch second out of range: {}", floored)))
}

/// Convert exchange epoch milliseconds (UTC) into `tz`
pub fn from_epoch_millis(millis: i64, tz: Tz) -> Result<DateTime<Tz>> {
    tz.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| FeedError::InvalidTimestamp(format!("Epoch millis out of range: {}", millis)))
}

/// Parse an RFC 3339 timestamp and re-express it in `tz`.
///
/// Strings without a UTC offset are rejected.
pub fn parse_rfc3339(value: &str, tz: Tz) -> Result<DateTime<Tz>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&tz))
        .map_err(|e| FeedError::InvalidTimestamp(format!("'{}' is not a zone-aware RFC 3339 timestamp: {}", value, e)))
}

/// Serde `serialize_with` hook writing RFC 3339 with the UTC offset
pub fn serialize_rfc3339<S: Serializer>(dt: &DateTime<Tz>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&dt.to_rfc3339())
}
