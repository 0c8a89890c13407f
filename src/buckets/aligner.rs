//! Bucket start alignment

use super::size::BucketSize;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Floor `timestamp` to the start of its bucket
///
/// Works on whole minutes since the Unix epoch, so every returned start is an
/// exact multiple of the bucket size regardless of local timezone.
pub fn align_to_bucket(timestamp: DateTime<Utc>, size: BucketSize) -> DateTime<Utc> {
    let minutes = timestamp.timestamp().div_euclid(60);
    let aligned = minutes.div_euclid(size.minutes()) * size.minutes();
    Utc.timestamp_opt(aligned * 60, 0)
        .single()
        .unwrap_or(timestamp)
}

/// Parse a record timestamp; values without an offset are taken as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
