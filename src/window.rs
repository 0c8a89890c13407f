//! Reprocessing window: previous hour through the end of the current hour
//!
//! Every bucket that could still receive late writes or repeated triggers
//! lies inside this window, so it is recounted on every invocation instead of
//! trusting whatever count was persisted earlier.

use crate::buckets::{align_to_bucket, BucketSize};
use chrono::{DateTime, Duration, Utc};

/// Hours recounted before the current one
pub const LOOKBACK_HOURS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReprocessWindow {
    /// Inclusive
    pub start: DateTime<Utc>,
    /// Exclusive
    pub end: DateTime<Utc>,
}

impl ReprocessWindow {
    pub fn compute(now: DateTime<Utc>) -> Self {
        let hour_start = align_to_bucket(now, BucketSize::Min60);
        Self {
            start: hour_start - Duration::hours(LOOKBACK_HOURS),
            end: hour_start + Duration::hours(1),
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}
