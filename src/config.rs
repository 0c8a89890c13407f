//! Aggregator configuration from environment variables

use crate::buckets::RecordFilter;
use crate::source::DEFAULT_PAGE_SIZE;
use std::env;
use std::time::Duration;

/// Runtime settings for one invocation
///
/// Bucket sizes, the source dispatch table and the reprocessing window are
/// fixed constants and deliberately absent here.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// SQLite file holding both `records` and `metric_buckets`
    pub db_path: String,

    /// Partitions processed concurrently
    pub max_concurrency: usize,

    /// Records per Record Source page
    pub page_size: usize,

    /// Deadline for the whole invocation
    pub invocation_timeout: Option<Duration>,

    /// Optional `field=value` filter applied before counting
    pub record_filter: Option<RecordFilter>,
}

impl AggregatorConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `BUCKETFLOW_DB_PATH` (default: data/bucketflow.db)
    /// - `PARTITION_CONCURRENCY` (default: 4)
    /// - `RECORD_PAGE_SIZE` (default: 1000)
    /// - `INVOCATION_TIMEOUT_MS` (default: unset, no deadline)
    /// - `RECORD_FILTER` (default: unset)
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("BUCKETFLOW_DB_PATH")
                .unwrap_or_else(|_| "data/bucketflow.db".to_string()),

            max_concurrency: env::var("PARTITION_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(4)
                .max(1),

            page_size: env::var("RECORD_PAGE_SIZE")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .max(1),

            invocation_timeout: env::var("INVOCATION_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),

            record_filter: env::var("RECORD_FILTER")
                .ok()
                .and_then(|s| RecordFilter::parse(&s)),
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            db_path: "data/bucketflow.db".to_string(),
            max_concurrency: 4,
            page_size: DEFAULT_PAGE_SIZE,
            invocation_timeout: None,
            record_filter: None,
        }
    }
}
