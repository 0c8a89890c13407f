//! Partition Processor: recount one partition and overwrite its buckets
//!
//! ```text
//! ReprocessWindow::compute(now)
//!     ↓
//! RecordSource::fetch_all (every page)
//!     ↓
//! BucketCounter (1m/5m/15m/60m in one pass)
//!     ↓
//! per bucket: find → update(id) | create
//! ```

use crate::buckets::{count_records, AffectedPartition, Bucket, RecordFilter};
use crate::error::{PartitionError, SinkError};
use crate::sink::{AggregationSink, StoredBucket};
use crate::source::{RecordQuery, RecordSource, DEFAULT_PAGE_SIZE};
use crate::window::ReprocessWindow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Result of reprocessing one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionOutcome {
    pub partition: AffectedPartition,
    pub buckets_written: usize,
    pub errors: usize,
    pub records_counted: u64,
    pub records_skipped: u64,
    pub cross_check_passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl PartitionOutcome {
    /// Outcome for an abandoned partition; `buckets_written` already persisted
    pub fn failed(
        partition: AffectedPartition,
        err: &PartitionError,
        buckets_written: usize,
    ) -> Self {
        Self {
            partition,
            buckets_written,
            errors: 1,
            records_counted: 0,
            records_skipped: 0,
            cross_check_passed: true,
            failure: Some(err.to_string()),
        }
    }
}

pub struct PartitionProcessor {
    source: Arc<dyn RecordSource>,
    sink: Arc<dyn AggregationSink>,
    page_size: usize,
    filter: Option<RecordFilter>,
}

impl PartitionProcessor {
    pub fn new(source: Arc<dyn RecordSource>, sink: Arc<dyn AggregationSink>) -> Self {
        Self {
            source,
            sink,
            page_size: DEFAULT_PAGE_SIZE,
            filter: None,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_filter(mut self, filter: Option<RecordFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn source(&self) -> &Arc<dyn RecordSource> {
        &self.source
    }

    pub fn sink(&self) -> &Arc<dyn AggregationSink> {
        &self.sink
    }

    /// Recount `partition` from ground truth as of `now`
    ///
    /// A failed read abandons the partition. A failed bucket write is counted
    /// and the remaining buckets are still written.
    pub async fn process_partition(
        &self,
        partition: &AffectedPartition,
        now: DateTime<Utc>,
    ) -> Result<PartitionOutcome, PartitionError> {
        self.process_partition_tracked(partition, now, &AtomicUsize::new(0))
            .await
    }

    /// Same as `process_partition`, bumping `progress` after every successful
    /// bucket write so a caller that drops this future still knows what landed
    pub async fn process_partition_tracked(
        &self,
        partition: &AffectedPartition,
        now: DateTime<Utc>,
        progress: &AtomicUsize,
    ) -> Result<PartitionOutcome, PartitionError> {
        let window = ReprocessWindow::compute(now);
        let query = RecordQuery::new(partition.clone(), window).with_page_size(self.page_size);

        let records = self.source.fetch_all(&query).await?;

        let report = count_records(&records, partition, self.filter.clone(), now);

        let mut written = 0;
        let mut errors = 0;
        for bucket in &report.buckets {
            match self.reconcile_bucket(bucket).await {
                Ok(_) => {
                    written += 1;
                    progress.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    errors += 1;
                    log::error!(
                        "❌ Failed to write {} bucket at {} for {}: {}",
                        bucket.size,
                        bucket.time_range_start,
                        partition,
                        e
                    );
                }
            }
        }

        log::debug!(
            "✅ {}: {} record(s) → {} bucket(s) written, {} error(s)",
            partition,
            report.processed,
            written,
            errors
        );

        Ok(PartitionOutcome {
            partition: partition.clone(),
            buckets_written: written,
            errors,
            records_counted: report.processed,
            records_skipped: report.skipped,
            cross_check_passed: report.cross_check_passed,
            failure: None,
        })
    }

    /// Find by key, then overwrite or create
    async fn reconcile_bucket(&self, bucket: &Bucket) -> Result<StoredBucket, SinkError> {
        match self.sink.find_bucket(&bucket.key()).await? {
            Some(existing) => {
                self.sink
                    .update_bucket(existing.id, bucket.count, bucket.complete)
                    .await
            }
            None => self.sink.create_bucket(bucket).await,
        }
    }
}
