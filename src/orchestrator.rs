//! Orchestrator: one CDC batch in, one summary out
//!
//! ```text
//! CdcBatch
//!     ↓
//! classify_batch → BTreeSet<AffectedPartition>
//!     ↓ (empty → successful empty summary)
//! check_ready (source, sink)
//!     ↓
//! tokio::spawn per partition, bounded by Semaphore
//!     ↓
//! InvocationSummary
//! ```
//!
//! `now` is read once per invocation so every partition shares the same
//! reprocessing window.

use crate::buckets::AffectedPartition;
use crate::config::AggregatorConfig;
use crate::error::{InvocationError, PartitionError};
use crate::processor::{PartitionOutcome, PartitionProcessor};
use crate::sink::AggregationSink;
use crate::source::RecordSource;
use crate::stream::{classify_batch, CdcBatch, KeywordClassifier, SourceClassifier};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Aggregate outcome of one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationSummary {
    pub affected_partitions: usize,
    pub buckets_updated: usize,
    pub errors: usize,
    pub skipped_notifications: usize,
    pub skipped_records: u64,
    pub partitions: Vec<PartitionOutcome>,
}

impl InvocationSummary {
    /// Non-zero errors with buckets written is a partial success
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }

    fn record(&mut self, outcome: PartitionOutcome) {
        self.buckets_updated += outcome.buckets_written;
        self.errors += outcome.errors;
        self.skipped_records += outcome.records_skipped;
        self.partitions.push(outcome);
    }
}

pub struct Orchestrator {
    processor: Arc<PartitionProcessor>,
    classifier: Arc<dyn SourceClassifier>,
    max_concurrency: usize,
    timeout: Option<Duration>,
    now_fn: Clock,
}

impl Orchestrator {
    pub fn new(source: Arc<dyn RecordSource>, sink: Arc<dyn AggregationSink>) -> Self {
        Self::new_with_clock(source, sink, Box::new(Utc::now))
    }

    /// Create with a custom clock (for testing)
    pub fn new_with_clock(
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn AggregationSink>,
        now_fn: Clock,
    ) -> Self {
        Self::from_processor(PartitionProcessor::new(source, sink), now_fn)
    }

    pub fn from_config(
        config: &AggregatorConfig,
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn AggregationSink>,
    ) -> Self {
        let processor = PartitionProcessor::new(source, sink)
            .with_page_size(config.page_size)
            .with_filter(config.record_filter.clone());

        Self::from_processor(processor, Box::new(Utc::now))
            .with_concurrency(config.max_concurrency)
            .with_timeout(config.invocation_timeout)
    }

    fn from_processor(processor: PartitionProcessor, now_fn: Clock) -> Self {
        Self {
            processor: Arc::new(processor),
            classifier: Arc::new(KeywordClassifier::default()),
            max_concurrency: 4,
            timeout: None,
            now_fn,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn SourceClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Deadline measured from the start of each `run`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_clock(mut self, now_fn: Clock) -> Self {
        self.now_fn = now_fn;
        self
    }

    /// Process one batch
    ///
    /// Only a batch that cannot start (unreachable source or sink) is an
    /// error. Partition failures are counted in the summary.
    pub async fn run(&self, batch: &CdcBatch) -> Result<InvocationSummary, InvocationError> {
        let started = Instant::now();
        let deadline = self.timeout.map(|timeout| (started + timeout, timeout));

        let classification = classify_batch(batch, self.classifier.as_ref());
        let mut summary = InvocationSummary {
            affected_partitions: classification.partitions.len(),
            skipped_notifications: classification.skipped(),
            ..Default::default()
        };

        if classification.partitions.is_empty() {
            log::info!(
                "📭 No affected partitions in batch of {} notification(s)",
                batch.len()
            );
            return Ok(summary);
        }

        self.processor
            .source()
            .check_ready()
            .await
            .map_err(InvocationError::SourceUnavailable)?;
        self.processor
            .sink()
            .check_ready()
            .await
            .map_err(InvocationError::SinkUnavailable)?;

        let now = (self.now_fn)();
        log::info!(
            "🚀 Reprocessing {} partition(s) as of {} ({} → {}, concurrency {})",
            summary.affected_partitions,
            now.to_rfc3339(),
            self.processor.source().source_type(),
            self.processor.sink().sink_type(),
            self.max_concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut handles = Vec::with_capacity(classification.partitions.len());

        for partition in classification.partitions {
            let processor = Arc::clone(&self.processor);
            let semaphore = Arc::clone(&semaphore);
            let task_partition = partition.clone();
            let written = Arc::new(AtomicUsize::new(0));
            let task_written = Arc::clone(&written);

            let handle = tokio::spawn(async move {
                let work = async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => return Err(PartitionError::Aborted(e.to_string())),
                    };
                    processor
                        .process_partition_tracked(&task_partition, now, &task_written)
                        .await
                };

                match deadline {
                    Some((at, timeout)) => tokio::time::timeout_at(at, work)
                        .await
                        .unwrap_or(Err(PartitionError::DeadlineExceeded(timeout))),
                    None => work.await,
                }
            });
            handles.push((partition, written, handle));
        }

        for (partition, written, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => failed_partition(partition, e, &written),
                Err(e) => {
                    failed_partition(partition, PartitionError::Aborted(e.to_string()), &written)
                }
            };
            summary.record(outcome);
        }

        let elapsed = started.elapsed();
        if summary.is_success() {
            log::info!(
                "✅ Invocation complete: {} partition(s), {} bucket(s) updated in {}ms",
                summary.affected_partitions,
                summary.buckets_updated,
                elapsed.as_millis()
            );
        } else {
            log::warn!(
                "⚠️  Invocation finished with {} error(s): {} partition(s), {} bucket(s) updated in {}ms",
                summary.errors,
                summary.affected_partitions,
                summary.buckets_updated,
                elapsed.as_millis()
            );
        }

        Ok(summary)
    }
}

fn failed_partition(
    partition: AffectedPartition,
    err: PartitionError,
    written: &AtomicUsize,
) -> PartitionOutcome {
    let written = written.load(Ordering::SeqCst);
    log::error!(
        "❌ Partition {} failed after {} bucket write(s): {}",
        partition,
        written,
        err
    );
    PartitionOutcome::failed(partition, &err, written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buckets::{BucketSize, RawRecord, RecordType};
    use crate::error::{SinkError, SourceError};
    use crate::sink::MemoryBucketSink;
    use crate::source::{MemoryRecordSource, RecordPage, RecordQuery};
    use crate::stream::StreamNotification;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, 0).unwrap()
    }

    fn fixed_clock(now: DateTime<Utc>) -> Clock {
        Box::new(move || now)
    }

    fn insert(source: &str, account: &str) -> StreamNotification {
        let image = json!({ "accountId": { "S": account } });
        StreamNotification::insert(source, image.as_object().unwrap().clone())
    }

    fn record(id: &str, account: &str, created_at: DateTime<Utc>) -> RawRecord {
        RawRecord {
            id: id.to_string(),
            account_id: account.to_string(),
            created_at: Some(created_at.to_rfc3339()),
            updated_at: None,
            fields: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_empty_batch_short_circuits() {
        let orchestrator = Orchestrator::new_with_clock(
            Arc::new(FailingSource),
            Arc::new(MemoryBucketSink::new()),
            fixed_clock(at(10, 0)),
        );

        let batch = CdcBatch::new(vec![insert("audit-log", "acct-1")]);
        let summary = orchestrator.run(&batch).await.unwrap();

        assert_eq!(summary.affected_partitions, 0);
        assert_eq!(summary.skipped_notifications, 1);
        assert!(summary.is_success());
    }

    #[tokio::test]
    async fn test_duplicate_notifications_process_partition_once() {
        let source = Arc::new(MemoryRecordSource::new());
        source
            .push(RecordType::Items, record("a", "acct-1", at(10, 1)))
            .unwrap();
        let sink = Arc::new(MemoryBucketSink::new());
        let orchestrator =
            Orchestrator::new_with_clock(source, sink.clone(), fixed_clock(at(10, 30)));

        let batch = CdcBatch::new(vec![
            insert("ItemTable", "acct-1"),
            insert("item-stream", "acct-1"),
        ]);
        let summary = orchestrator.run(&batch).await.unwrap();

        assert_eq!(summary.affected_partitions, 1);
        assert_eq!(summary.buckets_updated, 4);
        assert_eq!(summary.partitions.len(), 1);
        assert_eq!(sink.write_counts().unwrap(), (4, 0));
    }

    /// Fails for one account and serves nothing for the rest
    struct PartialSource {
        broken_account: &'static str,
        inner: MemoryRecordSource,
    }

    #[async_trait]
    impl RecordSource for PartialSource {
        async fn fetch_page(
            &self,
            query: &RecordQuery,
            cursor: Option<&str>,
        ) -> Result<RecordPage, SourceError> {
            if query.partition.account_id == self.broken_account {
                return Err(SourceError::Database("query timed out".to_string()));
            }
            self.inner.fetch_page(query, cursor).await
        }

        fn source_type(&self) -> &'static str {
            "partial"
        }
    }

    #[tokio::test]
    async fn test_partition_failure_is_isolated() {
        let inner = MemoryRecordSource::new();
        inner
            .push(RecordType::Tasks, record("t1", "acct-ok", at(10, 2)))
            .unwrap();
        let source = Arc::new(PartialSource {
            broken_account: "acct-bad",
            inner,
        });
        let sink = Arc::new(MemoryBucketSink::new());
        let orchestrator =
            Orchestrator::new_with_clock(source, sink.clone(), fixed_clock(at(10, 30)))
                .with_concurrency(2);

        let batch = CdcBatch::new(vec![
            insert("TaskTable", "acct-bad"),
            insert("TaskTable", "acct-ok"),
        ]);
        let summary = orchestrator.run(&batch).await.unwrap();

        assert_eq!(summary.affected_partitions, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.buckets_updated, 4);
        assert!(!summary.is_success());

        let failed: Vec<_> = summary
            .partitions
            .iter()
            .filter(|p| p.failure.is_some())
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].partition.account_id, "acct-bad");

        let hourly = sink
            .snapshot()
            .unwrap()
            .into_iter()
            .find(|b| b.size == BucketSize::Min60)
            .unwrap();
        assert_eq!(hourly.account_id, "acct-ok");
        assert_eq!(hourly.count, 1);
    }

    struct FailingSource;

    #[async_trait]
    impl RecordSource for FailingSource {
        async fn fetch_page(
            &self,
            _query: &RecordQuery,
            _cursor: Option<&str>,
        ) -> Result<RecordPage, SourceError> {
            Err(SourceError::Unavailable("no route to host".to_string()))
        }

        async fn check_ready(&self) -> Result<(), SourceError> {
            Err(SourceError::Unavailable("no route to host".to_string()))
        }

        fn source_type(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_unreachable_source_fails_invocation() {
        let orchestrator = Orchestrator::new_with_clock(
            Arc::new(FailingSource),
            Arc::new(MemoryBucketSink::new()),
            fixed_clock(at(10, 0)),
        );

        let batch = CdcBatch::new(vec![insert("ItemTable", "acct-1")]);
        let result = orchestrator.run(&batch).await;
        assert!(matches!(result, Err(InvocationError::SourceUnavailable(_))));
    }

    struct DownSink;

    #[async_trait]
    impl AggregationSink for DownSink {
        async fn find_bucket(
            &self,
            _key: &crate::buckets::BucketKey,
        ) -> Result<Option<crate::sink::StoredBucket>, SinkError> {
            Err(SinkError::Unavailable("down".to_string()))
        }

        async fn create_bucket(
            &self,
            _bucket: &crate::buckets::Bucket,
        ) -> Result<crate::sink::StoredBucket, SinkError> {
            Err(SinkError::Unavailable("down".to_string()))
        }

        async fn update_bucket(
            &self,
            _id: i64,
            _count: u64,
            _complete: bool,
        ) -> Result<crate::sink::StoredBucket, SinkError> {
            Err(SinkError::Unavailable("down".to_string()))
        }

        async fn check_ready(&self) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("down".to_string()))
        }

        fn sink_type(&self) -> &'static str {
            "down"
        }
    }

    #[tokio::test]
    async fn test_unreachable_sink_fails_invocation() {
        let orchestrator = Orchestrator::new_with_clock(
            Arc::new(MemoryRecordSource::new()),
            Arc::new(DownSink),
            fixed_clock(at(10, 0)),
        );

        let batch = CdcBatch::new(vec![insert("ItemTable", "acct-1")]);
        let result = orchestrator.run(&batch).await;
        assert!(matches!(result, Err(InvocationError::SinkUnavailable(_))));
    }

    /// Tracks peak concurrent reads and stalls each one briefly
    struct SlowSource {
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowSource {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RecordSource for SlowSource {
        async fn fetch_page(
            &self,
            _query: &RecordQuery,
            _cursor: Option<&str>,
        ) -> Result<RecordPage, SourceError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(RecordPage::default())
        }

        fn source_type(&self) -> &'static str {
            "slow"
        }
    }

    fn many_accounts(n: usize) -> CdcBatch {
        CdcBatch::new(
            (0..n)
                .map(|i| insert("EvaluationTable", &format!("acct-{}", i)))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let source = Arc::new(SlowSource::new(Duration::from_millis(20)));
        let orchestrator = Orchestrator::new_with_clock(
            source.clone(),
            Arc::new(MemoryBucketSink::new()),
            fixed_clock(at(10, 0)),
        )
        .with_concurrency(2);

        let summary = orchestrator.run(&many_accounts(6)).await.unwrap();

        assert_eq!(summary.affected_partitions, 6);
        assert_eq!(summary.errors, 0);
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
    }

    /// Accepts the first `fast_creates` creates, then hangs on every later one
    struct StallingSink {
        inner: MemoryBucketSink,
        fast_creates: usize,
        creates: AtomicUsize,
    }

    #[async_trait]
    impl AggregationSink for StallingSink {
        async fn find_bucket(
            &self,
            key: &crate::buckets::BucketKey,
        ) -> Result<Option<crate::sink::StoredBucket>, SinkError> {
            self.inner.find_bucket(key).await
        }

        async fn create_bucket(
            &self,
            bucket: &crate::buckets::Bucket,
        ) -> Result<crate::sink::StoredBucket, SinkError> {
            if self.creates.fetch_add(1, Ordering::SeqCst) >= self.fast_creates {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            self.inner.create_bucket(bucket).await
        }

        async fn update_bucket(
            &self,
            id: i64,
            count: u64,
            complete: bool,
        ) -> Result<crate::sink::StoredBucket, SinkError> {
            self.inner.update_bucket(id, count, complete).await
        }

        fn sink_type(&self) -> &'static str {
            "stalling"
        }
    }

    #[tokio::test]
    async fn test_deadline_reports_buckets_already_written() {
        let source = Arc::new(MemoryRecordSource::new());
        source
            .push(RecordType::Items, record("a", "acct-1", at(10, 1)))
            .unwrap();
        let sink = Arc::new(StallingSink {
            inner: MemoryBucketSink::new(),
            fast_creates: 2,
            creates: AtomicUsize::new(0),
        });
        let orchestrator =
            Orchestrator::new_with_clock(source, sink.clone(), fixed_clock(at(10, 30)))
                .with_timeout(Some(Duration::from_millis(100)));

        let summary = orchestrator
            .run(&CdcBatch::new(vec![insert("ItemTable", "acct-1")]))
            .await
            .unwrap();

        // 1m and 5m landed before the 15m create hung
        assert_eq!(sink.inner.snapshot().unwrap().len(), 2);
        assert_eq!(summary.buckets_updated, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.partitions[0].buckets_written, 2);
        assert!(summary.partitions[0]
            .failure
            .as_deref()
            .is_some_and(|f| f.contains("deadline")));
    }

    #[tokio::test]
    async fn test_deadline_abandons_partitions() {
        let source = Arc::new(SlowSource::new(Duration::from_secs(5)));
        let sink = Arc::new(MemoryBucketSink::new());
        let orchestrator =
            Orchestrator::new_with_clock(source, sink.clone(), fixed_clock(at(10, 0)))
                .with_timeout(Some(Duration::from_millis(50)));

        let summary = orchestrator.run(&many_accounts(3)).await.unwrap();

        assert_eq!(summary.affected_partitions, 3);
        assert_eq!(summary.errors, 3);
        assert_eq!(summary.buckets_updated, 0);
        assert!(summary
            .partitions
            .iter()
            .all(|p| p.failure.as_deref().is_some_and(|f| f.contains("deadline"))));
        assert!(sink.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let summary = InvocationSummary {
            affected_partitions: 2,
            buckets_updated: 9,
            errors: 1,
            ..Default::default()
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["affectedPartitions"], 2);
        assert_eq!(value["bucketsUpdated"], 9);
        assert_eq!(value["errors"], 1);
        assert_eq!(value["skippedNotifications"], 0);
    }
}
