//! Single-pass multi-granularity bucket counting

use super::aligner::align_to_bucket;
use super::size::BucketSize;
use super::types::{AffectedPartition, Bucket, BucketScope, RawRecord};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Only count records whose `field` equals `value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    pub field: String,
    pub value: String,
}

impl RecordFilter {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Parse a `field=value` expression
    pub fn parse(expr: &str) -> Option<Self> {
        let (field, value) = expr.split_once('=')?;
        let field = field.trim();
        if field.is_empty() {
            return None;
        }
        Some(Self::new(field, value.trim()))
    }

    pub fn matches(&self, record: &RawRecord) -> bool {
        match record.fields.get(&self.field) {
            Some(serde_json::Value::String(s)) => s == &self.value,
            Some(other) => other.to_string() == self.value,
            None => false,
        }
    }
}

/// Output of one counting pass
#[derive(Debug, Clone)]
pub struct CountReport {
    /// Sorted by size, then start
    pub buckets: Vec<Bucket>,
    pub processed: u64,
    pub skipped: u64,
    pub filtered: u64,
    pub cross_check_passed: bool,
}

impl CountReport {
    pub fn buckets_of(&self, size: BucketSize) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter().filter(move |b| b.size == size)
    }

    pub fn total_for(&self, size: BucketSize) -> u64 {
        self.buckets_of(size).map(|b| b.count).sum()
    }
}

/// Accumulates records for one partition into every bucket size at once
///
/// Built fresh per partition; nothing survives between invocations.
pub struct BucketCounter {
    partition: AffectedPartition,
    scope: BucketScope,
    filter: Option<RecordFilter>,
    counts: HashMap<(DateTime<Utc>, BucketSize), u64>,
    processed: u64,
    skipped: u64,
    filtered: u64,
}

impl BucketCounter {
    pub fn new(partition: AffectedPartition) -> Self {
        Self {
            partition,
            scope: BucketScope::default(),
            filter: None,
            counts: HashMap::new(),
            processed: 0,
            skipped: 0,
            filtered: 0,
        }
    }

    pub fn with_filter(mut self, filter: Option<RecordFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_scope(mut self, scope: BucketScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn add_record(&mut self, record: &RawRecord) {
        if let Some(filter) = &self.filter {
            if !filter.matches(record) {
                self.filtered += 1;
                return;
            }
        }

        let Some(timestamp) = record.timestamp() else {
            log::debug!(
                "Skipping record {} in {}: no usable timestamp",
                record.id,
                self.partition
            );
            self.skipped += 1;
            return;
        };

        for size in BucketSize::all() {
            let start = align_to_bucket(timestamp, size);
            *self.counts.entry((start, size)).or_insert(0) += 1;
        }
        self.processed += 1;
    }

    /// Materialize every observed bucket, judging completeness against `now`
    pub fn finish(self, now: DateTime<Utc>) -> CountReport {
        let mut buckets: Vec<Bucket> = self
            .counts
            .iter()
            .map(|(&(start, size), &count)| {
                let end = start + Duration::minutes(size.minutes());
                Bucket {
                    record_type: self.partition.record_type,
                    account_id: self.partition.account_id.clone(),
                    scope: self.scope.clone(),
                    time_range_start: start,
                    time_range_end: end,
                    size,
                    count,
                    complete: end <= now,
                }
            })
            .collect();
        buckets.sort_by_key(|b| (b.size, b.time_range_start));

        let minute_total: u64 = buckets
            .iter()
            .filter(|b| b.size == BucketSize::Min1)
            .map(|b| b.count)
            .sum();
        let cross_check_passed = minute_total == self.processed;
        if !cross_check_passed {
            log::warn!(
                "⚠️  Cross-check mismatch for {}: processed {} records but 1m buckets sum to {}",
                self.partition,
                self.processed,
                minute_total
            );
        }
        if self.skipped > 0 {
            log::warn!(
                "Skipped {} record(s) without timestamp for {}",
                self.skipped,
                self.partition
            );
        }

        CountReport {
            buckets,
            processed: self.processed,
            skipped: self.skipped,
            filtered: self.filtered,
            cross_check_passed,
        }
    }
}

/// Count `records` for `partition` in one pass
pub fn count_records<'a, I>(
    records: I,
    partition: &AffectedPartition,
    filter: Option<RecordFilter>,
    now: DateTime<Utc>,
) -> CountReport
where
    I: IntoIterator<Item = &'a RawRecord>,
{
    let mut counter = BucketCounter::new(partition.clone()).with_filter(filter);
    for record in records {
        counter.add_record(record);
    }
    counter.finish(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buckets::types::RecordType;
    use chrono::TimeZone;
    use rand::seq::SliceRandom;
    use serde_json::{json, Map};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, 0).unwrap()
    }

    fn make_record(id: usize, created_at: Option<DateTime<Utc>>) -> RawRecord {
        RawRecord {
            id: format!("rec-{}", id),
            account_id: "acct-1".to_string(),
            created_at: created_at.map(|t| t.to_rfc3339()),
            updated_at: None,
            fields: Map::new(),
        }
    }

    fn scenario_records() -> Vec<RawRecord> {
        [(10, 1), (10, 1), (10, 3), (10, 7), (10, 16), (10, 59), (11, 2)]
            .iter()
            .enumerate()
            .map(|(i, &(h, m))| make_record(i, Some(at(h, m))))
            .collect()
    }

    fn partition() -> AffectedPartition {
        AffectedPartition::new(RecordType::Items, "acct-1")
    }

    #[test]
    fn test_scenario_hourly_and_minute_counts() {
        let records = scenario_records();
        let report = count_records(&records, &partition(), None, at(11, 30));

        assert_eq!(report.processed, 7);
        assert_eq!(report.total_for(BucketSize::Min1), 7);
        assert!(report.cross_check_passed);

        let hourly: Vec<_> = report.buckets_of(BucketSize::Min60).collect();
        assert_eq!(hourly.len(), 2);
        assert_eq!(hourly[0].time_range_start, at(10, 0));
        assert_eq!(hourly[0].time_range_end, at(11, 0));
        assert_eq!(hourly[0].count, 6);
        assert!(hourly[0].complete);
        assert_eq!(hourly[1].time_range_start, at(11, 0));
        assert_eq!(hourly[1].count, 1);
        assert!(!hourly[1].complete);

        let ten_oh_one = report
            .buckets_of(BucketSize::Min1)
            .find(|b| b.time_range_start == at(10, 1))
            .unwrap();
        assert_eq!(ten_oh_one.count, 2);
    }

    #[test]
    fn test_finer_buckets_sum_into_coarser() {
        let records = scenario_records();
        let report = count_records(&records, &partition(), None, at(12, 0));

        let sizes = BucketSize::all();
        for (i, small) in sizes.iter().enumerate() {
            for large in &sizes[i + 1..] {
                for outer in report.buckets_of(*large) {
                    let inner: u64 = report
                        .buckets_of(*small)
                        .filter(|b| {
                            b.time_range_start >= outer.time_range_start
                                && b.time_range_end <= outer.time_range_end
                        })
                        .map(|b| b.count)
                        .sum();
                    assert_eq!(inner, outer.count, "{} inside {}", small, large);
                }
            }
        }
    }

    #[test]
    fn test_shuffled_input_gives_same_buckets() {
        let mut records = scenario_records();
        let baseline = count_records(&records, &partition(), None, at(11, 30)).buckets;

        let mut rng = rand::thread_rng();
        for _ in 0..10 {
            records.shuffle(&mut rng);
            let shuffled = count_records(&records, &partition(), None, at(11, 30)).buckets;
            assert_eq!(shuffled, baseline);
        }
    }

    #[test]
    fn test_records_without_timestamp_are_skipped() {
        let mut records = scenario_records();
        records.push(make_record(99, None));

        let report = count_records(&records, &partition(), None, at(11, 30));
        assert_eq!(report.processed, 7);
        assert_eq!(report.skipped, 1);
        assert!(report.cross_check_passed);
    }

    #[test]
    fn test_completeness_tracks_now() {
        let records = vec![make_record(0, Some(at(10, 12)))];

        let report = count_records(&records, &partition(), None, at(10, 13));
        let complete: Vec<_> = report
            .buckets
            .iter()
            .map(|b| (b.size, b.complete))
            .collect();
        assert_eq!(
            complete,
            vec![
                (BucketSize::Min1, true),
                (BucketSize::Min5, false),
                (BucketSize::Min15, false),
                (BucketSize::Min60, false),
            ]
        );
    }

    #[test]
    fn test_filter_excludes_non_matching_records() {
        let mut matching = make_record(0, Some(at(10, 1)));
        matching.fields.insert("type".to_string(), json!("prediction"));
        let mut other = make_record(1, Some(at(10, 2)));
        other.fields.insert("type".to_string(), json!("evaluation"));
        let untyped = make_record(2, Some(at(10, 3)));

        let filter = RecordFilter::parse("type=prediction");
        let report = count_records(&[matching, other, untyped], &partition(), filter, at(11, 0));

        assert_eq!(report.processed, 1);
        assert_eq!(report.filtered, 2);
        assert_eq!(report.total_for(BucketSize::Min60), 1);
    }

    #[test]
    fn test_scope_stamped_on_buckets() {
        let scope = BucketScope {
            scorecard_id: Some("sc-1".to_string()),
            score_id: None,
        };
        let mut counter = BucketCounter::new(partition()).with_scope(scope.clone());
        counter.add_record(&make_record(0, Some(at(10, 1))));
        let report = counter.finish(at(11, 0));

        assert_eq!(report.buckets.len(), 4);
        assert!(report.buckets.iter().all(|b| b.scope == scope));
    }

    #[test]
    fn test_filter_parse() {
        assert_eq!(
            RecordFilter::parse(" type = prediction "),
            Some(RecordFilter::new("type", "prediction"))
        );
        assert_eq!(RecordFilter::parse("no-equals"), None);
        assert_eq!(RecordFilter::parse("=value"), None);
    }
}
