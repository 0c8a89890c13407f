//! Maps stream notifications to affected partitions

use super::notification::{CdcBatch, EventKind};
use crate::buckets::{AffectedPartition, RecordType};
use std::collections::BTreeSet;

/// Decides which record type a stream source feeds
pub trait SourceClassifier: Send + Sync {
    fn classify(&self, source_id: &str) -> Option<RecordType>;
}

/// Ordered keyword dispatch table; first match wins
///
/// Source ids are lowercased and stripped of separators before matching, so
/// `table/ScoreResult-x1/stream` and `score_result` both hit `scoreresult`.
pub struct KeywordClassifier {
    rules: Vec<(&'static str, RecordType)>,
}

impl KeywordClassifier {
    pub fn new(rules: Vec<(&'static str, RecordType)>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[(&'static str, RecordType)] {
        &self.rules
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(vec![
            ("scoreresult", RecordType::ScoreResults),
            ("evaluation", RecordType::Evaluations),
            ("task", RecordType::Tasks),
            ("item", RecordType::Items),
        ])
    }
}

impl SourceClassifier for KeywordClassifier {
    fn classify(&self, source_id: &str) -> Option<RecordType> {
        let normalized: String = source_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        self.rules
            .iter()
            .find(|(keyword, _)| normalized.contains(keyword))
            .map(|(_, record_type)| *record_type)
    }
}

/// Distinct partitions touched by a batch, plus why the rest were dropped
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub partitions: BTreeSet<AffectedPartition>,
    pub ignored_kind: usize,
    pub unclassified: usize,
    pub missing_account: usize,
    pub malformed: usize,
}

impl Classification {
    pub fn skipped(&self) -> usize {
        self.ignored_kind + self.unclassified + self.missing_account + self.malformed
    }
}

/// Classify every notification; only inserts can make a partition dirty
pub fn classify_batch(batch: &CdcBatch, classifier: &dyn SourceClassifier) -> Classification {
    let mut result = Classification {
        malformed: batch.malformed,
        ..Default::default()
    };

    for notification in &batch.notifications {
        if notification.event_kind != EventKind::Insert {
            result.ignored_kind += 1;
            continue;
        }

        let Some(record_type) = classifier.classify(&notification.source_id) else {
            log::debug!("Unclassifiable source: {}", notification.source_id);
            result.unclassified += 1;
            continue;
        };

        let Some(account_id) = notification.account_id() else {
            log::debug!(
                "Notification from {} has no account id, skipping",
                notification.source_id
            );
            result.missing_account += 1;
            continue;
        };

        result
            .partitions
            .insert(AffectedPartition::new(record_type, account_id));
    }

    if result.skipped() > 0 {
        log::info!(
            "Classified {} notification(s): {} partition(s), {} skipped ({} non-insert, {} unclassified, {} without account, {} malformed)",
            batch.len(),
            result.partitions.len(),
            result.skipped(),
            result.ignored_kind,
            result.unclassified,
            result.missing_account,
            result.malformed
        );
    }

    result
}
