//! In-process record source for tests and dry runs

use super::{RecordPage, RecordQuery, RecordSource};
use crate::buckets::{RawRecord, RecordType};
use crate::error::SourceError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// Holds records in insertion order and pages through them by offset
///
/// Records without any timestamp are returned for their partition regardless
/// of window, so the counter can report them as skipped.
#[derive(Default)]
pub struct MemoryRecordSource {
    records: RwLock<Vec<(RecordType, RawRecord)>>,
    pages_served: AtomicUsize,
}

impl MemoryRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record_type: RecordType, record: RawRecord) -> Result<(), SourceError> {
        self.records
            .write()
            .map_err(|_| SourceError::Unavailable("record store lock poisoned".to_string()))?
            .push((record_type, record));
        Ok(())
    }

    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RecordSource for MemoryRecordSource {
    async fn fetch_page(
        &self,
        query: &RecordQuery,
        cursor: Option<&str>,
    ) -> Result<RecordPage, SourceError> {
        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|e| SourceError::Decode(format!("bad cursor {}: {}", c, e)))?,
            None => 0,
        };

        let records = self
            .records
            .read()
            .map_err(|_| SourceError::Unavailable("record store lock poisoned".to_string()))?;

        let matching: Vec<&RawRecord> = records
            .iter()
            .filter(|(record_type, record)| {
                *record_type == query.partition.record_type
                    && record.account_id == query.partition.account_id
                    && record
                        .timestamp()
                        .map_or(true, |ts| query.window.contains(ts))
            })
            .map(|(_, record)| record)
            .collect();

        let end = (offset + query.page_size).min(matching.len());
        let page: Vec<RawRecord> = matching
            .get(offset..end)
            .unwrap_or(&[])
            .iter()
            .map(|r| (*r).clone())
            .collect();

        self.pages_served.fetch_add(1, Ordering::Relaxed);

        Ok(RecordPage {
            records: page,
            next_cursor: (end < matching.len()).then(|| end.to_string()),
        })
    }

    fn source_type(&self) -> &'static str {
        "memory"
    }
}
