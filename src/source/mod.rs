//! Record Source: complete, paginated ground-truth reads
//!
//! Correctness of every bucket depends on this read being complete, so
//! `fetch_all` keeps paging until the backend reports no further cursor.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryRecordSource;
pub use sqlite::SqliteRecordSource;

use crate::buckets::{AffectedPartition, RawRecord};
use crate::error::SourceError;
use crate::window::ReprocessWindow;
use async_trait::async_trait;

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// All records of one partition inside one window
#[derive(Debug, Clone)]
pub struct RecordQuery {
    pub partition: AffectedPartition,
    pub window: ReprocessWindow,
    pub page_size: usize,
}

impl RecordQuery {
    pub fn new(partition: AffectedPartition, window: ReprocessWindow) -> Self {
        Self {
            partition,
            window,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<RawRecord>,
    /// `None` once the last page has been served
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Read one page starting after `cursor`
    async fn fetch_page(
        &self,
        query: &RecordQuery,
        cursor: Option<&str>,
    ) -> Result<RecordPage, SourceError>;

    /// Cheap probe run once per invocation before any partition work
    async fn check_ready(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Follow cursors until exhausted
    async fn fetch_all(&self, query: &RecordQuery) -> Result<Vec<RawRecord>, SourceError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.fetch_page(query, cursor.as_deref()).await?;
            pages += 1;
            records.extend(page.records);

            match page.next_cursor {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    return Err(SourceError::Decode(format!(
                        "cursor {} did not advance for {}",
                        next, query.partition
                    )));
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        log::debug!(
            "📥 Read {} record(s) for {} in {} page(s)",
            records.len(),
            query.partition,
            pages
        );
        Ok(records)
    }

    fn source_type(&self) -> &'static str;
}
