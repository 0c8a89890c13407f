//! SQLite-backed record source with id cursor paging
//!
//! Reads the `records` table through a read-only connection. Pages are ordered
//! by row id and the cursor is the last id served, so inserts landing during a
//! read never shift rows between pages.
//!
//! Rows whose timestamps do not parse are returned regardless of window so
//! the counter can report them as skipped.

use super::{RecordPage, RecordQuery, RecordSource};
use crate::buckets::RawRecord;
use crate::error::SourceError;
use crate::sqlite::open_database;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub struct SqliteRecordSource {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordSource {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let conn = open_database(db_path)?;

        // Read-only from here on (must be after migrations)
        conn.execute_batch("PRAGMA query_only = ON")?;

        log::info!("📥 SQLite record source initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SourceError> {
        self.conn
            .lock()
            .map_err(|_| SourceError::Unavailable("connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl RecordSource for SqliteRecordSource {
    async fn fetch_page(
        &self,
        query: &RecordQuery,
        cursor: Option<&str>,
    ) -> Result<RecordPage, SourceError> {
        let after_id = match cursor {
            Some(c) => c
                .parse::<i64>()
                .map_err(|e| SourceError::Decode(format!("bad cursor {}: {}", c, e)))?,
            None => 0,
        };

        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, record_id, account_id, created_at, updated_at, fields
             FROM records
             WHERE record_type = ?1
               AND account_id = ?2
               AND ((event_time >= ?3 AND event_time < ?4) OR event_time IS NULL)
               AND id > ?5
             ORDER BY id ASC
             LIMIT ?6",
        )?;

        let rows = stmt.query_map(
            params![
                query.partition.record_type.as_str(),
                query.partition.account_id,
                query.window.start.timestamp(),
                query.window.end.timestamp(),
                after_id,
                query.page_size as i64,
            ],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )?;

        let mut records = Vec::new();
        let mut last_id = after_id;
        for row in rows {
            let (id, record_id, account_id, created_at, updated_at, fields) = row?;
            let fields = match serde_json::from_str::<Value>(&fields)? {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            records.push(RawRecord {
                id: record_id,
                account_id,
                created_at,
                updated_at,
                fields,
            });
            last_id = id;
        }

        let next_cursor = (records.len() == query.page_size).then(|| last_id.to_string());
        Ok(RecordPage {
            records,
            next_cursor,
        })
    }

    async fn check_ready(&self) -> Result<(), SourceError> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM records WHERE id < 0", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        Ok(())
    }

    fn source_type(&self) -> &'static str {
        "SQLite"
    }
}
