//! SQLite bucket store (`metric_buckets` table)

use super::{AggregationSink, StoredBucket};
use crate::buckets::{Bucket, BucketKey, BucketScope, BucketSize, RecordType};
use crate::error::SinkError;
use crate::sqlite::open_database;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = "id, record_type, account_id, scorecard_id, score_id,
    time_range_start, time_range_end, number_of_minutes, count, complete";

pub struct SqliteBucketSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBucketSink {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let conn = open_database(db_path)?;

        log::info!("✅ SQLite bucket sink initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SinkError> {
        self.conn
            .lock()
            .map_err(|_| SinkError::Unavailable("connection lock poisoned".to_string()))
    }

    /// Every stored bucket ordered by key columns
    pub fn snapshot(&self) -> Result<Vec<StoredBucket>, SinkError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM metric_buckets
             ORDER BY record_type, account_id, scorecard_id, score_id, time_range_start, number_of_minutes",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map([], read_row)?;

        let mut buckets = Vec::new();
        for row in rows {
            buckets.push(row??);
        }
        Ok(buckets)
    }

    fn load(conn: &Connection, id: i64) -> Result<StoredBucket, SinkError> {
        conn.query_row(
            &format!("SELECT {} FROM metric_buckets WHERE id = ?1", SELECT_COLUMNS),
            [id],
            read_row,
        )
        .optional()?
        .ok_or(SinkError::NotFound(id))?
    }
}

/// Column values as stored, before domain decoding
struct BucketRow {
    id: i64,
    record_type: String,
    account_id: String,
    scorecard_id: String,
    score_id: String,
    start: i64,
    end: i64,
    minutes: i64,
    count: i64,
    complete: bool,
}

/// Outer error is column access; inner error is domain decoding
fn read_row(row: &Row<'_>) -> rusqlite::Result<Result<StoredBucket, SinkError>> {
    let raw = BucketRow {
        id: row.get(0)?,
        record_type: row.get(1)?,
        account_id: row.get(2)?,
        scorecard_id: row.get(3)?,
        score_id: row.get(4)?,
        start: row.get(5)?,
        end: row.get(6)?,
        minutes: row.get(7)?,
        count: row.get(8)?,
        complete: row.get(9)?,
    };
    Ok(decode_row(raw))
}

fn decode_row(raw: BucketRow) -> Result<StoredBucket, SinkError> {
    let record_type = raw
        .record_type
        .parse::<RecordType>()
        .map_err(SinkError::Database)?;
    let size = BucketSize::from_minutes(raw.minutes)
        .ok_or_else(|| SinkError::Database(format!("unsupported bucket size {}", raw.minutes)))?;
    let count = u64::try_from(raw.count)
        .map_err(|_| SinkError::Database(format!("negative count {}", raw.count)))?;

    Ok(StoredBucket {
        id: raw.id,
        bucket: Bucket {
            record_type,
            account_id: raw.account_id,
            scope: BucketScope {
                scorecard_id: non_empty(raw.scorecard_id),
                score_id: non_empty(raw.score_id),
            },
            time_range_start: from_epoch(raw.start)?,
            time_range_end: from_epoch(raw.end)?,
            size,
            count,
            complete: raw.complete,
        },
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn from_epoch(secs: i64) -> Result<DateTime<Utc>, SinkError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| SinkError::Database(format!("invalid timestamp {}", secs)))
}

fn count_param(count: u64) -> Result<i64, SinkError> {
    i64::try_from(count).map_err(|_| SinkError::Database(format!("count {} out of range", count)))
}

#[async_trait]
impl AggregationSink for SqliteBucketSink {
    async fn find_bucket(&self, key: &BucketKey) -> Result<Option<StoredBucket>, SinkError> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                &format!(
                    "SELECT {} FROM metric_buckets
                     WHERE record_type = ?1 AND account_id = ?2
                       AND scorecard_id = ?3 AND score_id = ?4
                       AND time_range_start = ?5 AND number_of_minutes = ?6",
                    SELECT_COLUMNS
                ),
                params![
                    key.record_type.as_str(),
                    key.account_id,
                    key.scope.scorecard_id.as_deref().unwrap_or(""),
                    key.scope.score_id.as_deref().unwrap_or(""),
                    key.time_range_start.timestamp(),
                    key.size.minutes(),
                ],
                read_row,
            )
            .optional()?;
        found.transpose()
    }

    /// Insert; a row created concurrently under the same key is overwritten
    async fn create_bucket(&self, bucket: &Bucket) -> Result<StoredBucket, SinkError> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp();
        let id: i64 = conn.query_row(
            r#"
            INSERT INTO metric_buckets (
                record_type, account_id, scorecard_id, score_id,
                time_range_start, time_range_end, number_of_minutes,
                count, complete, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            ON CONFLICT(record_type, account_id, scorecard_id, score_id, time_range_start, number_of_minutes)
            DO UPDATE SET
                count = excluded.count,
                complete = excluded.complete,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
            params![
                bucket.record_type.as_str(),
                bucket.account_id,
                bucket.scope.scorecard_id.as_deref().unwrap_or(""),
                bucket.scope.score_id.as_deref().unwrap_or(""),
                bucket.time_range_start.timestamp(),
                bucket.time_range_end.timestamp(),
                bucket.size.minutes(),
                count_param(bucket.count)?,
                bucket.complete,
                now,
            ],
            |row| row.get(0),
        )?;
        Self::load(&conn, id)
    }

    async fn update_bucket(
        &self,
        id: i64,
        count: u64,
        complete: bool,
    ) -> Result<StoredBucket, SinkError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE metric_buckets SET count = ?1, complete = ?2, updated_at = ?3 WHERE id = ?4",
            params![count_param(count)?, complete, Utc::now().timestamp(), id],
        )?;
        if changed == 0 {
            return Err(SinkError::NotFound(id));
        }
        Self::load(&conn, id)
    }

    async fn check_ready(&self) -> Result<(), SinkError> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM metric_buckets WHERE id < 0", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "SQLite"
    }
}
