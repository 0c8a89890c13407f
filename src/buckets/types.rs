//! Records, partitions and buckets

use super::aligner::parse_timestamp;
use super::size::BucketSize;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of record being counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordType {
    #[serde(rename = "items")]
    Items,
    #[serde(rename = "scoreResults")]
    ScoreResults,
    #[serde(rename = "tasks")]
    Tasks,
    #[serde(rename = "evaluations")]
    Evaluations,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Items => "items",
            RecordType::ScoreResults => "scoreResults",
            RecordType::Tasks => "tasks",
            RecordType::Evaluations => "evaluations",
        }
    }
}

impl std::str::FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "items" => Ok(RecordType::Items),
            "scoreResults" => Ok(RecordType::ScoreResults),
            "tasks" => Ok(RecordType::Tasks),
            "evaluations" => Ok(RecordType::Evaluations),
            other => Err(format!("unknown record type {}", other)),
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of reprocessing work: a (record type, account) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedPartition {
    pub record_type: RecordType,
    pub account_id: String,
}

impl AffectedPartition {
    pub fn new(record_type: RecordType, account_id: impl Into<String>) -> Self {
        Self {
            record_type,
            account_id: account_id.into(),
        }
    }
}

impl std::fmt::Display for AffectedPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.record_type, self.account_id)
    }
}

/// Ground-truth record as returned by the record source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub id: String,
    pub account_id: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl RawRecord {
    /// Event time: `created_at`, falling back to `updated_at`
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| self.updated_at.as_deref().and_then(parse_timestamp))
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Optional sub-dimensions a bucket can be scoped to
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketScope {
    pub scorecard_id: Option<String>,
    pub score_id: Option<String>,
}

/// Identity used for the sink's find-then-write reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub record_type: RecordType,
    pub account_id: String,
    pub scope: BucketScope,
    pub time_range_start: DateTime<Utc>,
    pub size: BucketSize,
}

/// Aggregated count for one aligned time range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub record_type: RecordType,
    pub account_id: String,
    #[serde(flatten)]
    pub scope: BucketScope,
    pub time_range_start: DateTime<Utc>,
    pub time_range_end: DateTime<Utc>,
    pub size: BucketSize,
    pub count: u64,
    pub complete: bool,
}

impl Bucket {
    pub fn number_of_minutes(&self) -> i64 {
        self.size.minutes()
    }

    pub fn key(&self) -> BucketKey {
        BucketKey {
            record_type: self.record_type,
            account_id: self.account_id.clone(),
            scope: self.scope.clone(),
            time_range_start: self.time_range_start,
            size: self.size,
        }
    }
}
