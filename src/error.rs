//! Error types for the record source, aggregation sink and invocation boundary

use std::time::Duration;

/// Failure reading ground-truth records
#[derive(Debug)]
pub enum SourceError {
    Database(String),
    Decode(String),
    Unavailable(String),
}

impl From<rusqlite::Error> for SourceError {
    fn from(err: rusqlite::Error) -> Self {
        SourceError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Decode(err.to_string())
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Database(e) => write!(f, "Record source database error: {}", e),
            SourceError::Decode(e) => write!(f, "Record decode error: {}", e),
            SourceError::Unavailable(e) => write!(f, "Record source unavailable: {}", e),
        }
    }
}

impl std::error::Error for SourceError {}

/// Failure talking to the bucket store
#[derive(Debug)]
pub enum SinkError {
    Database(String),
    NotFound(i64),
    Unavailable(String),
}

impl From<rusqlite::Error> for SinkError {
    fn from(err: rusqlite::Error) -> Self {
        SinkError::Database(err.to_string())
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Database(e) => write!(f, "Aggregation sink database error: {}", e),
            SinkError::NotFound(id) => write!(f, "Bucket {} not found", id),
            SinkError::Unavailable(e) => write!(f, "Aggregation sink unavailable: {}", e),
        }
    }
}

impl std::error::Error for SinkError {}

/// Failure that abandons one partition without touching the others
#[derive(Debug)]
pub enum PartitionError {
    Source(SourceError),
    DeadlineExceeded(Duration),
    Aborted(String),
}

impl From<SourceError> for PartitionError {
    fn from(err: SourceError) -> Self {
        PartitionError::Source(err)
    }
}

impl std::fmt::Display for PartitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionError::Source(e) => write!(f, "{}", e),
            PartitionError::DeadlineExceeded(d) => {
                write!(f, "Invocation deadline of {}ms exceeded", d.as_millis())
            }
            PartitionError::Aborted(e) => write!(f, "Partition task aborted: {}", e),
        }
    }
}

impl std::error::Error for PartitionError {}

/// Failure of a whole invocation
///
/// Only raised when processing cannot start at all. The CDC transport
/// redelivers the batch later, which is safe because buckets are overwritten.
#[derive(Debug)]
pub enum InvocationError {
    InvalidBatch(String),
    SourceUnavailable(SourceError),
    SinkUnavailable(SinkError),
}

impl From<serde_json::Error> for InvocationError {
    fn from(err: serde_json::Error) -> Self {
        InvocationError::InvalidBatch(err.to_string())
    }
}

impl std::fmt::Display for InvocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationError::InvalidBatch(e) => write!(f, "Invalid CDC batch: {}", e),
            InvocationError::SourceUnavailable(e) => write!(f, "Cannot start invocation: {}", e),
            InvocationError::SinkUnavailable(e) => write!(f, "Cannot start invocation: {}", e),
        }
    }
}

impl std::error::Error for InvocationError {}
