//! Bucketflow - CDC-triggered time-bucket metrics aggregation
//!
//! Maintains exact 1/5/15/60-minute event counts per account and record type.
//! Stream notifications only say *which* partitions changed; counts are always
//! recomputed from the Record Source and written over whatever the sink holds.
//!
//! # Architecture
//!
//! ```text
//! CDC batch → StreamClassifier → {AffectedPartition}
//!     ↓
//! ReprocessWindow (previous hour + current hour)
//!     ↓
//! per partition: RecordSource::fetch_all → BucketCounter
//!     ↓
//! AggregationSink (find → update | create)
//!     ↓
//! InvocationSummary
//! ```

pub mod buckets;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod processor;
pub mod sink;
pub mod source;
pub mod sqlite;
pub mod stream;
pub mod window;

pub use buckets::{
    align_to_bucket, AffectedPartition, Bucket, BucketCounter, BucketKey, BucketScope,
    BucketSize, CountReport, RawRecord, RecordFilter, RecordType,
};
pub use config::AggregatorConfig;
pub use error::{InvocationError, PartitionError, SinkError, SourceError};
pub use orchestrator::{InvocationSummary, Orchestrator};
pub use processor::{PartitionOutcome, PartitionProcessor};
pub use sink::{AggregationSink, MemoryBucketSink, SqliteBucketSink, StoredBucket};
pub use source::{MemoryRecordSource, RecordPage, RecordQuery, RecordSource, SqliteRecordSource};
pub use stream::{CdcBatch, EventKind, KeywordClassifier, SourceClassifier, StreamNotification};
pub use window::ReprocessWindow;
