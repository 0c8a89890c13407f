//! Bucket alignment and counting
//!
//! Pure, synchronous code: nothing here blocks or touches I/O.

pub mod aligner;
pub mod counter;
pub mod size;
pub mod types;

pub use aligner::{align_to_bucket, parse_timestamp};
pub use counter::{count_records, BucketCounter, CountReport, RecordFilter};
pub use size::BucketSize;
pub use types::{AffectedPartition, Bucket, BucketKey, BucketScope, RawRecord, RecordType};
