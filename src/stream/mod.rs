//! Stream notification intake

pub mod classifier;
pub mod notification;

pub use classifier::{classify_batch, Classification, KeywordClassifier, SourceClassifier};
pub use notification::{CdcBatch, EventKind, StreamNotification};
