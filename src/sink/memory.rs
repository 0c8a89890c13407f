//! In-process bucket store for tests and dry runs

use super::{AggregationSink, StoredBucket};
use crate::buckets::{Bucket, BucketKey};
use crate::error::SinkError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Default)]
struct Store {
    next_id: i64,
    buckets: BTreeMap<i64, Bucket>,
    by_key: HashMap<BucketKey, i64>,
    creates: usize,
    updates: usize,
}

#[derive(Default)]
pub struct MemoryBucketSink {
    store: Mutex<Store>,
}

impl MemoryBucketSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Store>, SinkError> {
        self.store
            .lock()
            .map_err(|_| SinkError::Unavailable("bucket store lock poisoned".to_string()))
    }

    /// All buckets ordered by key
    pub fn snapshot(&self) -> Result<Vec<Bucket>, SinkError> {
        let store = self.lock()?;
        let mut buckets: Vec<Bucket> = store.buckets.values().cloned().collect();
        buckets.sort_by_key(Bucket::key);
        Ok(buckets)
    }

    /// (creates, updates) performed so far
    pub fn write_counts(&self) -> Result<(usize, usize), SinkError> {
        let store = self.lock()?;
        Ok((store.creates, store.updates))
    }
}

#[async_trait]
impl AggregationSink for MemoryBucketSink {
    async fn find_bucket(&self, key: &BucketKey) -> Result<Option<StoredBucket>, SinkError> {
        let store = self.lock()?;
        Ok(store.by_key.get(key).and_then(|id| {
            store.buckets.get(id).map(|bucket| StoredBucket {
                id: *id,
                bucket: bucket.clone(),
            })
        }))
    }

    async fn create_bucket(&self, bucket: &Bucket) -> Result<StoredBucket, SinkError> {
        let mut store = self.lock()?;
        let key = bucket.key();
        let id = match store.by_key.get(&key) {
            Some(id) => *id,
            None => {
                store.next_id += 1;
                let id = store.next_id;
                store.by_key.insert(key, id);
                id
            }
        };
        store.buckets.insert(id, bucket.clone());
        store.creates += 1;
        Ok(StoredBucket {
            id,
            bucket: bucket.clone(),
        })
    }

    async fn update_bucket(
        &self,
        id: i64,
        count: u64,
        complete: bool,
    ) -> Result<StoredBucket, SinkError> {
        let mut store = self.lock()?;
        let bucket = store.buckets.get_mut(&id).ok_or(SinkError::NotFound(id))?;
        bucket.count = count;
        bucket.complete = complete;
        let bucket = bucket.clone();
        store.updates += 1;
        Ok(StoredBucket { id, bucket })
    }

    fn sink_type(&self) -> &'static str {
        "memory"
    }
}
