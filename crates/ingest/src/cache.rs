// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Query result cache
//!
//! Results are keyed by the SHA-256 of the exact query text. With the
//! default [`NeverEvict`] policy an entry lives as long as the cache does:
//! the same text against changed data returns the stale result until the
//! cache is dropped or cleared.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use arrow::array::{MutableArrayData, make_array};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use chrono::{DateTime, TimeDelta, Utc};
use diagnostics::*;
use sha2::{Digest, Sha256};

use crate::warehouse::Warehouse;
use crate::{Error, Result};

/// Source of "now" for entry ages
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Decides whether a stored entry is still served
pub trait EvictionPolicy: Send + Sync {
    fn is_expired(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool;
}

/// Entries live for the life of the cache
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverEvict;

impl EvictionPolicy for NeverEvict {
    fn is_expired(&self, _stored_at: DateTime<Utc>, _now: DateTime<Utc>) -> bool {
        false
    }
}

/// Entries older than a fixed age are re-executed
#[derive(Debug, Clone, Copy)]
pub struct MaxAge(pub TimeDelta);

impl EvictionPolicy for MaxAge {
    fn is_expired(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - stored_at > self.0
    }
}

/// Hex SHA-256 of the query text, byte for byte
pub fn cache_key(sql: &str) -> String {
    hex::encode(Sha256::digest(sql.as_bytes()))
}

/// Copy every buffer so the result shares no memory with its source
pub fn deep_copy(batch: &RecordBatch) -> Result<RecordBatch> {
    let columns = batch
        .columns()
        .iter()
        .map(|column| {
            let data = column.to_data();
            let mut copy = MutableArrayData::new(vec![&data], false, data.len());
            copy.extend(0, 0, data.len());
            make_array(copy.freeze())
        })
        .collect();
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(
        batch.schema(),
        columns,
        &options,
    )?)
}

struct CacheEntry {
    batch: RecordBatch,
    stored_at: DateTime<Utc>,
}

/// Memoised warehouse query results
///
/// Pass one instance to everything that queries; the internal mutex makes
/// it safe to share across tasks. The lock is never held while a query runs,
/// so two concurrent misses on the same text both execute and the later
/// store wins.
pub struct QueryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    policy: Box<dyn EvictionPolicy>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_policy(Arc::new(SystemClock), Box::new(NeverEvict))
    }

    pub fn with_policy(clock: Arc<dyn Clock>, policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            policy,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries
            .lock()
            .map_err(|e| Error::MutexPoisoned(e.to_string()))
    }

    /// An independent copy of the cached result, if present and not expired
    pub fn get(&self, sql: &str) -> Result<Option<RecordBatch>> {
        let key = cache_key(sql);
        let now = self.clock.now();
        let mut entries = self.lock()?;
        let expired = match entries.get(&key) {
            None => return Ok(None),
            Some(entry) => self.policy.is_expired(entry.stored_at, now),
        };
        if expired {
            debug!("Query cache entry {key} expired", key: key.as_str());
            entries.remove(&key);
            return Ok(None);
        }
        entries
            .get(&key)
            .map(|entry| deep_copy(&entry.batch))
            .transpose()
    }

    /// Store a copy of `batch` as the result of `sql`
    pub fn insert(&self, sql: &str, batch: &RecordBatch) -> Result<()> {
        let entry = CacheEntry {
            batch: deep_copy(batch)?,
            stored_at: self.clock.now(),
        };
        self.lock()?.insert(cache_key(sql), entry);
        Ok(())
    }

    /// Serve `sql` from the cache or run it on `warehouse` and remember the result.
    pub async fn execute(&self, warehouse: &dyn Warehouse, sql: &str) -> Result<RecordBatch> {
        if let Some(hit) = self.get(sql)? {
            info!("Query cache hit ({rows} rows)", rows: hit.num_rows());
            return Ok(hit);
        }
        let result = warehouse.execute_query(sql).await?;
        self.insert(sql, &result)?;
        Ok(result)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    pub fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSchema;
    use crate::warehouse::{LoadMode, TableId};
    use arrow::array::{Array, ArrayRef, Int64Array};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingWarehouse {
        queries: AtomicUsize,
    }

    #[async_trait]
    impl Warehouse for CountingWarehouse {
        async fn load(
            &self,
            _table: &TableId,
            _batch: &RecordBatch,
            _schema: &ColumnSchema,
            _mode: LoadMode,
        ) -> Result<()> {
            Ok(())
        }

        async fn get_schema(&self, _table: &TableId) -> Result<Option<ColumnSchema>> {
            Ok(None)
        }

        async fn execute_query(&self, _sql: &str) -> Result<RecordBatch> {
            let n = self.queries.fetch_add(1, Ordering::SeqCst) as i64;
            Ok(RecordBatch::try_from_iter(vec![(
                "value",
                Arc::new(Int64Array::from(vec![1, n])) as ArrayRef,
            )])?)
        }
    }

    struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        fn advance(&self, delta: TimeDelta) {
            let mut now = self.0.lock().unwrap();
            *now += delta;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn values_ptr(batch: &RecordBatch) -> *const u8 {
        batch.column(0).to_data().buffers()[0].as_ptr()
    }

    #[test]
    fn test_key_is_exact_text_hash() {
        assert_eq!(cache_key("SELECT 1"), cache_key("SELECT 1"));
        assert_ne!(cache_key("SELECT 1"), cache_key("select 1"));
        assert_eq!(cache_key("SELECT 1").len(), 64);
    }

    #[tokio::test]
    async fn test_hits_return_independent_copies() {
        let warehouse = CountingWarehouse::default();
        let cache = QueryCache::new();

        let first = cache.execute(&warehouse, "SELECT 1").await.unwrap();
        let second = cache.execute(&warehouse, "SELECT 1").await.unwrap();
        let third = cache.execute(&warehouse, "SELECT 1").await.unwrap();

        assert_eq!(warehouse.queries.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_ne!(values_ptr(&first), values_ptr(&second));
        assert_ne!(values_ptr(&second), values_ptr(&third));
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_copy_can_be_mutated_without_touching_cache() {
        let warehouse = CountingWarehouse::default();
        let cache = QueryCache::new();

        let first = cache.execute(&warehouse, "SELECT 1").await.unwrap();
        let column = Int64Array::from(first.column(0).to_data());
        drop(first);

        let mut builder = column
            .into_builder()
            .unwrap_or_else(|_| panic!("cached result aliases the returned batch"));
        builder.values_slice_mut()[0] = 99;
        assert_eq!(builder.finish().value(0), 99);

        let again = cache.execute(&warehouse, "SELECT 1").await.unwrap();
        let values = again
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(values.value(0), 1);
    }

    #[tokio::test]
    async fn test_distinct_text_is_a_miss() {
        let warehouse = CountingWarehouse::default();
        let cache = QueryCache::new();
        cache.execute(&warehouse, "SELECT 1").await.unwrap();
        cache.execute(&warehouse, "SELECT  1").await.unwrap();
        assert_eq!(warehouse.queries.load(Ordering::SeqCst), 2);

        cache.clear().unwrap();
        assert!(cache.is_empty().unwrap());
        cache.execute(&warehouse, "SELECT 1").await.unwrap();
        assert_eq!(warehouse.queries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_max_age_policy_expires_entries() {
        let clock = Arc::new(FixedClock(Mutex::new(Utc::now())));
        let cache = QueryCache::with_policy(clock.clone(), Box::new(MaxAge(TimeDelta::minutes(5))));
        let warehouse = CountingWarehouse::default();

        cache.execute(&warehouse, "SELECT 1").await.unwrap();
        clock.advance(TimeDelta::minutes(4));
        cache.execute(&warehouse, "SELECT 1").await.unwrap();
        assert_eq!(warehouse.queries.load(Ordering::SeqCst), 1);

        clock.advance(TimeDelta::minutes(2));
        let fresh = cache.execute(&warehouse, "SELECT 1").await.unwrap();
        assert_eq!(warehouse.queries.load(Ordering::SeqCst), 2);
        let values = fresh
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(values.value(1), 1);
    }
}
