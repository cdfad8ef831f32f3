//! Non-durable cache backend. Serializes callers on one async mutex.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::cache_model::{
    plan_category_upsert, sort_for_display, CachedRecord, Category, CategoryBatch, UpsertCounts,
};
use super::cache_traits::CacheRepositoryTrait;
use crate::errors::Result;

#[derive(Debug, Default)]
pub struct InMemoryCacheRepository {
    rows: Mutex<HashMap<Category, HashMap<Uuid, CachedRecord>>>,
}

impl InMemoryCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheRepositoryTrait for InMemoryCacheRepository {
    async fn upsert_batch(&self, batches: Vec<CategoryBatch>) -> Result<UpsertCounts> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();
        let mut totals = UpsertCounts::default();

        for batch in &batches {
            let bucket = rows.entry(batch.category).or_default();
            let existing: Vec<Uuid> = bucket.keys().copied().collect();
            let changes = plan_category_upsert(&existing, batch, now);
            totals += changes.counts();

            for id in &changes.deletes {
                bucket.remove(id);
            }
            for row in changes.inserts.into_iter().chain(changes.updates) {
                bucket.insert(row.record_id, row);
            }
        }

        Ok(totals)
    }

    async fn fetch(&self, category: Category) -> Result<Vec<CachedRecord>> {
        let rows = self.rows.lock().await;
        let mut out: Vec<CachedRecord> = rows
            .get(&category)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default();
        sort_for_display(&mut out);
        Ok(out)
    }

    async fn remove(&self, category: Category, record_ids: Vec<Uuid>) -> Result<usize> {
        let mut rows = self.rows.lock().await;
        let Some(bucket) = rows.get_mut(&category) else {
            return Ok(0);
        };
        Ok(record_ids
            .iter()
            .filter(|id| bucket.remove(id).is_some())
            .count())
    }

    async fn clear(&self, category: Category) -> Result<usize> {
        let mut rows = self.rows.lock().await;
        Ok(rows.remove(&category).map(|bucket| bucket.len()).unwrap_or(0))
    }

    async fn clear_all(&self) -> Result<usize> {
        let mut rows = self.rows.lock().await;
        let removed = rows.values().map(HashMap::len).sum();
        rows.clear();
        Ok(removed)
    }

    async fn count_by_category(&self) -> Result<HashMap<Category, usize>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(category, bucket)| (*category, bucket.len()))
            .collect())
    }
}
