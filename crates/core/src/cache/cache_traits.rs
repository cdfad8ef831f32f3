use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use super::cache_model::{CachedRecord, Category, CategoryBatch, UpsertCounts};
use crate::errors::Result;

/// Durable backend for the cache.
///
/// Implementations run every call on one serialized execution context, so two
/// `upsert_batch` calls for the same category never interleave their
/// read/modify/delete steps. `upsert_batch` commits all categories in one
/// atomic write, using [`plan_category_upsert`](super::plan_category_upsert)
/// to decide the row changes.
#[async_trait]
pub trait CacheRepositoryTrait: Send + Sync {
    async fn upsert_batch(&self, batches: Vec<CategoryBatch>) -> Result<UpsertCounts>;

    /// Rows for the category, newest first.
    async fn fetch(&self, category: Category) -> Result<Vec<CachedRecord>>;

    async fn remove(&self, category: Category, record_ids: Vec<Uuid>) -> Result<usize>;

    async fn clear(&self, category: Category) -> Result<usize>;

    async fn clear_all(&self) -> Result<usize>;

    async fn count_by_category(&self) -> Result<HashMap<Category, usize>>;
}
