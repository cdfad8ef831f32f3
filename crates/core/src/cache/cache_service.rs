use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::{debug, warn};
use uuid::Uuid;

use super::cache_model::{CacheEntryDraft, Category, CategoryBatch, UpsertCounts};
use super::cache_traits::CacheRepositoryTrait;
use crate::errors::{CacheError, Error};
use crate::stones::DomainRecord;

pub type CacheResult<T> = std::result::Result<T, CacheError>;

fn fetch_failed(err: Error) -> CacheError {
    match err {
        Error::Cache(inner) => inner,
        other => CacheError::FetchFailed(other.to_string()),
    }
}

fn save_failed(err: Error) -> CacheError {
    match err {
        Error::Cache(inner) => inner,
        other => CacheError::SaveFailed(other.to_string()),
    }
}

/// Typed façade over a [`CacheRepositoryTrait`] backend.
///
/// Serializes domain records to JSON payloads on the way in and skips entries
/// that fail to deserialize on the way out.
pub struct CacheStore {
    repository: RwLock<Option<Arc<dyn CacheRepositoryTrait>>>,
}

impl CacheStore {
    pub fn new(repository: Arc<dyn CacheRepositoryTrait>) -> Self {
        Self {
            repository: RwLock::new(Some(repository)),
        }
    }

    /// A store with no backend yet. Every call fails with `NotConfigured`
    /// until [`attach`](Self::attach) is called.
    pub fn unconfigured() -> Self {
        Self {
            repository: RwLock::new(None),
        }
    }

    pub fn attach(&self, repository: Arc<dyn CacheRepositoryTrait>) {
        match self.repository.write() {
            Ok(mut slot) => *slot = Some(repository),
            Err(poisoned) => *poisoned.into_inner() = Some(repository),
        }
    }

    fn repository(&self) -> CacheResult<Arc<dyn CacheRepositoryTrait>> {
        let slot = self
            .repository
            .read()
            .map_err(|_| CacheError::FetchFailed("cache backend lock is poisoned".to_string()))?;
        slot.as_ref().cloned().ok_or(CacheError::NotConfigured)
    }

    fn encode<T: DomainRecord>(records: &[T]) -> CacheResult<Vec<CacheEntryDraft>> {
        records
            .iter()
            .map(|record| {
                let payload = serde_json::to_vec(record)
                    .map_err(|e| CacheError::SaveFailed(format!("serialize record: {}", e)))?;
                Ok(CacheEntryDraft {
                    record_id: record.record_id(),
                    payload,
                })
            })
            .collect()
    }

    /// Upsert several categories in one atomic write.
    ///
    /// `Replace` categories end up holding exactly the given records;
    /// `Accumulate` categories only gain or refresh entries.
    pub async fn upsert_batch<T: DomainRecord>(
        &self,
        entries: Vec<(Vec<T>, Category)>,
    ) -> CacheResult<UpsertCounts> {
        let repository = self.repository()?;
        let batches = entries
            .iter()
            .map(|(records, category)| {
                Ok(CategoryBatch {
                    category: *category,
                    entries: Self::encode(records)?,
                })
            })
            .collect::<CacheResult<Vec<_>>>()?;

        let counts = repository.upsert_batch(batches).await.map_err(save_failed)?;
        debug!(
            "[Cache] Upsert committed inserted={} updated={} deleted={}",
            counts.inserted, counts.updated, counts.deleted
        );
        Ok(counts)
    }

    /// Single-category form of [`upsert_batch`](Self::upsert_batch).
    pub async fn upsert<T: DomainRecord>(
        &self,
        records: &[T],
        category: Category,
    ) -> CacheResult<UpsertCounts> {
        self.upsert_batch(vec![(records.to_vec(), category)]).await
    }

    /// Cached records for the category, most recently cached first.
    pub async fn fetch<T: DomainRecord>(&self, category: Category) -> CacheResult<Vec<T>> {
        let repository = self.repository()?;
        let rows = repository.fetch(category).await.map_err(fetch_failed)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_slice::<T>(&row.payload) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "[Cache] Skipping undecodable {} entry {}: {}",
                    category, row.record_id, e
                ),
            }
        }
        Ok(records)
    }

    /// Evict specific records regardless of the category's policy.
    pub async fn remove(&self, category: Category, record_ids: Vec<Uuid>) -> CacheResult<usize> {
        if record_ids.is_empty() {
            return Ok(0);
        }
        let repository = self.repository()?;
        repository
            .remove(category, record_ids)
            .await
            .map_err(save_failed)
    }

    pub async fn clear(&self, category: Category) -> CacheResult<usize> {
        let repository = self.repository()?;
        let removed = repository.clear(category).await.map_err(save_failed)?;
        debug!("[Cache] Cleared {} {} entries", removed, category);
        Ok(removed)
    }

    /// Drop every entry in every category.
    pub async fn clear_all(&self) -> CacheResult<usize> {
        let repository = self.repository()?;
        let removed = repository.clear_all().await.map_err(save_failed)?;
        debug!("[Cache] Cleared all {} entries", removed);
        Ok(removed)
    }

    pub async fn counts(&self) -> CacheResult<HashMap<Category, usize>> {
        let repository = self.repository()?;
        repository.count_by_category().await.map_err(fetch_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheRepository;
    use crate::stones::Stone;
    use chrono::Utc;

    fn stone(n: u128, is_public: bool) -> Stone {
        Stone {
            id: Uuid::from_u128(n),
            name: format!("stone-{}", n),
            description: None,
            weight_kg: None,
            latitude: 0.0,
            longitude: 0.0,
            is_public,
            image_url: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn ids(records: &[Stone]) -> Vec<u128> {
        let mut ids: Vec<u128> = records.iter().map(|s| s.id.as_u128()).collect();
        ids.sort();
        ids
    }

    fn store() -> CacheStore {
        CacheStore::new(Arc::new(InMemoryCacheRepository::new()))
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let cache = store();
        let batch = vec![stone(1, false), stone(2, false)];

        let first = cache.upsert(&batch, Category::Own).await.unwrap();
        let second = cache.upsert(&batch, Category::Own).await.unwrap();

        assert_eq!(first, UpsertCounts { inserted: 2, updated: 0, deleted: 0 });
        assert_eq!(second, UpsertCounts { inserted: 0, updated: 2, deleted: 0 });
        assert_eq!(ids(&cache.fetch::<Stone>(Category::Own).await.unwrap()), vec![1, 2]);
    }

    #[tokio::test]
    async fn replace_category_keeps_only_latest_response() {
        let cache = store();
        cache
            .upsert(&[stone(1, false), stone(2, false), stone(3, false)], Category::Own)
            .await
            .unwrap();

        let counts = cache
            .upsert(&[stone(2, false), stone(4, false)], Category::Own)
            .await
            .unwrap();

        assert_eq!(counts, UpsertCounts { inserted: 1, updated: 1, deleted: 2 });
        assert_eq!(ids(&cache.fetch::<Stone>(Category::Own).await.unwrap()), vec![2, 4]);
    }

    #[tokio::test]
    async fn accumulate_category_never_prunes() {
        let cache = store();
        cache
            .upsert(&[stone(1, true), stone(2, true)], Category::Nearby)
            .await
            .unwrap();
        cache.upsert(&[stone(3, true)], Category::Nearby).await.unwrap();

        assert_eq!(
            ids(&cache.fetch::<Stone>(Category::Nearby).await.unwrap()),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn batch_counts_aggregate_across_categories() {
        let cache = store();
        let counts = cache
            .upsert_batch(vec![
                (vec![stone(1, true), stone(2, false)], Category::Own),
                (vec![stone(1, true)], Category::Public),
            ])
            .await
            .unwrap();
        assert_eq!(counts.inserted, 3);

        let categories = cache.counts().await.unwrap();
        assert_eq!(categories.get(&Category::Own), Some(&2));
        assert_eq!(categories.get(&Category::Public), Some(&1));
    }

    #[tokio::test]
    async fn undecodable_entries_are_skipped() {
        let repository = Arc::new(InMemoryCacheRepository::new());
        repository
            .upsert_batch(vec![CategoryBatch {
                category: Category::Public,
                entries: vec![CacheEntryDraft {
                    record_id: Uuid::from_u128(9),
                    payload: b"{not json".to_vec(),
                }],
            }])
            .await
            .unwrap();
        let cache = CacheStore::new(repository);
        cache.upsert_batch(vec![(vec![stone(1, true)], Category::Nearby)]).await.unwrap();

        assert!(cache.fetch::<Stone>(Category::Public).await.unwrap().is_empty());
        assert_eq!(cache.fetch::<Stone>(Category::Nearby).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unconfigured_store_reports_not_configured() {
        let cache = CacheStore::unconfigured();
        assert_eq!(
            cache.fetch::<Stone>(Category::Own).await.unwrap_err(),
            CacheError::NotConfigured
        );

        cache.attach(Arc::new(InMemoryCacheRepository::new()));
        assert!(cache.fetch::<Stone>(Category::Own).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_and_remove_evict_entries() {
        let cache = store();
        cache
            .upsert_batch(vec![
                (vec![stone(1, true), stone(2, true)], Category::Nearby),
                (vec![stone(1, true)], Category::Public),
            ])
            .await
            .unwrap();

        assert_eq!(
            cache.remove(Category::Nearby, vec![Uuid::from_u128(2)]).await.unwrap(),
            1
        );
        assert_eq!(ids(&cache.fetch::<Stone>(Category::Nearby).await.unwrap()), vec![1]);

        cache.clear(Category::Nearby).await.unwrap();
        assert!(cache.fetch::<Stone>(Category::Nearby).await.unwrap().is_empty());
        assert_eq!(cache.fetch::<Stone>(Category::Public).await.unwrap().len(), 1);

        cache.clear_all().await.unwrap();
        assert!(cache.fetch::<Stone>(Category::Public).await.unwrap().is_empty());
    }
}
