use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::SqliteConnection;
use log::{debug, warn};
use uuid::Uuid;

use cairn_core::cache::{
    plan_category_upsert, CacheRepositoryTrait, CachedRecord, Category, CategoryBatch,
    CategoryChangeSet, UpsertCounts,
};
use cairn_core::Result;

use super::model::CacheEntryDB;
use crate::db::WriteHandle;
use crate::errors::StorageError;
use crate::schema::cache_entries;

/// Rows per multi-row statement, well under SQLite's bound-parameter limit.
const WRITE_CHUNK: usize = 200;

/// SQLite-backed cache. Every call, reads included, goes through the writer
/// so upserts for a category never interleave.
pub struct CacheRepository {
    writer: WriteHandle,
}

impl CacheRepository {
    pub fn new(writer: WriteHandle) -> Self {
        Self { writer }
    }
}

fn existing_ids(conn: &mut SqliteConnection, category: Category) -> Result<Vec<Uuid>> {
    let raw: Vec<String> = cache_entries::table
        .filter(cache_entries::category.eq(category.as_str()))
        .select(cache_entries::record_id)
        .load(conn)
        .map_err(StorageError::from)?;
    Ok(raw
        .iter()
        .filter_map(|value| match Uuid::parse_str(value) {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("[Cache] Ignoring row with malformed id '{}'", value);
                None
            }
        })
        .collect())
}

fn apply_changes(
    conn: &mut SqliteConnection,
    category: Category,
    changes: CategoryChangeSet,
) -> Result<()> {
    let category_value = category.as_str();

    let delete_ids: Vec<String> = changes.deletes.iter().map(Uuid::to_string).collect();
    for chunk in delete_ids.chunks(WRITE_CHUNK) {
        diesel::delete(
            cache_entries::table
                .filter(cache_entries::category.eq(category_value))
                .filter(cache_entries::record_id.eq_any(chunk)),
        )
        .execute(conn)
        .map_err(StorageError::from)?;
    }

    let inserts: Vec<CacheEntryDB> = changes.inserts.into_iter().map(CacheEntryDB::from).collect();
    for chunk in inserts.chunks(WRITE_CHUNK) {
        diesel::insert_into(cache_entries::table)
            .values(chunk)
            .execute(conn)
            .map_err(StorageError::from)?;
    }

    for row in changes.updates.into_iter().map(CacheEntryDB::from) {
        let CacheEntryDB {
            record_id,
            payload,
            cached_at,
            sort_order,
            ..
        } = row;
        diesel::update(cache_entries::table.find((record_id, category_value)))
            .set((
                cache_entries::payload.eq(payload),
                cache_entries::cached_at.eq(cached_at),
                cache_entries::sort_order.eq(sort_order),
            ))
            .execute(conn)
            .map_err(StorageError::from)?;
    }
    Ok(())
}

#[async_trait]
impl CacheRepositoryTrait for CacheRepository {
    async fn upsert_batch(&self, batches: Vec<CategoryBatch>) -> Result<UpsertCounts> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<UpsertCounts> {
                let now = Utc::now();
                let mut totals = UpsertCounts::default();
                for batch in &batches {
                    let existing = existing_ids(conn, batch.category)?;
                    let changes = plan_category_upsert(&existing, batch, now);
                    let counts = changes.counts();
                    apply_changes(conn, batch.category, changes)?;
                    debug!(
                        "[Cache] {}: {} inserted, {} updated, {} deleted",
                        batch.category, counts.inserted, counts.updated, counts.deleted
                    );
                    totals += counts;
                }
                Ok(totals)
            })
            .await
    }

    async fn fetch(&self, category: Category) -> Result<Vec<CachedRecord>> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Vec<CachedRecord>> {
                let rows = cache_entries::table
                    .filter(cache_entries::category.eq(category.as_str()))
                    .order((
                        cache_entries::cached_at.desc(),
                        cache_entries::sort_order.asc(),
                    ))
                    .select(CacheEntryDB::as_select())
                    .load::<CacheEntryDB>(conn)
                    .map_err(StorageError::from)?;

                Ok(rows
                    .into_iter()
                    .filter_map(|row| match CachedRecord::try_from(row) {
                        Ok(record) => Some(record),
                        Err(e) => {
                            warn!("[Cache] Skipping unreadable {} row: {}", category, e);
                            None
                        }
                    })
                    .collect())
            })
            .await
    }

    async fn remove(&self, category: Category, record_ids: Vec<Uuid>) -> Result<usize> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                let ids: Vec<String> = record_ids.iter().map(Uuid::to_string).collect();
                let mut removed = 0;
                for chunk in ids.chunks(WRITE_CHUNK) {
                    removed += diesel::delete(
                        cache_entries::table
                            .filter(cache_entries::category.eq(category.as_str()))
                            .filter(cache_entries::record_id.eq_any(chunk)),
                    )
                    .execute(conn)
                    .map_err(StorageError::from)?;
                }
                Ok(removed)
            })
            .await
    }

    async fn clear(&self, category: Category) -> Result<usize> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                Ok(diesel::delete(
                    cache_entries::table.filter(cache_entries::category.eq(category.as_str())),
                )
                .execute(conn)
                .map_err(StorageError::from)?)
            })
            .await
    }

    async fn clear_all(&self) -> Result<usize> {
        self.writer
            .exec(|conn: &mut SqliteConnection| -> Result<usize> {
                Ok(diesel::delete(cache_entries::table)
                    .execute(conn)
                    .map_err(StorageError::from)?)
            })
            .await
    }

    async fn count_by_category(&self) -> Result<HashMap<Category, usize>> {
        self.writer
            .exec(|conn: &mut SqliteConnection| -> Result<HashMap<Category, usize>> {
                let rows: Vec<(String, i64)> = cache_entries::table
                    .group_by(cache_entries::category)
                    .select((cache_entries::category, count_star()))
                    .load(conn)
                    .map_err(StorageError::from)?;

                let mut counts = HashMap::new();
                for (category, count) in rows {
                    match category.parse::<Category>() {
                        Ok(category) if count > 0 => {
                            counts.insert(category, count as usize);
                        }
                        Ok(_) => {}
                        Err(e) => warn!("[Cache] {}", e),
                    }
                }
                Ok(counts)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, init, run_migrations, spawn_writer};
    use cairn_core::cache::CacheEntryDraft;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn batch(category: Category, ids: &[u128]) -> CategoryBatch {
        CategoryBatch {
            category,
            entries: ids
                .iter()
                .map(|n| CacheEntryDraft {
                    record_id: id(*n),
                    payload: format!("payload-{}", n).into_bytes(),
                })
                .collect(),
        }
    }

    fn open_at(app_data: &str) -> CacheRepository {
        let db_path = init(app_data).expect("init db");
        run_migrations(&db_path).expect("migrate db");
        let pool = create_pool(&db_path).expect("create pool");
        CacheRepository::new(spawn_writer(pool.as_ref().clone()))
    }

    fn setup() -> CacheRepository {
        let app_data = tempdir()
            .expect("tempdir")
            .keep()
            .to_string_lossy()
            .to_string();
        open_at(&app_data)
    }

    fn ids(rows: &[CachedRecord]) -> Vec<Uuid> {
        rows.iter().map(|r| r.record_id).collect()
    }

    #[tokio::test]
    async fn replace_category_prunes_missing_rows() {
        let repo = setup();
        repo.upsert_batch(vec![batch(Category::Own, &[1, 2, 3])])
            .await
            .unwrap();

        let counts = repo
            .upsert_batch(vec![batch(Category::Own, &[3, 4])])
            .await
            .unwrap();
        assert_eq!(
            counts,
            UpsertCounts {
                inserted: 1,
                updated: 1,
                deleted: 2
            }
        );

        let rows = repo.fetch(Category::Own).await.unwrap();
        assert_eq!(ids(&rows), vec![id(3), id(4)]);
    }

    #[tokio::test]
    async fn accumulate_category_keeps_previous_rows() {
        let repo = setup();
        repo.upsert_batch(vec![batch(Category::Nearby, &[1, 2])])
            .await
            .unwrap();
        repo.upsert_batch(vec![batch(Category::Nearby, &[3])])
            .await
            .unwrap();

        let rows = repo.fetch(Category::Nearby).await.unwrap();
        assert_eq!(rows.len(), 3);
        // Newest batch first.
        assert_eq!(rows[0].record_id, id(3));
    }

    #[tokio::test]
    async fn same_id_lives_independently_per_category() {
        let repo = setup();
        repo.upsert_batch(vec![
            batch(Category::Own, &[1]),
            batch(Category::Public, &[1]),
        ])
        .await
        .unwrap();

        repo.upsert_batch(vec![batch(Category::Own, &[])])
            .await
            .unwrap();

        assert!(repo.fetch(Category::Own).await.unwrap().is_empty());
        assert_eq!(repo.fetch(Category::Public).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_replaces_payload_and_keeps_batch_order() {
        let repo = setup();
        repo.upsert_batch(vec![batch(Category::Public, &[5, 6, 7])])
            .await
            .unwrap();

        let mut second = batch(Category::Public, &[7, 5, 6]);
        second.entries[0].payload = b"seven-v2".to_vec();
        repo.upsert_batch(vec![second]).await.unwrap();

        let rows = repo.fetch(Category::Public).await.unwrap();
        assert_eq!(ids(&rows), vec![id(7), id(5), id(6)]);
        assert_eq!(rows[0].payload, b"seven-v2".to_vec());
    }

    #[tokio::test]
    async fn remove_clear_and_counts() {
        let repo = setup();
        repo.upsert_batch(vec![
            batch(Category::Own, &[1, 2]),
            batch(Category::Nearby, &[3, 4, 5]),
        ])
        .await
        .unwrap();

        let counts = repo.count_by_category().await.unwrap();
        assert_eq!(counts.get(&Category::Own), Some(&2));
        assert_eq!(counts.get(&Category::Nearby), Some(&3));
        assert_eq!(counts.get(&Category::Public), None);

        assert_eq!(
            repo.remove(Category::Nearby, vec![id(3), id(99)])
                .await
                .unwrap(),
            1
        );
        assert_eq!(repo.clear(Category::Own).await.unwrap(), 2);
        assert_eq!(repo.clear_all().await.unwrap(), 2);
        assert!(repo.count_by_category().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rows_survive_reopening_the_database() {
        let app_data = tempdir()
            .expect("tempdir")
            .keep()
            .to_string_lossy()
            .to_string();
        {
            let repo = open_at(&app_data);
            repo.upsert_batch(vec![batch(Category::Own, &[1, 2])])
                .await
                .unwrap();
        }

        let reopened = open_at(&app_data);
        assert_eq!(reopened.fetch(Category::Own).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_upserts_do_not_interleave() {
        let repo = Arc::new(setup());
        let mut handles = Vec::new();
        for round in 0..8u128 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                let start = round * 10;
                repo.upsert_batch(vec![batch(Category::Own, &[start, start + 1, start + 2])])
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Replace semantics: exactly one full batch remains.
        let rows = repo.fetch(Category::Own).await.unwrap();
        assert_eq!(rows.len(), 3);
        let base = rows[0].record_id.as_u128() / 10 * 10;
        let mut found: Vec<u128> = rows.iter().map(|r| r.record_id.as_u128()).collect();
        found.sort();
        assert_eq!(found, vec![base, base + 1, base + 2]);
    }
}
