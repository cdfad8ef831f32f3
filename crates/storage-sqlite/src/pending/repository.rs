use async_trait::async_trait;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::SqliteConnection;
use log::warn;
use uuid::Uuid;

use cairn_core::errors::{DatabaseError, Error};
use cairn_core::offline::{PendingRecord, PendingRecordRepositoryTrait};
use cairn_core::Result;

use super::model::PendingRecordDB;
use crate::db::WriteHandle;
use crate::errors::StorageError;
use crate::schema::pending_records;

/// Every read goes through the writer so it can purge unreadable rows and
/// never observes a half-applied drain step.
pub struct PendingRecordRepository {
    writer: WriteHandle,
}

impl PendingRecordRepository {
    pub fn new(writer: WriteHandle) -> Self {
        Self { writer }
    }
}

fn not_found(id: &str) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!(
        "pending record {} not found",
        id
    )))
}

#[async_trait]
impl PendingRecordRepositoryTrait for PendingRecordRepository {
    async fn insert(&self, record: PendingRecord) -> Result<()> {
        let row = PendingRecordDB::from(record);
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::insert_into(pending_records::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn list_pending(&self) -> Result<Vec<PendingRecord>> {
        self.writer
            .exec(|conn: &mut SqliteConnection| -> Result<Vec<PendingRecord>> {
                let rows = pending_records::table
                    .order((pending_records::created_at.asc(), pending_records::id.asc()))
                    .select(PendingRecordDB::as_select())
                    .load::<PendingRecordDB>(conn)
                    .map_err(StorageError::from)?;

                let mut records = Vec::with_capacity(rows.len());
                for row in rows {
                    let row_id = row.id.clone();
                    match PendingRecord::try_from(row) {
                        Ok(record) => records.push(record),
                        Err(e) => {
                            warn!(
                                "[OfflineQueue] Dropping unreadable pending record {}: {}",
                                row_id, e
                            );
                            diesel::delete(pending_records::table.find(row_id.as_str()))
                                .execute(conn)
                                .map_err(StorageError::from)?;
                        }
                    }
                }
                Ok(records)
            })
            .await
    }

    async fn count(&self) -> Result<usize> {
        self.writer
            .exec(|conn: &mut SqliteConnection| -> Result<usize> {
                let total: i64 = pending_records::table
                    .select(count_star())
                    .first(conn)
                    .map_err(StorageError::from)?;
                Ok(usize::try_from(total).unwrap_or(0))
            })
            .await
    }

    async fn mark_syncing(&self, id: Uuid) -> Result<bool> {
        let id = id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<bool> {
                let claimed = diesel::update(
                    pending_records::table
                        .filter(pending_records::id.eq(id.as_str()))
                        .filter(pending_records::is_syncing.eq(0)),
                )
                .set(pending_records::is_syncing.eq(1))
                .execute(conn)
                .map_err(StorageError::from)?;
                if claimed == 1 {
                    return Ok(true);
                }

                let exists: i64 = pending_records::table
                    .filter(pending_records::id.eq(id.as_str()))
                    .select(count_star())
                    .first(conn)
                    .map_err(StorageError::from)?;
                if exists == 0 {
                    return Err(not_found(&id));
                }
                Ok(false)
            })
            .await
    }

    async fn record_failure(&self, id: Uuid, error: String) -> Result<u32> {
        let id = id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<u32> {
                let attempts: i32 = pending_records::table
                    .find(id.as_str())
                    .select(pending_records::sync_attempts)
                    .first(conn)
                    .optional()
                    .map_err(StorageError::from)?
                    .ok_or_else(|| not_found(&id))?;
                let attempts = attempts.saturating_add(1);

                diesel::update(pending_records::table.find(id.as_str()))
                    .set((
                        pending_records::is_syncing.eq(0),
                        pending_records::sync_attempts.eq(attempts),
                        pending_records::last_error.eq(Some(error)),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(u32::try_from(attempts).unwrap_or(0))
            })
            .await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let id = id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<bool> {
                let removed = diesel::delete(pending_records::table.find(id.as_str()))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(removed > 0)
            })
            .await
    }

    async fn release(&self, id: Uuid) -> Result<bool> {
        let id = id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<bool> {
                let released = diesel::update(
                    pending_records::table
                        .filter(pending_records::id.eq(id.as_str()))
                        .filter(pending_records::is_syncing.ne(0)),
                )
                .set(pending_records::is_syncing.eq(0))
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(released > 0)
            })
            .await
    }

    async fn reset_syncing(&self) -> Result<usize> {
        self.writer
            .exec(|conn: &mut SqliteConnection| -> Result<usize> {
                Ok(diesel::update(
                    pending_records::table.filter(pending_records::is_syncing.ne(0)),
                )
                .set(pending_records::is_syncing.eq(0))
                .execute(conn)
                .map_err(StorageError::from)?)
            })
            .await
    }

    async fn clear(&self) -> Result<usize> {
        self.writer
            .exec(|conn: &mut SqliteConnection| -> Result<usize> {
                Ok(diesel::delete(pending_records::table)
                    .execute(conn)
                    .map_err(StorageError::from)?)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, init, run_migrations, spawn_writer};
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    fn open_at(app_data: &str) -> PendingRecordRepository {
        let db_path = init(app_data).expect("init db");
        run_migrations(&db_path).expect("migrate db");
        let pool = create_pool(&db_path).expect("create pool");
        PendingRecordRepository::new(spawn_writer(pool.as_ref().clone()))
    }

    fn temp_app_data() -> String {
        tempdir()
            .expect("tempdir")
            .keep()
            .to_string_lossy()
            .to_string()
    }

    fn record(name: &str, age_secs: i64) -> PendingRecord {
        let mut record = PendingRecord::new(
            format!("{{\"name\":\"{}\"}}", name).into_bytes(),
            Some(vec![0xFF, 0xD8, 0xFF]),
        );
        record.created_at = Utc::now() - Duration::seconds(age_secs);
        record
    }

    #[tokio::test]
    async fn lists_records_oldest_first() {
        let repo = open_at(&temp_app_data());
        let newer = record("newer", 10);
        let older = record("older", 60);
        repo.insert(newer.clone()).await.unwrap();
        repo.insert(older.clone()).await.unwrap();

        let listed = repo.list_pending().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, older.id);
        assert_eq!(listed[1].id, newer.id);
        assert_eq!(listed[0].attachment_payload, Some(vec![0xFF, 0xD8, 0xFF]));
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn mark_syncing_claims_once() {
        let repo = open_at(&temp_app_data());
        let pending = record("claim", 0);
        repo.insert(pending.clone()).await.unwrap();

        assert!(repo.mark_syncing(pending.id).await.unwrap());
        assert!(!repo.mark_syncing(pending.id).await.unwrap());
        assert!(repo.mark_syncing(Uuid::now_v7()).await.is_err());
    }

    #[tokio::test]
    async fn failure_releases_claim_and_counts_attempts() {
        let repo = open_at(&temp_app_data());
        let pending = record("retry", 0);
        repo.insert(pending.clone()).await.unwrap();

        repo.mark_syncing(pending.id).await.unwrap();
        assert_eq!(
            repo.record_failure(pending.id, "timeout".to_string())
                .await
                .unwrap(),
            1
        );
        repo.mark_syncing(pending.id).await.unwrap();
        assert_eq!(
            repo.record_failure(pending.id, "503".to_string())
                .await
                .unwrap(),
            2
        );

        let listed = repo.list_pending().await.unwrap();
        let stored = &listed[0];
        assert_eq!(stored.sync_attempts, 2);
        assert_eq!(stored.last_error.as_deref(), Some("503"));
        assert!(!stored.is_syncing);
    }

    #[tokio::test]
    async fn interrupted_claims_are_reset_after_restart() {
        let app_data = temp_app_data();
        let pending = record("crash", 0);
        {
            let repo = open_at(&app_data);
            repo.insert(pending.clone()).await.unwrap();
            repo.mark_syncing(pending.id).await.unwrap();
        }

        let reopened = open_at(&app_data);
        assert!(reopened.list_pending().await.unwrap()[0].is_syncing);
        assert_eq!(reopened.reset_syncing().await.unwrap(), 1);
        assert!(reopened.mark_syncing(pending.id).await.unwrap());
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let repo = open_at(&temp_app_data());
        let first = record("a", 2);
        let second = record("b", 1);
        repo.insert(first.clone()).await.unwrap();
        repo.insert(second.clone()).await.unwrap();

        assert!(repo.delete(first.id).await.unwrap());
        assert!(!repo.delete(first.id).await.unwrap());
        assert_eq!(repo.clear().await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn release_hands_back_a_claim_without_counting_an_attempt() {
        let repo = open_at(&temp_app_data());
        let pending = record("release", 0);
        repo.insert(pending.clone()).await.unwrap();

        assert!(!repo.release(pending.id).await.unwrap());
        repo.mark_syncing(pending.id).await.unwrap();
        assert!(repo.release(pending.id).await.unwrap());

        let listed = repo.list_pending().await.unwrap();
        assert!(!listed[0].is_syncing);
        assert_eq!(listed[0].sync_attempts, 0);
        assert!(!repo.release(Uuid::now_v7()).await.unwrap());
    }

    #[tokio::test]
    async fn unreadable_rows_are_purged_on_list() {
        let repo = open_at(&temp_app_data());
        let good = record("good", 0);
        repo.insert(good.clone()).await.unwrap();
        repo.writer
            .exec(|conn: &mut SqliteConnection| -> Result<()> {
                diesel::insert_into(pending_records::table)
                    .values(PendingRecordDB {
                        id: "not-a-uuid".to_string(),
                        request_payload: b"{}".to_vec(),
                        attachment_payload: None,
                        created_at: "2024-01-01T00:00:00.000000Z".to_string(),
                        sync_attempts: 0,
                        last_error: None,
                        is_syncing: 0,
                    })
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(repo.count().await.unwrap(), 2);

        let listed = repo.list_pending().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, good.id);
        assert_eq!(repo.count().await.unwrap(), 1);
    }
}
