//! Non-durable pending record store.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::pending_model::PendingRecord;
use super::queue_traits::PendingRecordRepositoryTrait;
use crate::errors::{DatabaseError, Error, Result};

#[derive(Debug, Default)]
pub struct InMemoryPendingRecordRepository {
    records: Mutex<Vec<PendingRecord>>,
}

impl InMemoryPendingRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<PendingRecord>>> {
        self.records.lock().map_err(|_| {
            Error::Database(DatabaseError::Internal(
                "pending record store lock is poisoned".to_string(),
            ))
        })
    }

    fn not_found(id: Uuid) -> Error {
        Error::Database(DatabaseError::QueryFailed(format!(
            "pending record {} not found",
            id
        )))
    }
}

#[async_trait]
impl PendingRecordRepositoryTrait for InMemoryPendingRecordRepository {
    async fn insert(&self, record: PendingRecord) -> Result<()> {
        let mut records = self.lock()?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(Error::Database(DatabaseError::QueryFailed(format!(
                "pending record {} already exists",
                record.id
            ))));
        }
        records.push(record);
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<PendingRecord>> {
        let mut records = self.lock()?.clone();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    async fn mark_syncing(&self, id: Uuid) -> Result<bool> {
        let mut records = self.lock()?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        if record.is_syncing {
            return Ok(false);
        }
        record.is_syncing = true;
        Ok(true)
    }

    async fn record_failure(&self, id: Uuid, error: String) -> Result<u32> {
        let mut records = self.lock()?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        record.is_syncing = false;
        record.sync_attempts += 1;
        record.last_error = Some(error);
        Ok(record.sync_attempts)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }

    async fn release(&self, id: Uuid) -> Result<bool> {
        let mut records = self.lock()?;
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                let was_syncing = record.is_syncing;
                record.is_syncing = false;
                Ok(was_syncing)
            }
            None => Ok(false),
        }
    }

    async fn reset_syncing(&self) -> Result<usize> {
        let mut records = self.lock()?;
        let mut reset = 0;
        for record in records.iter_mut().filter(|r| r.is_syncing) {
            record.is_syncing = false;
            reset += 1;
        }
        Ok(reset)
    }

    async fn clear(&self) -> Result<usize> {
        let mut records = self.lock()?;
        let removed = records.len();
        records.clear();
        Ok(removed)
    }
}
