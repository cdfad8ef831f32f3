use async_trait::async_trait;
use uuid::Uuid;

use super::pending_model::PendingRecord;
use crate::errors::Result;

/// Durable storage for pending records.
///
/// Every call is serialized by the backend.
#[async_trait]
pub trait PendingRecordRepositoryTrait: Send + Sync {
    async fn insert(&self, record: PendingRecord) -> Result<()>;

    /// All records in creation order. Rows that can no longer be decoded are
    /// deleted and left out.
    async fn list_pending(&self) -> Result<Vec<PendingRecord>>;

    async fn count(&self) -> Result<usize>;

    /// Set `is_syncing` if it is currently false. Returns whether this caller
    /// claimed the record.
    async fn mark_syncing(&self, id: Uuid) -> Result<bool>;

    /// Clear `is_syncing`, bump `sync_attempts`, store `last_error`.
    /// Returns the new attempt count.
    async fn record_failure(&self, id: Uuid, error: String) -> Result<u32>;

    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Clear `is_syncing` on one record without counting an attempt.
    async fn release(&self, id: Uuid) -> Result<bool>;

    /// Clear `is_syncing` on every record. Returns how many were reset.
    async fn reset_syncing(&self) -> Result<usize>;

    async fn clear(&self) -> Result<usize>;
}

/// Performs the real remote create for a queued record.
#[async_trait]
pub trait WritePerformer: Send + Sync {
    async fn perform_create(
        &self,
        request_payload: &[u8],
        attachment_payload: Option<&[u8]>,
    ) -> Result<()>;
}
