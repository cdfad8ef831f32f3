use diesel::prelude::*;
use uuid::Uuid;

use cairn_core::offline::PendingRecord;

use crate::db::{timestamp_from_db, timestamp_to_db};
use crate::errors::StorageError;

#[derive(Queryable, Insertable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::pending_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PendingRecordDB {
    pub id: String,
    pub request_payload: Vec<u8>,
    pub attachment_payload: Option<Vec<u8>>,
    pub created_at: String,
    pub sync_attempts: i32,
    pub last_error: Option<String>,
    pub is_syncing: i32,
}

impl From<PendingRecord> for PendingRecordDB {
    fn from(record: PendingRecord) -> Self {
        Self {
            id: record.id.to_string(),
            request_payload: record.request_payload,
            attachment_payload: record.attachment_payload,
            created_at: timestamp_to_db(record.created_at),
            sync_attempts: i32::try_from(record.sync_attempts).unwrap_or(i32::MAX),
            last_error: record.last_error,
            is_syncing: i32::from(record.is_syncing),
        }
    }
}

impl TryFrom<PendingRecordDB> for PendingRecord {
    type Error = StorageError;

    fn try_from(row: PendingRecordDB) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| StorageError::Corrupt(format!("bad pending id '{}': {}", row.id, e)))?;
        Ok(PendingRecord {
            id,
            request_payload: row.request_payload,
            attachment_payload: row.attachment_payload,
            created_at: timestamp_from_db(&row.created_at)?,
            sync_attempts: u32::try_from(row.sync_attempts).unwrap_or(0),
            last_error: row.last_error,
            is_syncing: row.is_syncing != 0,
        })
    }
}
