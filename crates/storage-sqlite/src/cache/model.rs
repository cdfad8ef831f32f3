use diesel::prelude::*;
use uuid::Uuid;

use cairn_core::cache::{CachedRecord, Category};

use crate::db::{timestamp_from_db, timestamp_to_db};
use crate::errors::StorageError;

#[derive(Queryable, Insertable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::cache_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CacheEntryDB {
    pub record_id: String,
    pub category: String,
    pub payload: Vec<u8>,
    pub cached_at: String,
    pub sort_order: i64,
}

impl From<CachedRecord> for CacheEntryDB {
    fn from(record: CachedRecord) -> Self {
        Self {
            record_id: record.record_id.to_string(),
            category: record.category.as_str().to_string(),
            payload: record.payload,
            cached_at: timestamp_to_db(record.cached_at),
            sort_order: record.sort_order,
        }
    }
}

impl TryFrom<CacheEntryDB> for CachedRecord {
    type Error = StorageError;

    fn try_from(row: CacheEntryDB) -> Result<Self, Self::Error> {
        let record_id = Uuid::parse_str(&row.record_id)
            .map_err(|e| StorageError::Corrupt(format!("bad record id '{}': {}", row.record_id, e)))?;
        let category = row
            .category
            .parse::<Category>()
            .map_err(StorageError::Corrupt)?;
        Ok(CachedRecord {
            record_id,
            category,
            payload: row.payload,
            cached_at: timestamp_from_db(&row.cached_at)?,
            sort_order: row.sort_order,
        })
    }
}
