//! Storage errors and their mapping into the core taxonomy.

use cairn_core::errors::{DatabaseError, Error};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be mapped back to its domain type.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// The writer thread is gone.
    #[error("Writer unavailable: {0}")]
    WriterUnavailable(String),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        let database = match err {
            StorageError::Query(e) => DatabaseError::QueryFailed(e.to_string()),
            StorageError::Connection(e) => DatabaseError::ConnectionFailed(e.to_string()),
            StorageError::Pool(e) => DatabaseError::PoolCreationFailed(e.to_string()),
            StorageError::Migration(message) => DatabaseError::MigrationFailed(message),
            StorageError::Io(e) => DatabaseError::ConnectionFailed(e.to_string()),
            StorageError::Corrupt(message) => DatabaseError::QueryFailed(message),
            StorageError::WriterUnavailable(message) => DatabaseError::Internal(message),
        };
        Error::Database(database)
    }
}
