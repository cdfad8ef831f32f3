//! Error taxonomy shared by every cairn crate.

use thiserror::Error;

use crate::cache::Category;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the sync core.
#[derive(Debug, Error)]
pub enum Error {
    /// Local cache failure
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Durable storage failure outside the cache (offline queue, migrations)
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// The device could not reach the API (offline, DNS, timeout)
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The session is invalid and could not be refreshed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Non-2xx response from the API that is not an auth failure
    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// Offline read with nothing cached for the category
    #[error("No data available offline for category '{0}'")]
    NoOfflineData(Category),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Secure storage failure
    #[error("Secret store error: {0}")]
    Secret(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkUnreachable(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// True when the failure means "no connectivity" and a local fallback applies.
    pub fn is_network_unreachable(&self) -> bool {
        matches!(self, Self::NetworkUnreachable(_))
    }

    /// True when the session is gone and the user must sign in again.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// Cache-layer failures. Callers degrade to "cache is empty" on these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The cache was used before its persistence backend was attached
    #[error("cache used before a persistence backend was configured")]
    NotConfigured,

    #[error("failed to read from cache: {0}")]
    FetchFailed(String),

    #[error("failed to write to cache: {0}")]
    SaveFailed(String),
}

/// Storage-layer failures reported by persistence backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("Failed to create connection pool: {0}")]
    PoolCreationFailed(String),

    #[error("Failed to run migrations: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_error_converts_into_core_error() {
        let err: Error = CacheError::SaveFailed("disk full".to_string()).into();
        assert!(matches!(err, Error::Cache(CacheError::SaveFailed(_))));
        assert_eq!(err.to_string(), "Cache error: failed to write to cache: disk full");
    }

    #[test]
    fn no_offline_data_names_category() {
        let err = Error::NoOfflineData(Category::Nearby);
        assert_eq!(
            err.to_string(),
            "No data available offline for category 'nearby'"
        );
    }
}
