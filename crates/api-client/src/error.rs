//! Error types for the API client crate.

use thiserror::Error;

/// Result type alias for API client operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Retry policy class for API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Connection, timeout and body-stream failures, as opposed to errors in
/// building the request or decoding the response.
pub(crate) fn is_transport_error(err: &reqwest::Error) -> bool {
    !(err.is_builder() || err.is_redirect() || err.is_status() || err.is_decode())
}

/// Errors that can occur while talking to the API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// reqwest failure not already mapped to `NetworkUnreachable`
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-2xx response from the API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Session missing, or rejected even after a refresh
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The server could not be reached (offline, DNS, timeout)
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Token persistence failed
    #[error("Secret store error: {0}")]
    Secret(String),
}

impl ApiError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkUnreachable(message.into())
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> ApiRetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                401 | 403 => ApiRetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => ApiRetryClass::Retryable,
                500..=599 => ApiRetryClass::Retryable,
                _ => ApiRetryClass::Permanent,
            },
            Self::Http(e) if is_transport_error(e) => ApiRetryClass::Retryable,
            Self::Http(_) => ApiRetryClass::Permanent,
            Self::NetworkUnreachable(_) => ApiRetryClass::Retryable,
            Self::Json(_) => ApiRetryClass::Permanent,
            Self::InvalidRequest(_) => ApiRetryClass::Permanent,
            Self::Secret(_) => ApiRetryClass::Permanent,
            Self::Unauthorized(_) => ApiRetryClass::ReauthRequired,
        }
    }
}

impl From<cairn_core::Error> for ApiError {
    fn from(err: cairn_core::Error) -> Self {
        match err {
            cairn_core::Error::Secret(message) => Self::Secret(message),
            cairn_core::Error::Serialization(e) => Self::Json(e),
            other => Self::InvalidRequest(other.to_string()),
        }
    }
}

impl From<ApiError> for cairn_core::Error {
    fn from(err: ApiError) -> Self {
        let retry_class = err.retry_class();
        match err {
            ApiError::Unauthorized(message) => cairn_core::Error::Unauthorized(message),
            ApiError::NetworkUnreachable(message) => cairn_core::Error::NetworkUnreachable(message),
            // Only transport failures may send a write to the offline queue.
            ApiError::Http(e) if retry_class == ApiRetryClass::Retryable => {
                cairn_core::Error::NetworkUnreachable(e.to_string())
            }
            ApiError::Http(e) => cairn_core::Error::InvalidInput(e.to_string()),
            ApiError::Json(e) => cairn_core::Error::Serialization(e),
            ApiError::Api { status, message } => cairn_core::Error::Remote { status, message },
            ApiError::InvalidRequest(message) => cairn_core::Error::InvalidInput(message),
            ApiError::Secret(message) => cairn_core::Error::Secret(message),
        }
    }
}
