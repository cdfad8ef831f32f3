//! Runtime configuration for the sync core.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

use crate::sync::{DEFAULT_MAX_RETRY_ATTEMPTS, FEED_REFRESH_INTERVAL_SECS};

/// Default timeout for API requests.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default API base URL when `CAIRN_API_URL` is unset.
pub const DEFAULT_API_URL: &str = "https://api.cairn.app";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub request_timeout: Duration,
    /// Failed sync attempts after which a pending record is abandoned.
    pub max_retry_attempts: u32,
    /// Minimum age of the feeds before a throttled refresh hits the network.
    pub refresh_interval: Duration,
    /// Directory holding the SQLite database.
    pub data_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            refresh_interval: Duration::from_secs(FEED_REFRESH_INTERVAL_SECS),
            data_dir: None,
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> T {
    match env_value(key) {
        Some(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            warn!("[Config] Ignoring unparsable {}='{}'", key, raw);
            default
        }),
        None => default,
    }
}

impl SyncConfig {
    /// Build a config from `CAIRN_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base_url: env_value("CAIRN_API_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base_url),
            request_timeout: Duration::from_secs(env_parsed(
                "CAIRN_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            max_retry_attempts: env_parsed("CAIRN_MAX_RETRY_ATTEMPTS", DEFAULT_MAX_RETRY_ATTEMPTS),
            refresh_interval: Duration::from_secs(env_parsed(
                "CAIRN_REFRESH_INTERVAL_SECS",
                FEED_REFRESH_INTERVAL_SECS,
            )),
            data_dir: env_value("CAIRN_DATA_DIR").map(PathBuf::from),
        }
    }
}
