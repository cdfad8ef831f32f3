use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A write intent captured while offline.
///
/// Lifecycle: created -> syncing -> removed on success, back to idle with
/// `sync_attempts + 1` on failure, removed as abandoned once attempts reach
/// the configured maximum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRecord {
    pub id: Uuid,
    /// Serialized create request.
    pub request_payload: Vec<u8>,
    pub attachment_payload: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub sync_attempts: u32,
    pub last_error: Option<String>,
    pub is_syncing: bool,
}

impl PendingRecord {
    pub fn new(request_payload: Vec<u8>, attachment_payload: Option<Vec<u8>>) -> Self {
        Self {
            id: Uuid::now_v7(),
            request_payload,
            attachment_payload,
            created_at: Utc::now(),
            sync_attempts: 0,
            last_error: None,
            is_syncing: false,
        }
    }

    pub fn is_exhausted(&self, max_retry_attempts: u32) -> bool {
        self.sync_attempts >= max_retry_attempts
    }
}

/// Observable queue state for UI badges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub pending: usize,
    pub is_draining: bool,
    /// Records dropped after exhausting their retries since startup.
    pub abandoned: usize,
    pub last_error: Option<String>,
}

/// Why a drain call did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainSkip {
    Offline,
    AlreadyDraining,
    Empty,
}

/// Outcome of one pass over the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub synced: usize,
    pub failed: usize,
    pub abandoned: usize,
    /// Records left alone because another pass had them in flight.
    pub in_flight: usize,
    pub skipped: Option<DrainSkip>,
    pub last_error: Option<String>,
}

impl DrainReport {
    pub fn skipped(reason: DrainSkip) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}
