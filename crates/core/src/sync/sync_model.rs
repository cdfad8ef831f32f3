use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::Category;
use crate::stones::{Region, Stone};

/// Trigger source for feed refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Startup,
    Foreground,
    Periodic,
    Manual,
    LocalMutation,
}

impl SyncTrigger {
    /// User-initiated and post-write refreshes skip the refresh interval.
    pub fn bypasses_throttle(self) -> bool {
        matches!(self, SyncTrigger::Manual | SyncTrigger::LocalMutation)
    }
}

/// One feed read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeedQuery {
    Own,
    Public,
    Nearby(Region),
}

impl FeedQuery {
    pub fn category(&self) -> Category {
        match self {
            FeedQuery::Own => Category::Own,
            FeedQuery::Public => Category::Public,
            FeedQuery::Nearby(_) => Category::Nearby,
        }
    }
}

/// Where a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadSource {
    Network,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRead {
    pub records: Vec<Stone>,
    pub source: ReadSource,
}

/// Result of a create through the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "stone")]
pub enum CreateOutcome {
    Created(Stone),
    /// Saved locally; synced by the offline queue later.
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    Refreshed,
    Throttled,
    /// Network unavailable; feeds were loaded from the cache.
    FromCache,
}

/// In-memory feeds observed by the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub own: Vec<Stone>,
    pub public: Vec<Stone>,
    pub nearby: Vec<Stone>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl FeedSnapshot {
    pub fn feed(&self, category: Category) -> &[Stone] {
        match category {
            Category::Own => &self.own,
            Category::Public => &self.public,
            Category::Nearby => &self.nearby,
        }
    }

    pub fn feed_mut(&mut self, category: Category) -> &mut Vec<Stone> {
        match category {
            Category::Own => &mut self.own,
            Category::Public => &mut self.public,
            Category::Nearby => &mut self.nearby,
        }
    }
}
