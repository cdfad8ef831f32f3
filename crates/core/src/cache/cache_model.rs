use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named partition of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Own,
    Public,
    Nearby,
}

/// What happens to entries missing from a fresh full fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Entries absent from the latest batch are deleted.
    Replace,
    /// Entries are only inserted or updated, never pruned by a refresh.
    Accumulate,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Own, Category::Public, Category::Nearby];

    /// Fixed for the lifetime of the system.
    pub fn policy(self) -> RetentionPolicy {
        match self {
            Category::Own | Category::Public => RetentionPolicy::Replace,
            Category::Nearby => RetentionPolicy::Accumulate,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Own => "own",
            Category::Public => "public",
            Category::Nearby => "nearby",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "own" => Ok(Category::Own),
            "public" => Ok(Category::Public),
            "nearby" => Ok(Category::Nearby),
            other => Err(format!("Unknown cache category '{}'", other)),
        }
    }
}

/// One cache row. Identity is `(record_id, category)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRecord {
    pub record_id: Uuid,
    pub category: Category,
    /// Serialized domain record.
    pub payload: Vec<u8>,
    pub cached_at: DateTime<Utc>,
    /// Position within the batch that last wrote this row; keeps server
    /// ordering stable among rows sharing a `cached_at`.
    pub sort_order: i64,
}

/// Serialized record headed for the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntryDraft {
    pub record_id: Uuid,
    pub payload: Vec<u8>,
}

/// All incoming records for one category in an upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryBatch {
    pub category: Category,
    pub entries: Vec<CacheEntryDraft>,
}

/// Aggregate result of an upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl std::ops::AddAssign for UpsertCounts {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
    }
}

/// Row-level writes that bring one category in line with a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryChangeSet {
    pub inserts: Vec<CachedRecord>,
    pub updates: Vec<CachedRecord>,
    pub deletes: Vec<Uuid>,
}

impl CategoryChangeSet {
    pub fn counts(&self) -> UpsertCounts {
        UpsertCounts {
            inserted: self.inserts.len(),
            updated: self.updates.len(),
            deleted: self.deletes.len(),
        }
    }
}

/// Plan the upsert of `batch` against the ids already cached for its category.
///
/// Every incoming record becomes an update (id already cached) or an insert.
/// A record repeated inside the batch keeps its first position and its last
/// payload. For `Replace` categories every cached id not present in the batch
/// is scheduled for deletion; `Accumulate` categories never delete.
pub fn plan_category_upsert(
    existing_ids: &[Uuid],
    batch: &CategoryBatch,
    now: DateTime<Utc>,
) -> CategoryChangeSet {
    let existing: HashSet<Uuid> = existing_ids.iter().copied().collect();
    let mut changes = CategoryChangeSet::default();
    // id -> (is_update, index into inserts/updates)
    let mut planned: HashMap<Uuid, (bool, usize)> = HashMap::with_capacity(batch.entries.len());

    for entry in &batch.entries {
        if let Some(&(is_update, idx)) = planned.get(&entry.record_id) {
            let row = if is_update {
                &mut changes.updates[idx]
            } else {
                &mut changes.inserts[idx]
            };
            row.payload = entry.payload.clone();
            continue;
        }

        let row = CachedRecord {
            record_id: entry.record_id,
            category: batch.category,
            payload: entry.payload.clone(),
            cached_at: now,
            sort_order: planned.len() as i64,
        };
        if existing.contains(&entry.record_id) {
            planned.insert(entry.record_id, (true, changes.updates.len()));
            changes.updates.push(row);
        } else {
            planned.insert(entry.record_id, (false, changes.inserts.len()));
            changes.inserts.push(row);
        }
    }

    if batch.category.policy() == RetentionPolicy::Replace {
        changes.deletes = existing_ids
            .iter()
            .filter(|id| !planned.contains_key(id))
            .copied()
            .collect();
    }

    changes
}

/// Newest first; server order within a batch.
pub fn sort_for_display(rows: &mut [CachedRecord]) {
    rows.sort_by(|a, b| {
        b.cached_at
            .cmp(&a.cached_at)
            .then_with(|| a.sort_order.cmp(&b.sort_order))
    });
}
