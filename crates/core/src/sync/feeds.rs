//! In-memory feeds plus their write-through to the cache.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{debug, warn};
use tokio::sync::watch;
use uuid::Uuid;

use super::sync_model::FeedSnapshot;
use crate::cache::{CacheStore, Category};
use crate::stones::{DomainRecord, Stone};

/// Categories persisted by writing the whole in-memory feed.
const FULL_FEEDS: [Category; 2] = [Category::Own, Category::Public];

/// Holds the feeds the UI renders and keeps the cache in step with them.
///
/// Writes are applied to memory first, then the affected categories are
/// persisted. A feed is hydrated from the cache before its first local
/// mutation so persisting it never prunes entries that were only on disk.
///
/// `reset` starts a new generation. A create that began under an older
/// generation is discarded instead of reviving a cleared feed.
pub struct StoneFeeds {
    cache: Arc<CacheStore>,
    state: watch::Sender<FeedSnapshot>,
    hydrated: Mutex<HashSet<Category>>,
    generation: AtomicU64,
    persist_lock: tokio::sync::Mutex<()>,
}

impl StoneFeeds {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        let (state, _) = watch::channel(FeedSnapshot::default());
        Self {
            cache,
            state,
            hydrated: Mutex::new(HashSet::new()),
            generation: AtomicU64::new(0),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.state.subscribe()
    }

    fn is_hydrated(&self, category: Category) -> bool {
        match self.hydrated.lock() {
            Ok(set) => set.contains(&category),
            Err(poisoned) => poisoned.into_inner().contains(&category),
        }
    }

    fn mark_hydrated(&self, category: Category) {
        match self.hydrated.lock() {
            Ok(mut set) => set.insert(category),
            Err(poisoned) => poisoned.into_inner().insert(category),
        };
    }

    /// Replace a feed with authoritative records.
    pub fn set_feed(&self, category: Category, records: Vec<Stone>) {
        self.state.send_modify(|snapshot| {
            *snapshot.feed_mut(category) = records;
        });
        self.mark_hydrated(category);
    }

    /// Put fresh nearby results first and keep earlier coverage behind them.
    pub fn merge_nearby(&self, records: &[Stone]) {
        self.state.send_modify(|snapshot| {
            let incoming: HashSet<Uuid> = records.iter().map(Stone::record_id).collect();
            let mut merged = records.to_vec();
            merged.extend(
                snapshot
                    .nearby
                    .drain(..)
                    .filter(|stone| !incoming.contains(&stone.id)),
            );
            snapshot.nearby = merged;
        });
        self.mark_hydrated(Category::Nearby);
    }

    pub fn mark_refreshed(&self) {
        self.state.send_modify(|snapshot| {
            snapshot.last_refreshed_at = Some(Utc::now());
        });
    }

    /// Load a feed from the cache unless it is already in memory.
    pub async fn hydrate(&self, category: Category) {
        if self.is_hydrated(category) {
            return;
        }
        let records = match self.cache.fetch::<Stone>(category).await {
            Ok(records) => records,
            Err(e) => {
                warn!("[Sync] Could not hydrate {} feed from cache: {}", category, e);
                Vec::new()
            }
        };
        if self.is_hydrated(category) {
            return;
        }
        debug!("[Sync] Hydrated {} feed with {} cached record(s)", category, records.len());
        self.set_feed(category, records);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Insert a newly created stone at the front of its feeds, unless the
    /// feeds were reset after `generation` was read. Returns whether it was
    /// applied.
    pub async fn apply_created(&self, stone: &Stone, generation: u64) -> bool {
        let _persist = self.persist_lock.lock().await;
        if self.generation() != generation {
            debug!("[Sync] Discarding stone {} created before a reset", stone.id);
            return false;
        }

        let mut touched = vec![Category::Own];
        if stone.is_public {
            touched.push(Category::Public);
        }
        for category in &touched {
            self.hydrate(*category).await;
        }

        self.state.send_modify(|snapshot| {
            for category in &touched {
                let feed = snapshot.feed_mut(*category);
                feed.retain(|existing| existing.id != stone.id);
                feed.insert(0, stone.clone());
            }
        });
        self.write_feeds(&touched).await;
        true
    }

    /// Replace in place. A changed public flag moves the record in or out of
    /// the public feed.
    pub async fn apply_updated(&self, stone: &Stone) {
        for category in FULL_FEEDS {
            self.hydrate(category).await;
        }

        let mut in_nearby = false;
        self.state.send_modify(|snapshot| {
            replace_in_place(&mut snapshot.own, stone);

            if stone.is_public {
                if !replace_in_place(&mut snapshot.public, stone) {
                    snapshot.public.insert(0, stone.clone());
                }
            } else {
                snapshot.public.retain(|existing| existing.id != stone.id);
            }

            in_nearby = replace_in_place(&mut snapshot.nearby, stone);
        });

        self.persist(&FULL_FEEDS).await;
        if in_nearby {
            if let Err(e) = self
                .cache
                .upsert(std::slice::from_ref(stone), Category::Nearby)
                .await
            {
                warn!("[Sync] Failed to persist nearby update for {}: {}", stone.id, e);
            }
        }
    }

    pub async fn apply_deleted(&self, id: Uuid) {
        for category in FULL_FEEDS {
            self.hydrate(category).await;
        }

        self.state.send_modify(|snapshot| {
            for category in Category::ALL {
                snapshot.feed_mut(category).retain(|existing| existing.id != id);
            }
        });

        self.persist(&FULL_FEEDS).await;
        // Nearby never prunes on upsert, so evict explicitly.
        if let Err(e) = self.cache.remove(Category::Nearby, vec![id]).await {
            warn!("[Sync] Failed to evict {} from nearby cache: {}", id, e);
        }
    }

    /// Write the in-memory feeds of `categories` to the cache in one batch.
    async fn persist(&self, categories: &[Category]) {
        let _persist = self.persist_lock.lock().await;
        self.write_feeds(categories).await;
    }

    async fn write_feeds(&self, categories: &[Category]) {
        let snapshot = self.snapshot();
        let entries: Vec<(Vec<Stone>, Category)> = categories
            .iter()
            .filter(|category| FULL_FEEDS.contains(category))
            .map(|category| (snapshot.feed(*category).to_vec(), *category))
            .collect();
        if entries.is_empty() {
            return;
        }
        if let Err(e) = self.cache.upsert_batch(entries).await {
            warn!("[Sync] Failed to persist feeds {:?}: {}", categories, e);
        }
    }

    /// Forget every feed and start a new generation. The cache is not touched.
    pub async fn reset(&self) {
        let _persist = self.persist_lock.lock().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.state.send_replace(FeedSnapshot::default());
        match self.hydrated.lock() {
            Ok(mut set) => set.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

fn replace_in_place(feed: &mut [Stone], stone: &Stone) -> bool {
    match feed.iter_mut().find(|existing| existing.id == stone.id) {
        Some(slot) => {
            *slot = stone.clone();
            true
        }
        None => false,
    }
}
