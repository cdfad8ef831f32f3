use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use super::feeds::StoneFeeds;
use super::remote_traits::StoneRemoteTrait;
use super::scheduler::refresh_due;
use super::sync_model::{
    CreateOutcome, FeedQuery, FeedRead, FeedSnapshot, ReadSource, RefreshOutcome, SyncTrigger,
};
use crate::cache::{CacheStore, Category};
use crate::connectivity::ConnectivityMonitor;
use crate::errors::{DatabaseError, Error, Result};
use crate::offline::OfflineQueue;
use crate::stones::{NewStone, Stone};

/// Read/write façade over the remote, the cache and the offline queue.
///
/// Reads go to the network when online and fall back to the cache on any
/// failure other than a dead session. Writes go to the network first and are
/// folded into the feeds incrementally; a create that cannot reach the
/// network is handed to the offline queue instead.
pub struct SyncOrchestrator {
    remote: Arc<dyn StoneRemoteTrait>,
    feeds: Arc<StoneFeeds>,
    queue: Arc<OfflineQueue>,
    connectivity: Arc<ConnectivityMonitor>,
    refresh_interval: Duration,
    last_refresh: Mutex<Option<Instant>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(
        remote: Arc<dyn StoneRemoteTrait>,
        feeds: Arc<StoneFeeds>,
        queue: Arc<OfflineQueue>,
        connectivity: Arc<ConnectivityMonitor>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            remote,
            feeds,
            queue,
            connectivity,
            refresh_interval,
            last_refresh: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn cache(&self) -> &CacheStore {
        self.feeds.cache()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.feeds.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.feeds.subscribe()
    }

    pub async fn pending_count(&self) -> usize {
        self.queue.count().await
    }

    fn last_refresh(&self) -> Option<Instant> {
        match self.last_refresh.lock() {
            Ok(slot) => *slot,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_last_refresh(&self, value: Option<Instant>) {
        match self.last_refresh.lock() {
            Ok(mut slot) => *slot = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    async fn fetch_remote(&self, query: FeedQuery) -> Result<Vec<Stone>> {
        match query {
            FeedQuery::Own => self.remote.fetch_own().await,
            FeedQuery::Public => self.remote.fetch_public().await,
            FeedQuery::Nearby(region) => self.remote.fetch_nearby(region).await,
        }
    }

    /// Cached records for a category, or `None` when there are none.
    /// Cache failures count as a miss.
    async fn read_cached(&self, category: Category) -> Option<Vec<Stone>> {
        match self.cache().fetch::<Stone>(category).await {
            Ok(records) if !records.is_empty() => {
                self.feeds.set_feed(category, records.clone());
                Some(records)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("[Sync] Cache read for {} failed: {}", category, e);
                None
            }
        }
    }

    /// Read one feed.
    ///
    /// Offline: the cache, or `NoOfflineData` if it is empty. Online: the
    /// network (written to the cache when `should_cache`), falling back to
    /// the cache when the call fails.
    pub async fn fetch_category(&self, query: FeedQuery, should_cache: bool) -> Result<FeedRead> {
        let category = query.category();

        if !self.connectivity.is_connected() {
            debug!("[Sync] Offline read of {} feed", category);
            return match self.read_cached(category).await {
                Some(records) => Ok(FeedRead {
                    records,
                    source: ReadSource::Cache,
                }),
                None => Err(Error::NoOfflineData(category)),
            };
        }

        match self.fetch_remote(query).await {
            Ok(records) => {
                if should_cache {
                    if let Err(e) = self.cache().upsert(&records, category).await {
                        warn!("[Sync] Failed to cache {} feed: {}", category, e);
                    }
                }
                if category == Category::Nearby {
                    self.feeds.merge_nearby(&records);
                } else {
                    self.feeds.set_feed(category, records.clone());
                }
                debug!("[Sync] Loaded {} {} record(s) from network", records.len(), category);
                Ok(FeedRead {
                    records,
                    source: ReadSource::Network,
                })
            }
            Err(e) if e.is_unauthorized() => {
                self.end_session().await;
                Err(e)
            }
            Err(e) => {
                warn!("[Sync] {} fetch failed, trying cache: {}", category, e);
                match self.read_cached(category).await {
                    Some(records) => Ok(FeedRead {
                        records,
                        source: ReadSource::Cache,
                    }),
                    None => Err(e),
                }
            }
        }
    }

    /// Refresh the own and public feeds together.
    ///
    /// `Startup`, `Foreground` and `Periodic` triggers are throttled to one
    /// network refresh per refresh interval.
    pub async fn refresh_feeds(&self, trigger: SyncTrigger) -> Result<RefreshOutcome> {
        let _refresh = self.refresh_lock.lock().await;

        if !trigger.bypasses_throttle()
            && !refresh_due(self.last_refresh(), Instant::now(), self.refresh_interval)
        {
            debug!("[Sync] Refresh ({:?}) throttled", trigger);
            return Ok(RefreshOutcome::Throttled);
        }

        if !self.connectivity.is_connected() {
            debug!("[Sync] Refresh ({:?}) while offline; loading cache", trigger);
            return self.refresh_from_cache(Error::NoOfflineData(Category::Own)).await;
        }

        let (own, public) = tokio::join!(self.remote.fetch_own(), self.remote.fetch_public());
        let (own, public) = match (own, public) {
            (Ok(own), Ok(public)) => (own, public),
            (Err(e), _) | (_, Err(e)) => {
                if e.is_unauthorized() {
                    self.end_session().await;
                    return Err(e);
                }
                warn!("[Sync] Refresh ({:?}) failed, trying cache: {}", trigger, e);
                return self.refresh_from_cache(e).await;
            }
        };

        if let Err(e) = self
            .cache()
            .upsert_batch(vec![
                (own.clone(), Category::Own),
                (public.clone(), Category::Public),
            ])
            .await
        {
            warn!("[Sync] Failed to cache refreshed feeds: {}", e);
        }
        info!(
            "[Sync] Refreshed feeds ({:?}) own={} public={}",
            trigger,
            own.len(),
            public.len()
        );
        self.feeds.set_feed(Category::Own, own);
        self.feeds.set_feed(Category::Public, public);
        self.feeds.mark_refreshed();
        self.set_last_refresh(Some(Instant::now()));
        Ok(RefreshOutcome::Refreshed)
    }

    async fn refresh_from_cache(&self, cause: Error) -> Result<RefreshOutcome> {
        self.feeds.hydrate(Category::Own).await;
        self.feeds.hydrate(Category::Public).await;
        let snapshot = self.feeds.snapshot();
        if snapshot.own.is_empty() && snapshot.public.is_empty() {
            Err(cause)
        } else {
            Ok(RefreshOutcome::FromCache)
        }
    }

    /// Create a stone. Queued for later when the network is out of reach.
    pub async fn create(&self, stone: NewStone, image: Option<Vec<u8>>) -> Result<CreateOutcome> {
        if !self.connectivity.is_connected() {
            return self.queue_create(&stone, image).await;
        }

        let generation = self.feeds.generation();
        match self.remote.create(stone.clone(), image.clone()).await {
            Ok(created) => {
                info!("[Sync] Created stone {}", created.id);
                self.feeds.apply_created(&created, generation).await;
                Ok(CreateOutcome::Created(created))
            }
            Err(e) if e.is_network_unreachable() => {
                warn!("[Sync] Create could not reach the server, queueing: {}", e);
                self.queue_create(&stone, image).await
            }
            Err(e) if e.is_unauthorized() => {
                self.end_session().await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn queue_create(&self, stone: &NewStone, image: Option<Vec<u8>>) -> Result<CreateOutcome> {
        let payload = serde_json::to_vec(stone)?;
        if self.queue.enqueue(payload, image).await {
            Ok(CreateOutcome::Queued)
        } else {
            Err(Error::Database(DatabaseError::QueryFailed(
                "could not save the stone for later sync".to_string(),
            )))
        }
    }

    pub async fn update(&self, stone: Stone) -> Result<Stone> {
        self.ensure_online()?;
        match self.remote.update(stone).await {
            Ok(updated) => {
                self.feeds.apply_updated(&updated).await;
                Ok(updated)
            }
            Err(e) => Err(self.on_write_error(e).await),
        }
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.ensure_online()?;
        match self.remote.delete(id).await {
            Ok(()) => {
                self.feeds.apply_deleted(id).await;
                Ok(())
            }
            Err(e) => Err(self.on_write_error(e).await),
        }
    }

    fn ensure_online(&self) -> Result<()> {
        if self.connectivity.is_connected() {
            Ok(())
        } else {
            Err(Error::network("device is offline"))
        }
    }

    async fn on_write_error(&self, err: Error) -> Error {
        if err.is_unauthorized() {
            self.end_session().await;
        }
        err
    }

    /// Drop feeds, cache and pending writes. The session itself is owned by
    /// the HTTP layer.
    pub async fn logout(&self) {
        info!("[Sync] Logging out; discarding local data");
        self.clear_local_data().await;
    }

    async fn end_session(&self) {
        warn!("[Sync] Session is no longer valid; discarding local data");
        self.clear_local_data().await;
    }

    async fn clear_local_data(&self) {
        self.feeds.reset().await;
        self.set_last_refresh(None);
        if let Err(e) = self.cache().clear_all().await {
            warn!("[Sync] Failed to clear cache: {}", e);
        }
        self.queue.clear().await;
    }
}
