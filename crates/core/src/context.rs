//! Startup wiring. One [`SyncContext`] per signed-in app instance.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::cache::{CacheRepositoryTrait, CacheStore};
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::errors::Result;
use crate::offline::{OfflineQueue, PendingRecordRepositoryTrait};
use crate::sync::{
    periodic_delay, CreateReplayer, SessionTrait, StoneFeeds, StoneRemoteTrait, SyncOrchestrator,
    SyncTrigger,
};

#[derive(Debug, Default)]
struct BackgroundTasks {
    reconnect_listener: Option<JoinHandle<()>>,
    periodic_refresh: Option<JoinHandle<()>>,
}

pub struct SyncContext {
    pub config: SyncConfig,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub cache: Arc<CacheStore>,
    pub queue: Arc<OfflineQueue>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub session: Arc<dyn SessionTrait>,
    tasks: Mutex<BackgroundTasks>,
}

impl SyncContext {
    pub fn new(
        config: SyncConfig,
        remote: Arc<dyn StoneRemoteTrait>,
        session: Arc<dyn SessionTrait>,
        cache_repository: Arc<dyn CacheRepositoryTrait>,
        pending_repository: Arc<dyn PendingRecordRepositoryTrait>,
    ) -> Self {
        let connectivity = Arc::new(ConnectivityMonitor::new());
        let cache = Arc::new(CacheStore::new(cache_repository));
        let feeds = Arc::new(StoneFeeds::new(Arc::clone(&cache)));
        let replayer = Arc::new(CreateReplayer::new(Arc::clone(&remote), Arc::clone(&feeds)));
        let queue = Arc::new(OfflineQueue::new(
            pending_repository,
            replayer,
            Arc::clone(&connectivity),
            config.max_retry_attempts,
        ));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            remote,
            feeds,
            Arc::clone(&queue),
            Arc::clone(&connectivity),
            config.refresh_interval,
        ));

        Self {
            config,
            connectivity,
            cache,
            queue,
            orchestrator,
            session,
            tasks: Mutex::new(BackgroundTasks::default()),
        }
    }

    pub fn connectivity(&self) -> Arc<ConnectivityMonitor> {
        Arc::clone(&self.connectivity)
    }

    pub fn cache(&self) -> Arc<CacheStore> {
        Arc::clone(&self.cache)
    }

    pub fn queue(&self) -> Arc<OfflineQueue> {
        Arc::clone(&self.queue)
    }

    pub fn orchestrator(&self) -> Arc<SyncOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    /// Recover interrupted writes, start listening for reconnects and run
    /// the startup refresh. Safe to call more than once.
    pub async fn start(&self) {
        let recovered = self.queue.recover_interrupted().await;
        if recovered > 0 {
            info!("[Sync] Startup recovered {} interrupted write(s)", recovered);
        }

        {
            let mut tasks = self.tasks.lock().await;
            let running = tasks
                .reconnect_listener
                .as_ref()
                .is_some_and(|handle| !handle.is_finished());
            if !running {
                tasks.reconnect_listener = Some(self.queue.spawn_reconnect_listener());
            }
        }

        if self.session.is_authenticated() {
            if let Err(e) = self.orchestrator.refresh_feeds(SyncTrigger::Startup).await {
                warn!("[Sync] Startup refresh failed: {}", e);
            }
            self.queue.drain().await;
        }
    }

    /// Refresh the feeds every `config.refresh_interval` (plus jitter) until
    /// stopped or signed out.
    pub async fn start_periodic_refresh(&self) {
        let mut tasks = self.tasks.lock().await;
        if let Some(handle) = tasks.periodic_refresh.as_ref() {
            if !handle.is_finished() {
                return;
            }
            tasks.periodic_refresh.take();
        }

        let orchestrator = Arc::downgrade(&self.orchestrator);
        let interval = self.config.refresh_interval;
        let handle = tokio::spawn(async move {
            loop {
                let seed = Utc::now().timestamp_millis().unsigned_abs();
                tokio::time::sleep(periodic_delay(interval, seed)).await;
                let Some(orchestrator) = orchestrator.upgrade() else {
                    break;
                };
                match orchestrator.refresh_feeds(SyncTrigger::Periodic).await {
                    Ok(outcome) => debug!("[Sync] Periodic refresh: {:?}", outcome),
                    Err(e) if e.is_unauthorized() => {
                        info!("[Sync] Session ended. Stopping periodic refresh.");
                        break;
                    }
                    Err(e) => warn!("[Sync] Periodic refresh failed: {}", e),
                }
            }
        });
        tasks.periodic_refresh = Some(handle);
    }

    pub async fn stop_background_tasks(&self) {
        let mut tasks = self.tasks.lock().await;
        if let Some(handle) = tasks.periodic_refresh.take() {
            handle.abort();
        }
        if let Some(handle) = tasks.reconnect_listener.take() {
            handle.abort();
        }
    }

    /// App returned to the foreground.
    pub async fn on_foreground(&self) -> Result<()> {
        self.orchestrator
            .refresh_feeds(SyncTrigger::Foreground)
            .await
            .map(|_| ())
    }

    /// End the session and discard everything stored for it.
    pub async fn sign_out(&self) -> Result<()> {
        if let Some(handle) = self.tasks.lock().await.periodic_refresh.take() {
            handle.abort();
        }
        self.orchestrator.logout().await;
        self.session.clear_session().await
    }

    /// Wait for a drain pass to finish. Used by hosts that need a flush
    /// point, e.g. before suspending.
    pub async fn flush_pending(&self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut status = self.queue.subscribe();
        self.queue.drain().await;
        loop {
            status.borrow_and_update();
            if !self.queue.is_draining() {
                break;
            }
            if tokio::time::timeout_at(deadline, status.changed()).await.is_err() {
                break;
            }
        }
        self.queue.count().await
    }
}
