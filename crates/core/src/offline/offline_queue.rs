use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, error, info, warn};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::pending_model::{DrainReport, DrainSkip, PendingRecord, QueueStatus};
use super::queue_traits::{PendingRecordRepositoryTrait, WritePerformer};
use crate::connectivity::ConnectivityMonitor;
use crate::errors::Result;

/// Resets the draining flag when a pass ends, including on early return.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Durable, ordered queue of creates made while offline.
///
/// `enqueue` persists and returns immediately; syncing happens on a spawned
/// task. A drain pass visits records in creation order, never touches a
/// record already marked syncing, and drops a record once its failed
/// attempts reach `max_retry_attempts`. A failed record is only retried by a
/// later pass (next reconnect or next enqueue); it never stops the pass from
/// reaching the records after it.
pub struct OfflineQueue {
    repository: Arc<dyn PendingRecordRepositoryTrait>,
    performer: Arc<dyn WritePerformer>,
    connectivity: Arc<ConnectivityMonitor>,
    max_retry_attempts: u32,
    draining: AtomicBool,
    abandoned: AtomicUsize,
    /// Bumped by `clear`; a pass started under an older epoch stops.
    epoch: AtomicU64,
    status: watch::Sender<QueueStatus>,
}

impl OfflineQueue {
    /// The status reports zero pending records until the first
    /// `recover_interrupted`, `enqueue` or `drain`.
    pub fn new(
        repository: Arc<dyn PendingRecordRepositoryTrait>,
        performer: Arc<dyn WritePerformer>,
        connectivity: Arc<ConnectivityMonitor>,
        max_retry_attempts: u32,
    ) -> Self {
        let (status, _) = watch::channel(QueueStatus::default());
        Self {
            repository,
            performer,
            connectivity,
            max_retry_attempts: max_retry_attempts.max(1),
            draining: AtomicBool::new(false),
            abandoned: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            status,
        }
    }

    /// Persist a new pending record and kick off a background drain.
    ///
    /// Returns whether the local save succeeded, independent of the sync.
    pub async fn enqueue(
        self: &Arc<Self>,
        request_payload: Vec<u8>,
        attachment_payload: Option<Vec<u8>>,
    ) -> bool {
        let record = PendingRecord::new(request_payload, attachment_payload);
        let id = record.id;

        if let Err(e) = self.repository.insert(record).await {
            error!("[OfflineQueue] Failed to persist pending record: {}", e);
            return false;
        }
        info!("[OfflineQueue] Queued pending record {}", id);
        self.publish_status(None).await;

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            queue.drain().await;
        });
        true
    }

    /// One pass over the queue. No-op when offline, already draining, or empty.
    pub async fn drain(&self) -> DrainReport {
        if !self.connectivity.is_connected() {
            debug!("[OfflineQueue] Drain skipped: offline");
            return DrainReport::skipped(DrainSkip::Offline);
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[OfflineQueue] Drain skipped: already draining");
            return DrainReport::skipped(DrainSkip::AlreadyDraining);
        }
        let guard = DrainGuard(&self.draining);
        let epoch = self.epoch.load(Ordering::Acquire);

        let records = match self.repository.list_pending().await {
            Ok(records) => records,
            Err(e) => {
                warn!("[OfflineQueue] Could not load pending records: {}", e);
                return DrainReport::default();
            }
        };
        if records.is_empty() {
            drop(guard);
            // Unreadable rows may just have been purged.
            self.publish_status(None).await;
            return DrainReport::skipped(DrainSkip::Empty);
        }

        self.publish_status(None).await;
        info!("[OfflineQueue] Draining {} pending record(s)", records.len());

        let mut report = DrainReport::default();
        for record in records {
            if !self.connectivity.is_connected() {
                info!("[OfflineQueue] Connection lost mid-drain; stopping pass");
                break;
            }
            if self.epoch.load(Ordering::Acquire) != epoch {
                info!("[OfflineQueue] Queue cleared mid-drain; stopping pass");
                break;
            }
            if let Err(e) = self.sync_one(&record, &mut report).await {
                warn!("[OfflineQueue] Storage error on record {}: {}", record.id, e);
                report.last_error = Some(e.to_string());
            }
        }

        // Release the flag before publishing so the status reads idle.
        drop(guard);
        self.publish_status(report.last_error.clone()).await;
        info!(
            "[OfflineQueue] Drain finished synced={} failed={} abandoned={}",
            report.synced, report.failed, report.abandoned
        );
        report
    }

    async fn sync_one(&self, record: &PendingRecord, report: &mut DrainReport) -> Result<()> {
        if record.is_syncing {
            report.in_flight += 1;
            return Ok(());
        }
        if record.is_exhausted(self.max_retry_attempts) {
            self.abandon(record.id, record.sync_attempts, record.last_error.as_deref())
                .await?;
            report.abandoned += 1;
            return Ok(());
        }
        if !self.repository.mark_syncing(record.id).await? {
            report.in_flight += 1;
            return Ok(());
        }

        let result = self.perform_claimed(record, report).await;
        if result.is_err() {
            self.release(record.id).await;
        }
        result
    }

    /// Replay a record this pass has claimed and settle it.
    async fn perform_claimed(&self, record: &PendingRecord, report: &mut DrainReport) -> Result<()> {
        let outcome = self
            .performer
            .perform_create(&record.request_payload, record.attachment_payload.as_deref())
            .await;

        match outcome {
            Ok(()) => {
                self.repository.delete(record.id).await?;
                report.synced += 1;
                info!("[OfflineQueue] Synced pending record {}", record.id);
            }
            Err(e) => {
                let message = e.to_string();
                let attempts = self
                    .repository
                    .record_failure(record.id, message.clone())
                    .await?;
                report.failed += 1;
                report.last_error = Some(message.clone());
                warn!(
                    "[OfflineQueue] Sync attempt {}/{} failed for {}: {}",
                    attempts, self.max_retry_attempts, record.id, message
                );
                if attempts >= self.max_retry_attempts {
                    self.abandon(record.id, attempts, Some(&message)).await?;
                    report.abandoned += 1;
                }
            }
        }
        Ok(())
    }

    /// Best-effort: hand a claimed record back to later passes after a
    /// storage error.
    async fn release(&self, id: Uuid) {
        if let Err(e) = self.repository.release(id).await {
            warn!("[OfflineQueue] Could not release pending record {}: {}", id, e);
        }
    }

    async fn abandon(&self, id: Uuid, attempts: u32, last_error: Option<&str>) -> Result<()> {
        self.repository.delete(id).await?;
        self.abandoned.fetch_add(1, Ordering::Relaxed);
        warn!(
            "[OfflineQueue] Retry limit exceeded: abandoned pending record {} after {} attempt(s) (last error: {})",
            id,
            attempts,
            last_error.unwrap_or("none")
        );
        Ok(())
    }

    /// Clear syncing flags left behind by a pass interrupted by a crash.
    pub async fn recover_interrupted(&self) -> usize {
        let recovered = match self.repository.reset_syncing().await {
            Ok(0) => 0,
            Ok(reset) => {
                info!("[OfflineQueue] Recovered {} interrupted pending record(s)", reset);
                reset
            }
            Err(e) => {
                warn!("[OfflineQueue] Failed to recover interrupted records: {}", e);
                0
            }
        };
        self.publish_status(None).await;
        recovered
    }

    /// Drop every pending record and stop any pass in progress before its
    /// next record. Returns how many were discarded.
    pub async fn clear(&self) -> usize {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let removed = match self.repository.clear().await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("[OfflineQueue] Failed to clear pending records: {}", e);
                0
            }
        };
        if removed > 0 {
            info!("[OfflineQueue] Discarded {} pending record(s)", removed);
        }
        self.publish_status(None).await;
        removed
    }

    /// Number of pending records.
    pub async fn count(&self) -> usize {
        self.repository.count().await.unwrap_or_else(|e| {
            warn!("[OfflineQueue] Failed to count pending records: {}", e);
            0
        })
    }

    pub async fn pending_records(&self) -> Result<Vec<PendingRecord>> {
        self.repository.list_pending().await
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Last published status. `pending` is refreshed after every enqueue,
    /// drain pass, recovery and clear.
    pub fn status(&self) -> QueueStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueStatus> {
        self.status.subscribe()
    }

    async fn publish_status(&self, last_error: Option<String>) {
        let pending = self.count().await;
        let previous_error = self.status.borrow().last_error.clone();
        self.status.send_replace(QueueStatus {
            pending,
            is_draining: self.is_draining(),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            last_error: last_error.or(previous_error),
        });
    }

    /// Drain once per reconnect event. The task ends when the queue is dropped
    /// or the monitor goes away.
    pub fn spawn_reconnect_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.connectivity.reconnects();
        let queue: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let Some(queue) = queue.upgrade() else {
                            break;
                        };
                        queue.drain().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("[OfflineQueue] Reconnect listener stopped");
        })
    }
}
