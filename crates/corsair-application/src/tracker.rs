// SPDX-License-Identifier: GPL-3.0-or-later
//! Acquisition queue and download tracker.
//!
//! The tracker is the only writer of [`QueueItem`] state. Every live item sits
//! in one map keyed by id; `tick()` picks the items that are due, works on
//! copies of them outside the lock on a bounded pool, and writes the results
//! back. A cancellation that lands while an item is being worked on wins over
//! the worker's result.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use corsair_config::AcquisitionConfig;
use corsair_domain::{
    AcquisitionEvent, BlocklistEntry, DownloadFailedPayload, FailureReason, ParsedRelease,
    Protocol, QueueItem, QueueItemId, QueueState, ReleaseGrabbedPayload, ReleaseImportedPayload,
    TargetRef,
};
use corsair_infrastructure::{Blocklist, Importer};
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::decision::Approval;
use crate::download_clients::{AddDownloadRequest, DownloadClient, DownloadClientError, DownloadState, DownloadStatus};
use crate::events::EventPublisher;

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("transient download error: {0}")]
    TransientDownload(String),
    #[error("permanent download error: {0}")]
    PermanentDownload(String),
    #[error("target already has live queue item {0}")]
    Superseded(QueueItemId),
}

impl From<DownloadClientError> for AcquisitionError {
    fn from(err: DownloadClientError) -> Self {
        if err.is_transient() {
            Self::TransientDownload(err.to_string())
        } else {
            Self::PermanentDownload(err.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub max_concurrent_polls: usize,
    pub max_failures: u32,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub max_import_attempts: u32,
    pub call_timeout: StdDuration,
}

impl From<&AcquisitionConfig> for TrackerConfig {
    fn from(config: &AcquisitionConfig) -> Self {
        Self {
            max_concurrent_polls: config.max_concurrent_polls.max(1),
            max_failures: config.max_failures.max(1),
            retry_base_delay_secs: config.retry_base_delay_secs,
            retry_max_delay_secs: config.retry_max_delay_secs,
            max_import_attempts: config.max_import_attempts.max(1),
            call_timeout: StdDuration::from_secs(config.download_client_timeout_secs),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::from(&AcquisitionConfig::default())
    }
}

impl TrackerConfig {
    /// `base * 2^attempt`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(32);
        let secs = self
            .retry_base_delay_secs
            .saturating_mul(factor)
            .min(self.retry_max_delay_secs);
        Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }
}

/// An approved release on its way into the queue.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub target: TargetRef,
    pub release: ParsedRelease,
    pub download_url: String,
    pub approval: Approval,
    /// Set for deferred approvals; the item waits in `delay` until then.
    pub hold_until: Option<DateTime<Utc>>,
}

/// Scheduling state of a queue item as seen by `tick()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    BackoffUntil(DateTime<Utc>),
}

#[derive(Default)]
struct TrackerState {
    items: HashMap<QueueItemId, QueueItem>,
    running: HashSet<QueueItemId>,
}

struct Inner {
    state: RwLock<TrackerState>,
    clients: HashMap<Protocol, Arc<dyn DownloadClient>>,
    importer: Arc<dyn Importer>,
    events: Arc<dyn EventPublisher>,
    blocklist: Arc<dyn Blocklist>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
}

#[derive(Clone)]
pub struct AcquisitionTracker {
    inner: Arc<Inner>,
}

fn is_live(item: &QueueItem) -> bool {
    !item.is_terminal() && !item.pending_removal
}

fn is_due(item: &QueueItem, now: DateTime<Utc>) -> bool {
    if item.pending_removal || item.is_terminal() {
        return true;
    }
    match item.state {
        QueueState::Delay => item.hold_until.map_or(true, |until| until <= now),
        _ => item.next_attempt_at <= now,
    }
}

/// Apply a transition, logging instead of failing when the edge is not allowed.
fn advance(item: &mut QueueItem, next: QueueState, now: DateTime<Utc>) -> bool {
    match item.transition(next, now) {
        Ok(()) => true,
        Err(err) => {
            warn!(target: "tracker", queue_item_id = %item.id, error = %err, "transition refused");
            false
        }
    }
}

impl AcquisitionTracker {
    /// The first client registered for a protocol handles it.
    pub fn new(
        clients: Vec<Arc<dyn DownloadClient>>,
        importer: Arc<dyn Importer>,
        events: Arc<dyn EventPublisher>,
        blocklist: Arc<dyn Blocklist>,
        clock: Arc<dyn Clock>,
        config: TrackerConfig,
    ) -> Self {
        let mut by_protocol: HashMap<Protocol, Arc<dyn DownloadClient>> = HashMap::new();
        for client in clients {
            by_protocol.entry(client.protocol()).or_insert(client);
        }
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(TrackerState::default()),
                clients: by_protocol,
                importer,
                events,
                blocklist,
                clock,
                config,
            }),
        }
    }

    /// Protocols with a download client attached.
    pub fn protocols(&self) -> Vec<Protocol> {
        let mut protocols: Vec<Protocol> = self.inner.clients.keys().copied().collect();
        protocols.sort_by_key(|protocol| protocol.as_str());
        protocols
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Add an approved release. Refused when a live item already covers any
    /// part of the target; callers replace through [`cancel`](Self::cancel).
    pub async fn enqueue(&self, new: NewQueueItem) -> Result<QueueItemId, AcquisitionError> {
        let now = self.now();
        let mut state = self.inner.state.write().await;

        if let Some(existing) = state
            .items
            .values()
            .find(|item| is_live(item) && item.target.overlaps(&new.target))
        {
            return Err(AcquisitionError::Superseded(existing.id));
        }

        let (queue_state, hold_until) = match new.hold_until {
            Some(until) if until > now => (QueueState::Delay, Some(until)),
            _ => (QueueState::Queued, None),
        };

        let item = QueueItem {
            id: QueueItemId::new(),
            download_id: None,
            target: new.target,
            download_url: new.download_url,
            quality: new.approval.quality,
            custom_format_score: new.approval.custom_format_score,
            score: new.approval.score,
            protocol: new.release.protocol,
            size_bytes: new.release.size_bytes,
            size_left: new.release.size_bytes,
            state: queue_state,
            failure_count: 0,
            import_attempts: 0,
            output_path: None,
            hold_until,
            next_attempt_at: now,
            pending_removal: false,
            last_error: None,
            created_at: now,
            last_updated_at: now,
            release: new.release,
        };

        info!(
            target: "tracker",
            queue_item_id = %item.id,
            target_ref = %item.target,
            title = %item.release.title,
            state = %item.state,
            "queue item created"
        );

        let id = item.id;
        state.items.insert(id, item);
        Ok(id)
    }

    /// Mark a live item superseded. The client-side removal happens on the
    /// next tick; an in-flight call for the item is left to finish.
    pub async fn cancel(&self, id: QueueItemId) -> bool {
        let now = self.now();
        let mut state = self.inner.state.write().await;
        let Some(item) = state.items.get_mut(&id) else {
            return false;
        };
        if item.pending_removal || !item.state.is_cancellable() {
            return false;
        }
        if !advance(item, QueueState::Failed(FailureReason::Superseded), now) {
            return false;
        }
        item.pending_removal = true;
        info!(
            target: "tracker",
            queue_item_id = %id,
            target_ref = %item.target,
            title = %item.release.title,
            "queue item superseded"
        );
        true
    }

    /// Live items whose target shares at least one episode (or the movie)
    /// with `target`.
    pub async fn live_items_overlapping(&self, target: &TargetRef) -> Vec<QueueItem> {
        self.inner
            .state
            .read()
            .await
            .items
            .values()
            .filter(|item| is_live(item) && item.target.overlaps(target))
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: QueueItemId) -> Option<QueueItem> {
        self.inner.state.read().await.items.get(&id).cloned()
    }

    /// Copy of every item currently held, oldest first.
    pub async fn snapshot(&self) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = self
            .inner
            .state
            .read()
            .await
            .items
            .values()
            .cloned()
            .collect();
        items.sort_by_key(|item| item.created_at);
        items
    }

    pub async fn task_state(&self, id: QueueItemId) -> Option<TaskState> {
        let now = self.now();
        let state = self.inner.state.read().await;
        let item = state.items.get(&id)?;
        if state.running.contains(&id) {
            return Some(TaskState::Running);
        }
        let wake = match item.state {
            QueueState::Delay => item.hold_until,
            _ => Some(item.next_attempt_at),
        };
        Some(match wake {
            Some(at) if at > now && !item.pending_removal => TaskState::BackoffUntil(at),
            _ => TaskState::Ready,
        })
    }

    /// Work every due item once. Returns how many items were picked up.
    pub async fn tick(&self) -> usize {
        let now = self.now();
        let due: Vec<QueueItemId> = {
            let mut guard = self.inner.state.write().await;
            let TrackerState { items, running } = &mut *guard;
            let ids: Vec<QueueItemId> = items
                .values()
                .filter(|item| !running.contains(&item.id) && is_due(item, now))
                .map(|item| item.id)
                .collect();
            running.extend(ids.iter().copied());
            ids
        };
        if due.is_empty() {
            return 0;
        }
        debug!(target: "tracker", due = due.len(), "tracker tick");

        let semaphore = Arc::new(Semaphore::new(self.inner.config.max_concurrent_polls));
        let mut tasks = JoinSet::new();
        for id in &due {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let this = self.clone();
            let id = *id;
            tasks.spawn(async move {
                let _permit = permit;
                this.process(id).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(target: "tracker", error = %err, "tracker task panicked");
            }
        }

        // anything a panicked task left behind becomes pickable again
        let mut state = self.inner.state.write().await;
        for id in &due {
            state.running.remove(id);
        }
        due.len()
    }

    async fn process(&self, id: QueueItemId) {
        let Some(mut item) = self.get(id).await else {
            self.release(id).await;
            return;
        };

        if item.pending_removal {
            return self.remove_cancelled(item).await;
        }

        match item.state.clone() {
            QueueState::Delay => {
                let now = self.now();
                if advance(&mut item, QueueState::Queued, now) {
                    item.hold_until = None;
                    item.next_attempt_at = now;
                    debug!(target: "tracker", queue_item_id = %id, "delay elapsed");
                    self.grab(item).await
                } else {
                    self.commit(item).await;
                }
            }
            QueueState::Queued if item.download_id.is_none() => self.grab(item).await,
            QueueState::Queued | QueueState::Downloading => self.poll(item).await,
            QueueState::Warning if item.import_attempts > 0 && item.output_path.is_some() => {
                self.import(item).await
            }
            QueueState::Warning => self.poll(item).await,
            QueueState::Completed | QueueState::Importing => self.import(item).await,
            QueueState::Imported | QueueState::Failed(_) => self.discard(id).await,
        }
    }

    /// Write back an item worked on outside the lock. Returns false when the
    /// item was cancelled meanwhile: the cancellation stays, and only a newly
    /// assigned download id is carried over so the removal can reach the client.
    async fn commit(&self, item: QueueItem) -> bool {
        let mut state = self.inner.state.write().await;
        state.running.remove(&item.id);

        let cancelled = match state.items.get(&item.id) {
            None => return false,
            Some(stored) => stored.pending_removal,
        };
        if cancelled {
            if let Some(stored) = state.items.get_mut(&item.id) {
                if stored.download_id.is_none() {
                    stored.download_id = item.download_id;
                }
            }
            return false;
        }

        if item.is_terminal() {
            state.items.remove(&item.id);
        } else {
            state.items.insert(item.id, item);
        }
        true
    }

    /// Store the worker's copy while it keeps running. False when the item
    /// was cancelled in the meantime.
    async fn checkpoint(&self, item: &QueueItem) -> bool {
        let mut state = self.inner.state.write().await;
        match state.items.get_mut(&item.id) {
            Some(stored) if !stored.pending_removal => {
                *stored = item.clone();
                true
            }
            _ => false,
        }
    }

    async fn release(&self, id: QueueItemId) {
        self.inner.state.write().await.running.remove(&id);
    }

    async fn discard(&self, id: QueueItemId) {
        let mut state = self.inner.state.write().await;
        state.items.remove(&id);
        state.running.remove(&id);
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, DownloadClientError>>,
    ) -> Result<T, DownloadClientError> {
        match timeout(self.inner.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(DownloadClientError::Timeout),
        }
    }

    fn client_for(&self, protocol: Protocol) -> Option<Arc<dyn DownloadClient>> {
        self.inner.clients.get(&protocol).cloned()
    }

    fn publish(&self, event: AcquisitionEvent) {
        self.inner.events.publish(&event.into_domain_event());
    }

    async fn grab(&self, mut item: QueueItem) {
        let Some(client) = self.client_for(item.protocol) else {
            let message = format!("no download client for {}", item.protocol);
            return self
                .fail(item, FailureReason::PermanentDownload { message })
                .await;
        };

        let request = AddDownloadRequest {
            url: item.download_url.clone(),
            title: item.release.title.clone(),
        };
        match self.call(client.add(&request)).await {
            Ok(download_id) => {
                let now = self.now();
                item.download_id = Some(download_id.clone());
                item.failure_count = 0;
                item.last_error = None;
                item.next_attempt_at = now;
                advance(&mut item, QueueState::Downloading, now);

                let event = AcquisitionEvent::Grabbed(ReleaseGrabbedPayload {
                    queue_item_id: item.id,
                    target: item.target.clone(),
                    title: item.release.title.clone(),
                    quality: item.quality,
                    custom_format_score: item.custom_format_score,
                    protocol: item.protocol,
                    indexer: item.release.indexer.clone(),
                    download_id: download_id.clone(),
                });
                info!(
                    target: "tracker",
                    queue_item_id = %item.id,
                    client = client.name(),
                    %download_id,
                    title = %item.release.title,
                    "release grabbed"
                );
                if self.commit(item).await {
                    self.publish(event);
                }
            }
            Err(err) => self.handle_error(item, err).await,
        }
    }

    async fn poll(&self, item: QueueItem) {
        let Some(download_id) = item.download_id.clone() else {
            return self.grab(item).await;
        };
        let Some(client) = self.client_for(item.protocol) else {
            let message = format!("no download client for {}", item.protocol);
            return self
                .fail(item, FailureReason::PermanentDownload { message })
                .await;
        };

        match self.call(client.status(&download_id)).await {
            Ok(status) => self.apply_status(item, status).await,
            Err(err) => self.handle_error(item, err).await,
        }
    }

    async fn apply_status(&self, mut item: QueueItem, status: DownloadStatus) {
        let now = self.now();
        item.size_left = status.size_left;
        item.failure_count = 0;
        item.next_attempt_at = now;

        match status.state {
            DownloadState::Queued | DownloadState::Downloading => {
                if matches!(item.state, QueueState::Queued | QueueState::Warning) {
                    advance(&mut item, QueueState::Downloading, now);
                }
                item.last_error = None;
                self.commit(item).await;
            }
            DownloadState::Paused | DownloadState::Stalled => {
                if item.state == QueueState::Queued {
                    advance(&mut item, QueueState::Downloading, now);
                }
                if item.state != QueueState::Warning {
                    advance(&mut item, QueueState::Warning, now);
                }
                item.last_error = Some(
                    status
                        .message
                        .unwrap_or_else(|| "download is not progressing".to_string()),
                );
                debug!(target: "tracker", queue_item_id = %item.id, "download stalled");
                self.commit(item).await;
            }
            DownloadState::Completed => {
                let Some(output_path) = status.output_path else {
                    if item.state != QueueState::Warning {
                        if item.state == QueueState::Queued {
                            advance(&mut item, QueueState::Downloading, now);
                        }
                        advance(&mut item, QueueState::Warning, now);
                    }
                    item.last_error = Some("download completed without an output path".to_string());
                    self.commit(item).await;
                    return;
                };
                if item.state == QueueState::Queued {
                    advance(&mut item, QueueState::Downloading, now);
                }
                advance(&mut item, QueueState::Completed, now);
                item.output_path = Some(output_path);
                self.import(item).await
            }
            DownloadState::Failed => {
                let message = status
                    .message
                    .unwrap_or_else(|| "download failed in client".to_string());
                self.fail(item, FailureReason::PermanentDownload { message })
                    .await
            }
        }
    }

    async fn import(&self, mut item: QueueItem) {
        let now = self.now();
        let Some(output_path) = item.output_path.clone() else {
            let message = "no output path to import".to_string();
            return self.fail(item, FailureReason::ImportFailed { message }).await;
        };

        if item.state != QueueState::Importing && !advance(&mut item, QueueState::Importing, now) {
            self.commit(item).await;
            return;
        }
        // importing is not cancellable, so publish it before the hand-off
        if !self.checkpoint(&item).await {
            self.commit(item).await;
            return;
        }

        let result = match timeout(
            self.inner.config.call_timeout,
            self.inner.importer.import(&item, &output_path),
        )
        .await
        {
            Ok(result) => result.map_err(|err| err.to_string()),
            Err(_) => Err("import timed out".to_string()),
        };

        match result {
            Ok(()) => {
                advance(&mut item, QueueState::Imported, now);
                let event = AcquisitionEvent::Imported(ReleaseImportedPayload {
                    queue_item_id: item.id,
                    target: item.target.clone(),
                    title: item.release.title.clone(),
                    quality: item.quality,
                    output_path,
                });
                info!(
                    target: "tracker",
                    queue_item_id = %item.id,
                    target_ref = %item.target,
                    title = %item.release.title,
                    "release imported"
                );
                if self.commit(item).await {
                    self.publish(event);
                }
            }
            Err(message) => {
                item.import_attempts += 1;
                item.last_error = Some(message.clone());
                advance(&mut item, QueueState::Warning, now);
                warn!(
                    target: "tracker",
                    queue_item_id = %item.id,
                    attempt = item.import_attempts,
                    error = %message,
                    "import failed"
                );
                if item.import_attempts >= self.inner.config.max_import_attempts {
                    return self.fail(item, FailureReason::ImportFailed { message }).await;
                }
                item.next_attempt_at = now + self.inner.config.backoff(item.import_attempts);
                self.commit(item).await;
            }
        }
    }

    async fn handle_error(&self, mut item: QueueItem, err: DownloadClientError) {
        if matches!(err, DownloadClientError::NotFound(_)) {
            // re-added on the next attempt
            item.download_id = None;
        }
        match AcquisitionError::from(err) {
            AcquisitionError::PermanentDownload(message) => {
                self.fail(item, FailureReason::PermanentDownload { message })
                    .await
            }
            other => self.retry(item, other.to_string()).await,
        }
    }

    async fn retry(&self, mut item: QueueItem, message: String) {
        let now = self.now();
        item.failure_count += 1;
        item.last_error = Some(message.clone());

        if item.failure_count >= self.inner.config.max_failures {
            return self
                .fail(item, FailureReason::RetriesExhausted { last_error: message })
                .await;
        }

        let delay = self.inner.config.backoff(item.failure_count);
        advance(&mut item, QueueState::Queued, now);
        item.next_attempt_at = now + delay;
        warn!(
            target: "tracker",
            queue_item_id = %item.id,
            attempt = item.failure_count,
            retry_in_secs = delay.num_seconds(),
            error = %message,
            "download call failed; will retry"
        );
        self.commit(item).await;
    }

    async fn fail(&self, mut item: QueueItem, reason: FailureReason) {
        let now = self.now();
        let message = reason.to_string();
        let remove_download = matches!(
            reason,
            FailureReason::PermanentDownload { .. } | FailureReason::RetriesExhausted { .. }
        );
        if !advance(&mut item, QueueState::Failed(reason), now) {
            self.commit(item).await;
            return;
        }

        let entry = BlocklistEntry {
            source_title: item.release.title.clone(),
            target: item.target.clone(),
            reason: message.clone(),
            protocol: item.protocol,
            indexer: item.release.indexer.clone(),
            timestamp: now,
        };
        let event = AcquisitionEvent::DownloadFailed(DownloadFailedPayload {
            queue_item_id: item.id,
            target: item.target.clone(),
            title: item.release.title.clone(),
            reason: message.clone(),
        });
        let cleanup = item
            .download_id
            .clone()
            .filter(|_| remove_download)
            .zip(self.client_for(item.protocol));
        let id = item.id;

        if !self.commit(item).await {
            return;
        }

        warn!(target: "tracker", queue_item_id = %id, reason = %message, "queue item failed");
        if let Err(err) = self.inner.blocklist.add(entry).await {
            warn!(target: "tracker", queue_item_id = %id, error = %err, "failed to record blocklist entry");
        }
        self.publish(event);

        if let Some((download_id, client)) = cleanup {
            if let Err(err) = self.call(client.remove(&download_id, true)).await {
                debug!(target: "tracker", queue_item_id = %id, error = %err, "could not remove failed download");
            }
        }
    }

    async fn remove_cancelled(&self, item: QueueItem) {
        if let Some(download_id) = item.download_id.as_deref() {
            if let Some(client) = self.client_for(item.protocol) {
                match self.call(client.remove(download_id, true)).await {
                    Ok(()) => info!(
                        target: "tracker",
                        queue_item_id = %item.id,
                        %download_id,
                        "superseded download removed"
                    ),
                    Err(err) => warn!(
                        target: "tracker",
                        queue_item_id = %item.id,
                        error = %err,
                        "failed to remove superseded download"
                    ),
                }
            }
        }
        self.discard(item.id).await;
    }
}
