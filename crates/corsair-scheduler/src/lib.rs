// SPDX-License-Identifier: GPL-3.0-or-later
pub mod job;
pub mod jobs;
pub mod registry;

use corsair_application::AppState;
use registry::JobRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use jobs::{BacklogSearchJob, RssSyncJob, TrackerPollJob};

/// Permit pool reserved for the tracker poll loop.
pub const TRACKER_POOL: &str = "tracker";

/// Background work: one RSS producer per indexer, the backlog search and
/// the tracker poll loop.
pub struct Scheduler {
    state: AppState,
    registry: Arc<JobRegistry>,
}

impl Scheduler {
    pub fn new(state: AppState) -> Self {
        // tracker polling gets its own lane so slow indexers cannot starve it
        let registry = Arc::new(
            JobRegistry::new(state.config.scheduler.max_concurrent_jobs).with_pool(TRACKER_POOL, 1),
        );
        Self { state, registry }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub async fn register_jobs(&self) {
        info!(target: "scheduler", "registering background jobs");
        let config = &self.state.config.scheduler;

        for indexer in &self.state.indexers {
            let every = indexer
                .config()
                .rss_interval_secs
                .unwrap_or(config.rss_interval_secs);
            self.registry
                .register(
                    format!("rss-sync:{}", indexer.name()),
                    RssSyncJob::new(indexer.clone(), self.state.service.clone()),
                    Schedule::Interval(Duration::from_secs(every)),
                )
                .await;
        }

        self.registry
            .register(
                "backlog-search",
                BacklogSearchJob::new(self.state.indexers.clone(), self.state.service.clone()),
                Schedule::Interval(Duration::from_secs(config.backlog_interval_secs)),
            )
            .await;

        self.registry
            .register_in(
                TRACKER_POOL,
                "tracker-poll",
                TrackerPollJob::new(self.state.tracker().clone()),
                Schedule::Interval(Duration::from_secs(config.tracker_interval_secs)),
            )
            .await;

        info!(target: "scheduler", "all jobs registered");
    }

    /// Start every job loop. The returned task finishes once
    /// [`JobRegistry::shutdown`] has been called and the loops have drained.
    pub fn start(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            for handle in registry.start().await {
                let _ = handle.await;
            }
        })
    }

    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

pub use job::{Job, JobContext, JobResult};
pub use registry::{Schedule, DEFAULT_POOL};
