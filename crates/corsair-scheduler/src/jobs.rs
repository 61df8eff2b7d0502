// SPDX-License-Identifier: GPL-3.0-or-later
use crate::job::{Job, JobContext, JobResult};
use anyhow::Result;
use corsair_application::{
    backlog_search, rss_sync, AcquisitionService, AcquisitionTracker, IndexerClient, IndexerError,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Whether a failed indexer call is worth another attempt this cycle
fn indexer_retry(err: &IndexerError) -> bool {
    match err {
        IndexerError::Request(_) | IndexerError::Timeout => true,
        IndexerError::HttpStatus { status } => *status >= 500 || *status == 429,
        IndexerError::Api { .. } | IndexerError::Parse(_) => false,
    }
}

/// Polls one indexer's RSS feed and feeds the results to the pipeline.
pub struct RssSyncJob {
    indexer: Arc<dyn IndexerClient>,
    service: AcquisitionService,
}

impl RssSyncJob {
    pub fn new(indexer: Arc<dyn IndexerClient>, service: AcquisitionService) -> Self {
        Self { indexer, service }
    }
}

#[async_trait::async_trait]
impl Job for RssSyncJob {
    fn job_type(&self) -> &'static str {
        "rss_sync"
    }

    fn name(&self) -> String {
        format!("RSS Sync ({})", self.indexer.name())
    }

    async fn execute(&self, ctx: JobContext) -> Result<JobResult> {
        info!(target: "jobs", job_id = %ctx.job_id, indexer = self.indexer.name(), "executing RSS sync job");

        match rss_sync(&self.service, self.indexer.as_ref()).await {
            Ok(outcomes) => {
                let queued = outcomes.iter().filter(|o| o.is_queued()).count();
                info!(
                    target: "jobs",
                    job_id = %ctx.job_id,
                    candidates = outcomes.len(),
                    queued,
                    "RSS sync completed successfully"
                );
                Ok(JobResult::done(outcomes.len()))
            }
            Err(err) => {
                warn!(target: "jobs", job_id = %ctx.job_id, error = %err, "RSS sync failed");
                Ok(JobResult::Failure {
                    retry: indexer_retry(&err),
                    error: err.to_string(),
                })
            }
        }
    }

    fn max_retries(&self) -> u32 {
        2
    }
}

/// Searches every indexer for wanted targets that have nothing queued.
pub struct BacklogSearchJob {
    indexers: Vec<Arc<dyn IndexerClient>>,
    service: AcquisitionService,
}

impl BacklogSearchJob {
    pub fn new(indexers: Vec<Arc<dyn IndexerClient>>, service: AcquisitionService) -> Self {
        Self { indexers, service }
    }
}

#[async_trait::async_trait]
impl Job for BacklogSearchJob {
    fn job_type(&self) -> &'static str {
        "backlog_search"
    }

    fn name(&self) -> String {
        "Backlog Search".to_string()
    }

    async fn execute(&self, ctx: JobContext) -> Result<JobResult> {
        info!(target: "jobs", job_id = %ctx.job_id, indexers = self.indexers.len(), "executing backlog search job");

        let decisions = backlog_search(&self.service, &self.indexers).await?;
        let grabbed = decisions.iter().filter(|d| d.grabbed().is_some()).count();

        info!(
            target: "jobs",
            job_id = %ctx.job_id,
            targets = decisions.len(),
            grabbed,
            "backlog search completed successfully"
        );
        Ok(JobResult::done(decisions.len()))
    }

    fn max_retries(&self) -> u32 {
        1
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_secs(5 * 60)
    }
}

/// Drives the download tracker: one `tick()` per run.
pub struct TrackerPollJob {
    tracker: AcquisitionTracker,
}

impl TrackerPollJob {
    pub fn new(tracker: AcquisitionTracker) -> Self {
        Self { tracker }
    }
}

#[async_trait::async_trait]
impl Job for TrackerPollJob {
    fn job_type(&self) -> &'static str {
        "tracker_poll"
    }

    fn name(&self) -> String {
        "Download Tracker".to_string()
    }

    async fn execute(&self, _ctx: JobContext) -> Result<JobResult> {
        // item-level failures are retried by the tracker itself
        Ok(JobResult::done(self.tracker.tick().await))
    }

    fn is_retriable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corsair_application::{
        AppState, Collaborators, IndexerSearchQuery, InMemoryEventBus, RawCandidate, SystemClock,
    };
    use corsair_config::{AppConfig, IndexerConfig, IndexerKind};
    use corsair_domain::Protocol;
    use corsair_infrastructure::{InMemoryBlocklist, InMemoryLibrary, PathCheckImporter};

    struct FeedIndexer {
        config: IndexerConfig,
        result: fn() -> Result<Vec<RawCandidate>, IndexerError>,
    }

    #[async_trait::async_trait]
    impl IndexerClient for FeedIndexer {
        fn config(&self) -> &IndexerConfig {
            &self.config
        }

        async fn search(&self, _query: &IndexerSearchQuery) -> Result<Vec<RawCandidate>, IndexerError> {
            (self.result)()
        }

        async fn fetch_rss(&self) -> Result<Vec<RawCandidate>, IndexerError> {
            (self.result)()
        }

        async fn test_connection(&self) -> Result<(), IndexerError> {
            Ok(())
        }
    }

    fn indexer(result: fn() -> Result<Vec<RawCandidate>, IndexerError>) -> Arc<dyn IndexerClient> {
        Arc::new(FeedIndexer {
            config: IndexerConfig {
                name: "feed".into(),
                kind: IndexerKind::Torznab,
                base_url: "https://example.invalid".into(),
                api_key: None,
                categories: vec![],
                enabled: true,
                rss_interval_secs: None,
            },
            result,
        })
    }

    fn state() -> AppState {
        let library = Arc::new(InMemoryLibrary::default());
        AppState::new(
            AppConfig::default(),
            Collaborators {
                library: library.clone(),
                blocklist: Arc::new(InMemoryBlocklist::new()),
                importer: Arc::new(PathCheckImporter::new(library)),
                events: Arc::new(InMemoryEventBus::new()),
                clock: Arc::new(SystemClock),
                http: corsair_infrastructure::http_client().unwrap(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn rss_job_counts_candidates() {
        let job = RssSyncJob::new(
            indexer(|| {
                Ok(vec![RawCandidate {
                    title: "Unknown.Show.S01E01.720p.HDTV.x264-GRP".into(),
                    download_url: "magnet:?xt=urn:btih:abc".into(),
                    guid: None,
                    size_bytes: None,
                    published_at: None,
                    protocol: Protocol::Torrent,
                    indexer: "feed".into(),
                    indexer_flags: vec![],
                    seeders: None,
                }])
            }),
            state().service,
        );

        let result = job.execute(JobContext::new("rss-sync:feed", 1)).await.unwrap();
        assert_eq!(result, JobResult::done(1));
        assert_eq!(job.name(), "RSS Sync (feed)");
    }

    #[tokio::test]
    async fn rss_job_classifies_indexer_errors() {
        let transient = RssSyncJob::new(indexer(|| Err(IndexerError::Timeout)), state().service);
        let result = transient.execute(JobContext::new("rss", 1)).await.unwrap();
        assert!(matches!(result, JobResult::Failure { retry: true, .. }));

        let permanent = RssSyncJob::new(
            indexer(|| {
                Err(IndexerError::Api {
                    code: "100".into(),
                    description: "Incorrect user credentials".into(),
                })
            }),
            state().service,
        );
        let result = permanent.execute(JobContext::new("rss", 1)).await.unwrap();
        assert!(matches!(result, JobResult::Failure { retry: false, .. }));
    }

    #[tokio::test]
    async fn backlog_and_tracker_jobs_run_on_empty_library() {
        let state = state();
        let backlog = BacklogSearchJob::new(vec![indexer(|| Ok(vec![]))], state.service.clone());
        assert_eq!(
            backlog.execute(JobContext::new("backlog", 1)).await.unwrap(),
            JobResult::done(0)
        );

        let poll = TrackerPollJob::new(state.tracker().clone());
        assert_eq!(
            poll.execute(JobContext::new("poll", 1)).await.unwrap(),
            JobResult::done(0)
        );
        assert!(!poll.is_retriable());
    }
}
