use std::sync::Arc;

use corsair_domain::TargetRef;
use corsair_infrastructure::WantedTarget;
use tracing::{debug, info, warn};

use crate::acquisition::{AcquisitionService, CandidateOutcome};
use crate::indexers::{IndexerClient, IndexerError, IndexerSearchQuery, RawCandidate};

const SEARCH_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManualSearchRequest {
    pub query: Option<String>,
    /// Restrict results to releases for this target.
    pub target: Option<TargetRef>,
}

#[derive(Debug, Clone)]
pub struct BacklogSearchDecision {
    pub wanted: WantedTarget,
    pub outcomes: Vec<CandidateOutcome>,
}

impl BacklogSearchDecision {
    pub fn grabbed(&self) -> Option<&CandidateOutcome> {
        self.outcomes.iter().find(|outcome| outcome.is_queued())
    }
}

/// Search one indexer and return every result with its decision, best first.
/// Nothing is grabbed.
#[tracing::instrument(skip(service, indexer), fields(indexer = indexer.name()))]
pub async fn manual_search(
    service: &AcquisitionService,
    indexer: &dyn IndexerClient,
    request: &ManualSearchRequest,
) -> Result<Vec<CandidateOutcome>, IndexerError> {
    let query = build_manual_query(request)?;
    let candidates = indexer
        .search(&IndexerSearchQuery {
            query,
            limit: Some(SEARCH_LIMIT),
        })
        .await?;

    let mut outcomes = service.evaluate(candidates, request.target.as_ref()).await;
    outcomes.sort_by(|a, b| b.rank.cmp(&a.rank));
    Ok(outcomes)
}

/// Pull the indexer's RSS feed and run it through the pipeline.
#[tracing::instrument(skip_all, fields(indexer = indexer.name()))]
pub async fn rss_sync(
    service: &AcquisitionService,
    indexer: &dyn IndexerClient,
) -> Result<Vec<CandidateOutcome>, IndexerError> {
    let candidates = indexer.fetch_rss().await?;
    debug!(target: "search", indexer = indexer.name(), count = candidates.len(), "rss feed fetched");
    Ok(service.process(candidates, None).await)
}

/// Wanted targets that have nothing in flight yet.
pub async fn detect_missing_targets(
    service: &AcquisitionService,
    wanted: Vec<WantedTarget>,
) -> Vec<WantedTarget> {
    let mut missing = Vec::with_capacity(wanted.len());
    for entry in wanted {
        if service
            .tracker()
            .live_items_overlapping(&entry.target)
            .await
            .is_empty()
        {
            missing.push(entry);
        }
    }
    missing
}

/// Search every enabled indexer for each wanted target and grab the best
/// approved result. A failing indexer is skipped for that target.
#[tracing::instrument(skip_all, fields(indexers = indexers.len()))]
pub async fn backlog_search(
    service: &AcquisitionService,
    indexers: &[Arc<dyn IndexerClient>],
) -> anyhow::Result<Vec<BacklogSearchDecision>> {
    let wanted = service.library().wanted().await?;
    let missing = detect_missing_targets(service, wanted).await;
    info!(target: "search", targets = missing.len(), "starting backlog search");

    let mut decisions = Vec::with_capacity(missing.len());
    for wanted in missing {
        let query = IndexerSearchQuery {
            query: wanted.search_term.clone(),
            limit: Some(SEARCH_LIMIT),
        };
        let mut candidates: Vec<RawCandidate> = Vec::new();
        for indexer in indexers.iter().filter(|i| i.config().enabled) {
            match indexer.search(&query).await {
                Ok(found) => candidates.extend(found),
                Err(err) => warn!(
                    target: "search",
                    indexer = indexer.name(),
                    query = %query.query,
                    error = %err,
                    "indexer search failed"
                ),
            }
        }

        let outcomes = service.process(candidates, Some(&wanted.target)).await;
        decisions.push(BacklogSearchDecision { wanted, outcomes });
    }

    Ok(decisions)
}

fn build_manual_query(request: &ManualSearchRequest) -> Result<String, IndexerError> {
    match request.query.as_deref().map(str::trim) {
        Some(query) if !query.is_empty() => Ok(query.to_string()),
        _ => Err(IndexerError::Request(
            "manual search requires a query".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::tests::{candidate, service};
    use crate::decision::RejectionReason;
    use crate::tracker::tests::harness;
    use async_trait::async_trait;
    use corsair_config::{IndexerConfig, IndexerKind};
    use corsair_domain::SeriesId;

    struct FakeIndexer {
        config: IndexerConfig,
        fail: bool,
    }

    impl FakeIndexer {
        fn new(name: &str) -> Self {
            Self {
                config: IndexerConfig {
                    name: name.to_string(),
                    kind: IndexerKind::Torznab,
                    base_url: "https://example.invalid".to_string(),
                    api_key: None,
                    categories: vec![5000],
                    enabled: true,
                    rss_interval_secs: None,
                },
                fail: false,
            }
        }

        fn failing(name: &str) -> Self {
            Self {
                fail: true,
                ..Self::new(name)
            }
        }
    }

    #[async_trait]
    impl IndexerClient for FakeIndexer {
        fn config(&self) -> &IndexerConfig {
            &self.config
        }

        async fn search(&self, query: &IndexerSearchQuery) -> Result<Vec<RawCandidate>, IndexerError> {
            if self.fail {
                return Err(IndexerError::Timeout);
            }
            if query.query.contains("S02E05") {
                return Ok(vec![
                    candidate("Show.Name.S02E05.720p.HDTV.x264-A", &self.config.name),
                    candidate("Show.Name.S02E05.1080p.WEB-DL.x264-B", &self.config.name),
                ]);
            }
            Ok(Vec::new())
        }

        async fn fetch_rss(&self) -> Result<Vec<RawCandidate>, IndexerError> {
            Ok(vec![
                candidate("Show.Name.S02E06.1080p.WEB-DL.x264-B", &self.config.name),
                candidate("Unrelated.Show.S01E01.720p.HDTV.x264-C", &self.config.name),
            ])
        }

        async fn test_connection(&self) -> Result<(), IndexerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn manual_search_ranks_without_grabbing() {
        let h = harness();
        let service = service(&h, SeriesId::new());
        let indexer = FakeIndexer::new("alpha");

        let results = manual_search(
            &service,
            &indexer,
            &ManualSearchRequest {
                query: Some("Show Name S02E05".into()),
                target: None,
            },
        )
        .await
        .expect("manual search should succeed");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Show.Name.S02E05.1080p.WEB-DL.x264-B");
        assert!(results.iter().all(|r| r.decision.is_approved()));
        assert!(h.tracker.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn manual_search_requires_query() {
        let h = harness();
        let service = service(&h, SeriesId::new());
        let err = manual_search(&service, &FakeIndexer::new("alpha"), &ManualSearchRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Request(_)));
    }

    #[tokio::test]
    async fn backlog_search_grabs_best_release_and_tolerates_failing_indexer() {
        let h = harness();
        let service = service(&h, SeriesId::new());
        let indexers: Vec<Arc<dyn IndexerClient>> = vec![
            Arc::new(FakeIndexer::failing("broken")),
            Arc::new(FakeIndexer::new("alpha")),
        ];

        let decisions = backlog_search(&service, &indexers)
            .await
            .expect("backlog search should succeed");

        assert_eq!(decisions.len(), 2);
        let e05 = decisions
            .iter()
            .find(|d| d.wanted.search_term.ends_with("S02E05"))
            .unwrap();
        assert_eq!(
            e05.grabbed().map(|o| o.title.as_str()),
            Some("Show.Name.S02E05.1080p.WEB-DL.x264-B")
        );
        let e06 = decisions
            .iter()
            .find(|d| d.wanted.search_term.ends_with("S02E06"))
            .unwrap();
        assert!(e06.outcomes.is_empty());

        // the grabbed episode is no longer missing
        let again = backlog_search(&service, &indexers).await.unwrap();
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn rss_sync_processes_feed() {
        let h = harness();
        let service = service(&h, SeriesId::new());

        let outcomes = rss_sync(&service, &FakeIndexer::new("alpha")).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_queued());
        assert_eq!(
            outcomes[1].decision.reasons()[0].reason,
            RejectionReason::UnknownTarget
        );
    }
}
