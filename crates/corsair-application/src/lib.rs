// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use corsair_config::AppConfig;
use corsair_infrastructure::{Blocklist, Importer, LibraryStateProvider};
use reqwest::Client;
use tracing::info;

pub mod acquisition;
pub mod clock;
pub mod custom_formats;
pub mod decision;
pub mod download_clients;
pub mod events;
pub mod indexers;
pub mod quality;
pub mod release_parsing;
pub mod search_automation;
pub mod target_locks;
pub mod tracker;

pub use acquisition::{AcquisitionService, CandidateOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use custom_formats::{CustomFormatEngine, CustomFormatError, FormatMatch};
pub use decision::{
    Approval, Decision, DecisionEngine, DecisionPolicy, EvaluationError, LibraryContext,
    Rejection, RejectionReason, ReleaseRank,
};
pub use download_clients::{
    build_download_client, DownloadClient, DownloadClientError, DownloadState, DownloadStatus,
};
pub use events::{EventPublisher, InMemoryEventBus, TracingEventPublisher};
pub use indexers::{build_indexer, IndexerClient, IndexerError, IndexerSearchQuery, RawCandidate};
pub use quality::QualityCatalog;
pub use release_parsing::{parse_release_title, IndexerHints, ParseFailure};
pub use search_automation::{backlog_search, manual_search, rss_sync, ManualSearchRequest};
pub use target_locks::TargetLocks;
pub use tracker::{AcquisitionError, AcquisitionTracker, NewQueueItem, TaskState, TrackerConfig};

/// Collaborators the pipeline needs from the outside.
pub struct Collaborators {
    pub library: Arc<dyn LibraryStateProvider>,
    pub blocklist: Arc<dyn Blocklist>,
    pub importer: Arc<dyn Importer>,
    pub events: Arc<dyn EventPublisher>,
    pub clock: Arc<dyn Clock>,
    pub http: Client,
}

/// The wired pipeline: indexers feeding the acquisition service, which owns
/// the tracker.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub service: AcquisitionService,
    pub indexers: Vec<Arc<dyn IndexerClient>>,
}

impl AppState {
    pub fn new(config: AppConfig, collaborators: Collaborators) -> Result<Self> {
        let acquisition = &config.acquisition;
        let formats = CustomFormatEngine::new(&config.custom_formats)
            .context("invalid custom format")?;
        let catalog = QualityCatalog::new(&config.quality_definitions);

        let client_timeout = Duration::from_secs(acquisition.download_client_timeout_secs);
        let clients: Vec<Arc<dyn DownloadClient>> = config
            .download_clients
            .iter()
            .filter(|c| c.enabled)
            .map(|c| build_download_client(c, collaborators.http.clone(), client_timeout))
            .collect();

        let tracker = AcquisitionTracker::new(
            clients,
            collaborators.importer,
            collaborators.events,
            collaborators.blocklist.clone(),
            collaborators.clock.clone(),
            TrackerConfig::from(acquisition),
        );

        let policy = DecisionPolicy {
            delay_profile: config.delay_profile.clone(),
            minimum_age_minutes: acquisition.minimum_age_minutes,
            retention_days: acquisition.retention_days,
            available_protocols: tracker.protocols(),
        };
        let engine = DecisionEngine::new(catalog, formats, policy);

        let service = AcquisitionService::new(
            engine,
            config.quality_profiles.clone(),
            collaborators.library,
            collaborators.blocklist,
            tracker,
            collaborators.clock,
            acquisition.max_concurrent_decisions,
        );

        let indexer_timeout = Duration::from_secs(acquisition.indexer_timeout_secs);
        let indexers = config
            .indexers
            .iter()
            .filter(|i| i.enabled)
            .map(|i| build_indexer(i, collaborators.http.clone(), indexer_timeout))
            .collect();

        Ok(Self {
            config,
            service,
            indexers,
        })
    }

    pub fn tracker(&self) -> &AcquisitionTracker {
        self.service.tracker()
    }

    pub fn on_start(&self) {
        info!(
            target: "application",
            indexers = self.indexers.len(),
            protocols = ?self.tracker().protocols(),
            profiles = self.config.quality_profiles.len(),
            "application state initialized"
        );
    }
}
