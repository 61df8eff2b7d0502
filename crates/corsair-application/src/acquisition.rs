// SPDX-License-Identifier: GPL-3.0-or-later
//! Candidate pipeline: parse, resolve, decide, rank and hand over to the tracker.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use corsair_domain::{ParsedRelease, QualityProfile, QueueItem, QueueItemId, TargetKey, TargetRef};
use corsair_infrastructure::{Blocklist, LibraryStateProvider};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::decision::{
    Decision, DecisionEngine, EvaluationError, LibraryContext, Rejection, RejectionReason,
    ReleaseRank,
};
use crate::indexers::RawCandidate;
use crate::release_parsing::parse_release_title;
use crate::target_locks::TargetLocks;
use crate::tracker::{AcquisitionError, AcquisitionTracker, NewQueueItem};

/// What happened to one candidate handed to [`AcquisitionService::process`].
#[derive(Debug, Clone, Serialize)]
pub struct CandidateOutcome {
    pub title: String,
    pub indexer: String,
    pub target: Option<TargetRef>,
    pub decision: Decision,
    /// Queue item created for this candidate, if it was grabbed.
    pub queue_item_id: Option<QueueItemId>,
    /// In-flight items cancelled in favour of this candidate.
    pub replaced: Vec<QueueItemId>,
    #[serde(skip)]
    pub rank: Option<ReleaseRank>,
}

impl CandidateOutcome {
    fn rejected(candidate: &RawCandidate, target: Option<TargetRef>, rejection: Rejection) -> Self {
        Self {
            title: candidate.title.clone(),
            indexer: candidate.indexer.clone(),
            target,
            decision: Decision::rejected(rejection),
            queue_item_id: None,
            replaced: Vec::new(),
            rank: None,
        }
    }

    pub fn is_queued(&self) -> bool {
        self.queue_item_id.is_some()
    }
}

struct Resolved {
    index: usize,
    candidate: RawCandidate,
    parsed: ParsedRelease,
    target: TargetRef,
}

struct Evaluated {
    resolved: Resolved,
    decision: Decision,
    rank: Option<ReleaseRank>,
    profile: Option<QualityProfile>,
}

impl Evaluated {
    fn into_outcome(self) -> CandidateOutcome {
        CandidateOutcome {
            title: self.resolved.candidate.title,
            indexer: self.resolved.candidate.indexer,
            target: Some(self.resolved.target),
            decision: self.decision,
            queue_item_id: None,
            replaced: Vec::new(),
            rank: self.rank,
        }
    }

    fn superseded(mut self) -> CandidateOutcome {
        self.decision = Decision::rejected(Rejection::fatal(RejectionReason::Superseded));
        self.into_outcome()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Grab,
    EvaluateOnly,
}

struct ServiceInner {
    engine: DecisionEngine,
    profiles: HashMap<String, QualityProfile>,
    library: Arc<dyn LibraryStateProvider>,
    blocklist: Arc<dyn Blocklist>,
    tracker: AcquisitionTracker,
    locks: TargetLocks,
    clock: Arc<dyn Clock>,
    decisions: Arc<Semaphore>,
}

#[derive(Clone)]
pub struct AcquisitionService {
    inner: Arc<ServiceInner>,
}

impl AcquisitionService {
    pub fn new(
        engine: DecisionEngine,
        profiles: Vec<QualityProfile>,
        library: Arc<dyn LibraryStateProvider>,
        blocklist: Arc<dyn Blocklist>,
        tracker: AcquisitionTracker,
        clock: Arc<dyn Clock>,
        max_concurrent_decisions: usize,
    ) -> Self {
        let profiles = profiles
            .into_iter()
            .map(|profile| (profile.name.clone(), profile))
            .collect();
        Self {
            inner: Arc::new(ServiceInner {
                engine,
                profiles,
                library,
                blocklist,
                tracker,
                locks: TargetLocks::new(),
                clock,
                decisions: Arc::new(Semaphore::new(max_concurrent_decisions.max(1))),
            }),
        }
    }

    pub fn tracker(&self) -> &AcquisitionTracker {
        &self.inner.tracker
    }

    pub fn library(&self) -> &Arc<dyn LibraryStateProvider> {
        &self.inner.library
    }

    /// Decide on every candidate and grab the best approved one per target.
    /// With `search_target` set, candidates for other targets are rejected.
    /// Returns one outcome per candidate, in input order.
    #[tracing::instrument(skip_all, fields(count = candidates.len()))]
    pub async fn process(
        &self,
        candidates: Vec<RawCandidate>,
        search_target: Option<&TargetRef>,
    ) -> Vec<CandidateOutcome> {
        self.run(candidates, search_target, Mode::Grab).await
    }

    /// Same evaluation as [`process`](Self::process) without touching the queue.
    pub async fn evaluate(
        &self,
        candidates: Vec<RawCandidate>,
        search_target: Option<&TargetRef>,
    ) -> Vec<CandidateOutcome> {
        self.run(candidates, search_target, Mode::EvaluateOnly).await
    }

    async fn run(
        &self,
        candidates: Vec<RawCandidate>,
        search_target: Option<&TargetRef>,
        mode: Mode,
    ) -> Vec<CandidateOutcome> {
        let total = candidates.len();
        let mut outcomes: Vec<Option<CandidateOutcome>> = (0..total).map(|_| None).collect();
        let mut groups: HashMap<TargetKey, Vec<Resolved>> = HashMap::new();

        for (index, candidate) in candidates.into_iter().enumerate() {
            match self.resolve(&candidate, search_target).await {
                Ok((parsed, target)) => groups.entry(target.key()).or_default().push(Resolved {
                    index,
                    candidate,
                    parsed,
                    target,
                }),
                Err(rejection) => {
                    debug!(
                        target: "acquisition",
                        title = %candidate.title,
                        indexer = %candidate.indexer,
                        reason = %rejection.reason,
                        "candidate dropped before evaluation"
                    );
                    outcomes[index] = Some(CandidateOutcome::rejected(&candidate, None, rejection));
                }
            }
        }

        let mut tasks = JoinSet::new();
        for (key, group) in groups {
            let Ok(permit) = self.inner.decisions.clone().acquire_owned().await else {
                break;
            };
            let this = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                this.decide_group(key, group, mode).await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(results) => {
                    for (index, outcome) in results {
                        outcomes[index] = Some(outcome);
                    }
                }
                Err(err) => warn!(target: "acquisition", error = %err, "decision task panicked"),
            }
        }
        self.inner.locks.prune();

        let outcomes: Vec<CandidateOutcome> = outcomes.into_iter().flatten().collect();
        info!(
            target: "acquisition",
            candidates = total,
            queued = outcomes.iter().filter(|o| o.is_queued()).count(),
            "candidates processed"
        );
        outcomes
    }

    async fn resolve(
        &self,
        candidate: &RawCandidate,
        search_target: Option<&TargetRef>,
    ) -> Result<(ParsedRelease, TargetRef), Rejection> {
        let parsed = parse_release_title(&candidate.title, candidate.protocol, &candidate.hints())?;
        let found = self
            .inner
            .library
            .find_target(&parsed)
            .await
            .map_err(|err| EvaluationError::Library(err.to_string()))?;

        match (found, search_target) {
            (Some(target), Some(wanted)) if !target.overlaps(wanted) => {
                Err(Rejection::fatal(RejectionReason::UnknownTarget))
            }
            (Some(target), _) => Ok((parsed, target)),
            (None, _) => Err(Rejection::fatal(RejectionReason::UnknownTarget)),
        }
    }

    /// Everything for one target key runs under that key's lock, so the
    /// in-flight check and the enqueue cannot interleave with another batch.
    async fn decide_group(
        &self,
        key: TargetKey,
        group: Vec<Resolved>,
        mode: Mode,
    ) -> Vec<(usize, CandidateOutcome)> {
        let _guard = self.inner.locks.acquire(key).await;
        let now = self.inner.clock.now();

        let mut evaluated = Vec::with_capacity(group.len());
        for resolved in group {
            let entry = match self.evaluate_one(&resolved, now).await {
                Ok((decision, profile)) => {
                    let rank = decision
                        .approval()
                        .map(|approval| ReleaseRank::of(&resolved.parsed, approval, &profile));
                    Evaluated {
                        resolved,
                        decision,
                        rank,
                        profile: Some(profile),
                    }
                }
                Err(err) => {
                    warn!(
                        target: "acquisition",
                        title = %resolved.candidate.title,
                        error = %err,
                        "evaluation failed"
                    );
                    Evaluated {
                        resolved,
                        decision: Decision::rejected(err.into()),
                        rank: None,
                        profile: None,
                    }
                }
            };
            evaluated.push(entry);
        }

        // best first; rejected candidates carry no rank and sort last
        evaluated.sort_by(|a, b| b.rank.cmp(&a.rank));

        let mut results = Vec::with_capacity(evaluated.len());
        for entry in evaluated {
            let index = entry.resolved.index;
            let outcome = if mode == Mode::Grab && entry.rank.is_some() {
                self.grab(entry).await
            } else {
                entry.into_outcome()
            };
            results.push((index, outcome));
        }
        results
    }

    async fn evaluate_one(
        &self,
        resolved: &Resolved,
        now: DateTime<Utc>,
    ) -> Result<(Decision, QualityProfile), EvaluationError> {
        let library = &self.inner.library;
        let target = &resolved.target;
        let lib_err = |err: anyhow::Error| EvaluationError::Library(err.to_string());

        let details = library.describe(target).await.map_err(lib_err)?;
        let profile = self
            .inner
            .profiles
            .get(&details.quality_profile)
            .ok_or_else(|| EvaluationError::UnknownProfile(details.quality_profile.clone()))?;
        let existing = library.current_file(target).await.map_err(lib_err)?;
        let monitored = library.is_monitored(target).await.map_err(lib_err)?;
        let blocklisted = self
            .inner
            .blocklist
            .is_blocklisted(&resolved.parsed.title, target)
            .await
            .map_err(|err| EvaluationError::Blocklist(err.to_string()))?;

        let context = LibraryContext {
            existing,
            monitored,
            blocklisted,
            runtime_minutes: details.runtime_minutes,
            episode_count: match target {
                TargetRef::Episodes { episodes, .. } => Some((episodes.len() as u32).max(1)),
                TargetRef::Movie { .. } => None,
            },
        };
        let decision = self
            .inner
            .engine
            .decide(&resolved.parsed, profile, &context, now);
        Ok((decision, profile.clone()))
    }

    async fn grab(&self, entry: Evaluated) -> CandidateOutcome {
        let (Some(rank), Some(profile)) = (entry.rank, entry.profile.clone()) else {
            return entry.into_outcome();
        };
        let (approval, hold_until) = match entry.decision.clone() {
            Decision::Approved(approval) => (approval, None),
            Decision::Deferred { approval, until } => (approval, Some(until)),
            Decision::Rejected { .. } => return entry.into_outcome(),
        };
        let tracker = &self.inner.tracker;
        let target = &entry.resolved.target;

        let live = tracker.live_items_overlapping(target).await;
        let replaceable = live
            .iter()
            .all(|item| item.state.is_cancellable() && rank.replaces(&in_flight_rank(item, &profile)));
        if !replaceable {
            debug!(
                target: "acquisition",
                title = %entry.resolved.candidate.title,
                target_ref = %target,
                "in-flight release is at least as good"
            );
            return entry.superseded();
        }

        let mut replaced = Vec::new();
        for item in &live {
            if tracker.cancel(item.id).await {
                info!(
                    target: "acquisition",
                    replaced = %item.id,
                    old = %item.release.title,
                    new = %entry.resolved.candidate.title,
                    "replacing in-flight release"
                );
                replaced.push(item.id);
            }
        }

        let new_item = NewQueueItem {
            target: target.clone(),
            release: entry.resolved.parsed.clone(),
            download_url: entry.resolved.candidate.download_url.clone(),
            approval,
            hold_until,
        };
        match tracker.enqueue(new_item).await {
            Ok(id) => {
                let mut outcome = entry.into_outcome();
                outcome.queue_item_id = Some(id);
                outcome.replaced = replaced;
                outcome
            }
            Err(AcquisitionError::Superseded(existing)) => {
                debug!(target: "acquisition", %existing, "target claimed by another queue item");
                entry.superseded()
            }
            Err(err) => {
                warn!(target: "acquisition", error = %err, "enqueue failed");
                entry.superseded()
            }
        }
    }
}

fn in_flight_rank(item: &QueueItem, profile: &QualityProfile) -> ReleaseRank {
    ReleaseRank::new(
        item.quality,
        item.custom_format_score,
        item.release.revision(),
        item.protocol,
        item.size_bytes,
        profile,
    )
}
