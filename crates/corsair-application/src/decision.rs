// SPDX-License-Identifier: GPL-3.0-or-later
//! Accept/reject decisions for a single parsed release.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use corsair_domain::{
    DelayProfile, ExistingFile, Language, ParsedRelease, Protocol, Quality, QualityProfile,
    Revision,
};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::custom_formats::CustomFormatEngine;
use crate::quality::{self, QualityCatalog, SizeCheck};
use crate::release_parsing::ParseFailure;

/// Weight applied to the profile rank so quality always dominates format score.
const QUALITY_WEIGHT: i64 = 10_000;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("unknown quality profile '{0}'")]
    UnknownProfile(String),
    #[error("library lookup failed: {0}")]
    Library(String),
    #[error("blocklist lookup failed: {0}")]
    Blocklist(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    Unparseable { message: String },
    UnknownTarget,
    Unmonitored,
    Blocklisted,
    BelowMinimumAge { minutes: i64, required: u32 },
    RetentionExceeded { days: i64, retention: u32 },
    QualityNotAllowed { quality: Quality },
    SizeOutOfBounds { size_mb: f64, bound_mb: f64 },
    ProtocolDisabled { protocol: Protocol },
    NoDownloadClient { protocol: Protocol },
    LanguageNotWanted,
    BelowMinimumFormatScore { score: i32, minimum: i32 },
    CutoffMet,
    NotAnUpgrade,
    Superseded,
    EvaluationFailed { message: String },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unparseable { message } => write!(f, "unparseable title: {}", message),
            Self::UnknownTarget => write!(f, "no matching library target"),
            Self::Unmonitored => write!(f, "target is not monitored"),
            Self::Blocklisted => write!(f, "release is blocklisted"),
            Self::BelowMinimumAge { minutes, required } => write!(
                f,
                "release is {} minutes old, minimum age is {}",
                minutes, required
            ),
            Self::RetentionExceeded { days, retention } => write!(
                f,
                "release is {} days old, retention is {}",
                days, retention
            ),
            Self::QualityNotAllowed { quality } => {
                write!(f, "quality {} is not wanted in profile", quality)
            }
            Self::SizeOutOfBounds { size_mb, bound_mb } => write!(
                f,
                "size {:.0} MB is outside the allowed bound of {:.0} MB",
                size_mb, bound_mb
            ),
            Self::ProtocolDisabled { protocol } => write!(f, "{} is disabled", protocol),
            Self::NoDownloadClient { protocol } => {
                write!(f, "no download client available for {}", protocol)
            }
            Self::LanguageNotWanted => write!(f, "language is not wanted in profile"),
            Self::BelowMinimumFormatScore { score, minimum } => write!(
                f,
                "custom format score {} is below minimum {}",
                score, minimum
            ),
            Self::CutoffMet => write!(f, "cutoff already met"),
            Self::NotAnUpgrade => write!(f, "not an upgrade"),
            Self::Superseded => write!(f, "superseded"),
            Self::EvaluationFailed { message } => write!(f, "evaluation error: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub fatal: bool,
}

impl Rejection {
    pub fn fatal(reason: RejectionReason) -> Self {
        Self {
            reason,
            fatal: true,
        }
    }

    pub fn temporary(reason: RejectionReason) -> Self {
        Self {
            reason,
            fatal: false,
        }
    }
}

impl From<ParseFailure> for Rejection {
    fn from(failure: ParseFailure) -> Self {
        Self::fatal(RejectionReason::Unparseable {
            message: failure.to_string(),
        })
    }
}

impl From<EvaluationError> for Rejection {
    fn from(error: EvaluationError) -> Self {
        Self::fatal(RejectionReason::EvaluationFailed {
            message: error.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Approval {
    pub quality: Quality,
    pub custom_format_score: i32,
    pub score: i64,
    pub matched_formats: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    Approved(Approval),
    /// Approved, but held by the protocol delay until `until`.
    Deferred {
        approval: Approval,
        until: DateTime<Utc>,
    },
    Rejected { reasons: Vec<Rejection> },
}

impl Decision {
    pub fn rejected(rejection: Rejection) -> Self {
        Self::Rejected {
            reasons: vec![rejection],
        }
    }

    pub fn approval(&self) -> Option<&Approval> {
        match self {
            Self::Approved(approval) | Self::Deferred { approval, .. } => Some(approval),
            Self::Rejected { .. } => None,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved(_))
    }

    pub fn reasons(&self) -> &[Rejection] {
        match self {
            Self::Rejected { reasons } => reasons,
            _ => &[],
        }
    }
}

/// Library facts about the target the release is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct LibraryContext {
    pub existing: Option<ExistingFile>,
    pub monitored: bool,
    pub blocklisted: bool,
    pub runtime_minutes: Option<u32>,
    /// Episodes the resolved target covers. A season pack parses with no
    /// episode numbers, so this overrides the parsed count when set.
    pub episode_count: Option<u32>,
}

/// Settings that apply to every decision regardless of target.
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    pub delay_profile: DelayProfile,
    /// Usenet only; 0 disables.
    pub minimum_age_minutes: u32,
    /// Usenet only; 0 disables.
    pub retention_days: u32,
    /// Protocols that have at least one enabled download client.
    pub available_protocols: Vec<Protocol>,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            delay_profile: DelayProfile::default(),
            minimum_age_minutes: 0,
            retention_days: 0,
            available_protocols: vec![Protocol::Usenet, Protocol::Torrent],
        }
    }
}

pub struct DecisionEngine {
    catalog: QualityCatalog,
    formats: CustomFormatEngine,
    policy: DecisionPolicy,
}

impl DecisionEngine {
    pub fn new(catalog: QualityCatalog, formats: CustomFormatEngine, policy: DecisionPolicy) -> Self {
        Self {
            catalog,
            formats,
            policy,
        }
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    /// Evaluate a release. Non-fatal rejections are collected and evaluation
    /// continues; the first fatal rejection ends it.
    pub fn decide(
        &self,
        parsed: &ParsedRelease,
        profile: &QualityProfile,
        library: &LibraryContext,
        now: DateTime<Utc>,
    ) -> Decision {
        let mut reasons = Vec::new();
        let decision = self.evaluate(parsed, profile, library, now, &mut reasons);
        debug!(
            target: "decision",
            title = %parsed.title,
            quality = %parsed.quality,
            outcome = match &decision {
                Decision::Approved(_) => "approved",
                Decision::Deferred { .. } => "deferred",
                Decision::Rejected { .. } => "rejected",
            },
            reasons = ?decision.reasons().iter().map(|r| r.reason.to_string()).collect::<Vec<_>>(),
            "release evaluated"
        );
        decision
    }

    fn evaluate(
        &self,
        parsed: &ParsedRelease,
        profile: &QualityProfile,
        library: &LibraryContext,
        now: DateTime<Utc>,
        reasons: &mut Vec<Rejection>,
    ) -> Decision {
        macro_rules! reject {
            ($rejection:expr) => {{
                let rejection = $rejection;
                let fatal = rejection.fatal;
                reasons.push(rejection);
                if fatal {
                    return Decision::Rejected {
                        reasons: std::mem::take(reasons),
                    };
                }
            }};
        }

        if !library.monitored {
            reject!(Rejection::fatal(RejectionReason::Unmonitored));
        }
        if library.blocklisted {
            reject!(Rejection::fatal(RejectionReason::Blocklisted));
        }

        let published = parsed.published_at.unwrap_or(now);
        let age = now - published;
        if parsed.protocol == Protocol::Usenet {
            let min_age = self.policy.minimum_age_minutes;
            if min_age > 0 && age < Duration::minutes(i64::from(min_age)) {
                reject!(Rejection::temporary(RejectionReason::BelowMinimumAge {
                    minutes: age.num_minutes(),
                    required: min_age,
                }));
            }
            let retention = self.policy.retention_days;
            if retention > 0 && age > Duration::days(i64::from(retention)) {
                reject!(Rejection::fatal(RejectionReason::RetentionExceeded {
                    days: age.num_days(),
                    retention,
                }));
            }
        }

        // 1. quality allowed
        let Some(rank) = quality::profile_rank(parsed.quality, profile) else {
            reasons.push(Rejection::fatal(RejectionReason::QualityNotAllowed {
                quality: parsed.quality,
            }));
            return Decision::Rejected {
                reasons: std::mem::take(reasons),
            };
        };

        // 2. size plausibility
        match self.catalog.check_size(
            parsed.quality,
            parsed.size_bytes,
            library.runtime_minutes,
            library
                .episode_count
                .unwrap_or_else(|| parsed.episode_count()),
        ) {
            SizeCheck::TooSmall { size_mb, min_mb } => {
                reject!(Rejection::fatal(RejectionReason::SizeOutOfBounds {
                    size_mb,
                    bound_mb: min_mb,
                }))
            }
            SizeCheck::TooLarge { size_mb, max_mb } => {
                reject!(Rejection::fatal(RejectionReason::SizeOutOfBounds {
                    size_mb,
                    bound_mb: max_mb,
                }))
            }
            SizeCheck::Acceptable | SizeCheck::Skipped => {}
        }

        // 3. protocol policy; the delay window itself is applied once the
        // format score is known because it can bypass the delay
        let delay = &self.policy.delay_profile;
        if !delay.is_enabled(parsed.protocol) {
            reject!(Rejection::fatal(RejectionReason::ProtocolDisabled {
                protocol: parsed.protocol,
            }));
        }
        if !self.policy.available_protocols.contains(&parsed.protocol) {
            reject!(Rejection::fatal(RejectionReason::NoDownloadClient {
                protocol: parsed.protocol,
            }));
        }

        // 4. languages
        if !profile.required_languages.is_empty() && !languages_match(parsed, profile) {
            reject!(Rejection::fatal(RejectionReason::LanguageNotWanted));
        }

        // 5. custom formats
        let formats = self.formats.evaluate(parsed);

        // 6. minimum format score
        if formats.score < profile.min_format_score {
            reject!(Rejection::fatal(RejectionReason::BelowMinimumFormatScore {
                score: formats.score,
                minimum: profile.min_format_score,
            }));
        }

        // 7. upgrade over the existing file
        if let Some(existing) = library.existing {
            if let Some(reason) = upgrade_rejection(parsed, formats.score, &existing, profile) {
                reject!(Rejection::fatal(reason));
            }
        }

        if !reasons.is_empty() {
            return Decision::Rejected {
                reasons: std::mem::take(reasons),
            };
        }

        // 8. approve
        let approval = Approval {
            quality: parsed.quality,
            custom_format_score: formats.score,
            score: (rank as i64 + 1) * QUALITY_WEIGHT + i64::from(formats.score),
            matched_formats: formats.matched,
        };

        let delay_minutes = delay.delay_minutes(parsed.protocol);
        if delay_minutes > 0 {
            let until = published + Duration::minutes(i64::from(delay_minutes));
            let bypass = (delay.bypass_if_highest_quality
                && quality::is_above_cutoff(parsed.quality, profile))
                || delay
                    .bypass_if_above_custom_format_score
                    .is_some_and(|threshold| formats.score >= threshold);
            if now < until && !bypass {
                return Decision::Deferred { approval, until };
            }
        }

        Decision::Approved(approval)
    }
}

fn languages_match(parsed: &ParsedRelease, profile: &QualityProfile) -> bool {
    // untagged releases are assumed to be English
    let untagged = parsed.languages.iter().all(|l| *l == Language::Unknown);
    if untagged {
        return profile.required_languages.contains(&Language::English);
    }
    parsed
        .languages
        .iter()
        .any(|language| profile.required_languages.contains(language))
}

fn cutoff_met(existing: &ExistingFile, profile: &QualityProfile) -> bool {
    quality::is_above_cutoff(existing.quality, profile)
        && existing.custom_format_score >= profile.cutoff_format_score
}

fn upgrade_rejection(
    parsed: &ParsedRelease,
    custom_format_score: i32,
    existing: &ExistingFile,
    profile: &QualityProfile,
) -> Option<RejectionReason> {
    if !profile.upgrade_allowed {
        return Some(RejectionReason::NotAnUpgrade);
    }
    if cutoff_met(existing, profile) {
        return Some(RejectionReason::CutoffMet);
    }

    // below the cutoff an equal release still has to improve on something,
    // otherwise the same file would be grabbed again on every sync
    let improves = match quality::compare(parsed.quality, existing.quality, profile) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => {
            parsed.revision() > existing.revision
                || custom_format_score > existing.custom_format_score
        }
    };
    (!improves).then_some(RejectionReason::NotAnUpgrade)
}

/// Sort key for approved candidates of one target, best first when sorted
/// descending: quality, format score, protocol preference, revision, size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReleaseRank {
    pub quality_rank: Option<usize>,
    pub custom_format_score: i32,
    pub preferred_protocol: bool,
    pub revision: Revision,
    pub size_bytes: u64,
}

impl ReleaseRank {
    pub fn new(
        quality: Quality,
        custom_format_score: i32,
        revision: Revision,
        protocol: Protocol,
        size_bytes: u64,
        profile: &QualityProfile,
    ) -> Self {
        Self {
            quality_rank: quality::profile_rank(quality, profile),
            custom_format_score,
            revision,
            preferred_protocol: profile.preferred_protocol == Some(protocol),
            size_bytes,
        }
    }

    pub fn of(parsed: &ParsedRelease, approval: &Approval, profile: &QualityProfile) -> Self {
        Self::new(
            approval.quality,
            approval.custom_format_score,
            parsed.revision(),
            parsed.protocol,
            parsed.size_bytes,
            profile,
        )
    }

    /// Whether this release is worth cancelling an in-flight one for. Only
    /// quality, format score and revision count; protocol and size do not.
    pub fn replaces(&self, in_flight: &ReleaseRank) -> bool {
        (self.quality_rank, self.custom_format_score, self.revision)
            > (
                in_flight.quality_rank,
                in_flight.custom_format_score,
                in_flight.revision,
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release_parsing::{parse_release_title, IndexerHints};
    use corsair_domain::{CustomFormat, CustomFormatSpecification, SpecificationKind};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn profile() -> QualityProfile {
        let mut profile = QualityProfile::new(
            "HD",
            vec![
                Quality::Hdtv720p,
                Quality::WebDl720p,
                Quality::Hdtv1080p,
                Quality::WebDl1080p,
                Quality::Bluray1080p,
                Quality::WebDl2160p,
            ],
        );
        profile.cutoff = Quality::Bluray1080p;
        profile
    }

    fn engine(policy: DecisionPolicy) -> DecisionEngine {
        let formats = CustomFormatEngine::new(&[CustomFormat {
            name: "x265".into(),
            score: 100,
            specifications: vec![CustomFormatSpecification {
                name: "x265".into(),
                negate: false,
                required: false,
                kind: SpecificationKind::ReleaseTitle {
                    pattern: "x265".into(),
                },
            }],
        }])
        .unwrap();
        DecisionEngine::new(QualityCatalog::default(), formats, policy)
    }

    fn parse(title: &str, protocol: Protocol) -> ParsedRelease {
        parse_release_title(
            title,
            protocol,
            &IndexerHints {
                size_bytes: Some(2 * 1024 * 1024 * 1024),
                published_at: Some(now() - Duration::hours(2)),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn monitored() -> LibraryContext {
        LibraryContext {
            monitored: true,
            runtime_minutes: Some(45),
            ..Default::default()
        }
    }

    fn with_existing(quality: Quality, score: i32) -> LibraryContext {
        LibraryContext {
            existing: Some(ExistingFile {
                quality,
                custom_format_score: score,
                revision: Revision::default(),
            }),
            ..monitored()
        }
    }

    fn reasons(decision: &Decision) -> Vec<String> {
        decision
            .reasons()
            .iter()
            .map(|r| r.reason.to_string())
            .collect()
    }

    #[test]
    fn approves_wanted_release_with_weighted_score() {
        let engine = engine(DecisionPolicy::default());
        let decision = engine.decide(
            &parse("Show.S01E01.1080p.WEB-DL.x265-GRP", Protocol::Torrent),
            &profile(),
            &monitored(),
            now(),
        );
        let approval = decision.approval().unwrap();
        assert!(decision.is_approved());
        assert_eq!(approval.quality, Quality::WebDl1080p);
        assert_eq!(approval.custom_format_score, 100);
        assert_eq!(approval.score, 4 * QUALITY_WEIGHT + 100);
        assert_eq!(approval.matched_formats, vec!["x265".to_string()]);
    }

    #[test]
    fn upgrade_disabled_rejects_higher_quality() {
        let engine = engine(DecisionPolicy::default());
        let mut profile = profile();
        profile.upgrade_allowed = false;

        let decision = engine.decide(
            &parse("Show.S01E01.2160p.WEB-DL.x264-GRP", Protocol::Torrent),
            &profile,
            &with_existing(Quality::WebDl1080p, 0),
            now(),
        );
        assert_eq!(reasons(&decision), vec!["not an upgrade".to_string()]);
        assert!(decision.reasons()[0].fatal);
    }

    #[test]
    fn unmonitored_short_circuits_everything() {
        let engine = engine(DecisionPolicy::default());
        let decision = engine.decide(
            &parse("Show.S01E01.480p.DVD-GRP", Protocol::Torrent),
            &profile(),
            &LibraryContext::default(),
            now(),
        );
        assert_eq!(decision.reasons().len(), 1);
        assert_eq!(decision.reasons()[0].reason, RejectionReason::Unmonitored);
    }

    #[test]
    fn quality_outside_profile_is_fatal() {
        let engine = engine(DecisionPolicy::default());
        let decision = engine.decide(
            &parse("Show.S01E01.480p.DVD-GRP", Protocol::Torrent),
            &profile(),
            &monitored(),
            now(),
        );
        assert_eq!(
            decision.reasons()[0].reason,
            RejectionReason::QualityNotAllowed {
                quality: Quality::Dvd
            }
        );
    }

    #[test]
    fn season_pack_size_scales_with_target_episodes() {
        let engine = engine(DecisionPolicy::default());
        let mut parsed = parse("Show.S02.1080p.WEB-DL.x264-GRP", Protocol::Torrent);
        parsed.size_bytes = 8 * 1024 * 1024 * 1024;
        assert!(parsed.full_season);

        let single = engine.decide(&parsed, &profile(), &monitored(), now());
        assert!(matches!(
            single.reasons()[0].reason,
            RejectionReason::SizeOutOfBounds { .. }
        ));

        let whole_season = LibraryContext {
            episode_count: Some(2),
            ..monitored()
        };
        assert!(engine
            .decide(&parsed, &profile(), &whole_season, now())
            .is_approved());
    }

    #[test]
    fn implausible_size_is_rejected() {
        let engine = engine(DecisionPolicy::default());
        let mut parsed = parse("Show.S01E01.1080p.WEB-DL-GRP", Protocol::Torrent);
        parsed.size_bytes = 50 * 1024 * 1024;
        let decision = engine.decide(&parsed, &profile(), &monitored(), now());
        assert!(matches!(
            decision.reasons()[0].reason,
            RejectionReason::SizeOutOfBounds { .. }
        ));
    }

    #[test]
    fn higher_quality_upgrades_existing_file() {
        let engine = engine(DecisionPolicy::default());
        let decision = engine.decide(
            &parse("Show.S01E01.1080p.WEB-DL-GRP", Protocol::Torrent),
            &profile(),
            &with_existing(Quality::Hdtv720p, 0),
            now(),
        );
        assert!(decision.is_approved());
    }

    #[test]
    fn identical_release_below_cutoff_is_not_regrabbed() {
        let engine = engine(DecisionPolicy::default());
        let existing = with_existing(Quality::WebDl1080p, 0);
        assert!(!quality::is_above_cutoff(Quality::WebDl1080p, &profile()));

        let same = engine.decide(
            &parse("Show.S01E01.1080p.WEB-DL-GRP", Protocol::Torrent),
            &profile(),
            &existing,
            now(),
        );
        assert_eq!(reasons(&same), vec!["not an upgrade".to_string()]);
    }

    #[test]
    fn same_quality_needs_better_format_score_or_revision() {
        let engine = engine(DecisionPolicy::default());
        let existing = with_existing(Quality::WebDl1080p, 0);

        let better_format = engine.decide(
            &parse("Show.S01E01.1080p.WEB-DL.x265-GRP", Protocol::Torrent),
            &profile(),
            &existing,
            now(),
        );
        assert!(better_format.is_approved());

        let proper = engine.decide(
            &parse("Show.S01E01.PROPER.1080p.WEB-DL-GRP", Protocol::Torrent),
            &profile(),
            &existing,
            now(),
        );
        assert!(proper.is_approved());
    }

    #[test]
    fn lower_quality_is_not_an_upgrade() {
        let engine = engine(DecisionPolicy::default());
        let decision = engine.decide(
            &parse("Show.S01E01.720p.HDTV-GRP", Protocol::Torrent),
            &profile(),
            &with_existing(Quality::WebDl1080p, 0),
            now(),
        );
        assert_eq!(reasons(&decision), vec!["not an upgrade".to_string()]);
    }

    #[test]
    fn existing_file_at_cutoff_stops_upgrades() {
        let engine = engine(DecisionPolicy::default());
        let decision = engine.decide(
            &parse("Show.S01E01.2160p.WEB-DL-GRP", Protocol::Torrent),
            &profile(),
            &with_existing(Quality::Bluray1080p, 0),
            now(),
        );
        assert_eq!(reasons(&decision), vec!["cutoff already met".to_string()]);
    }

    #[test]
    fn approved_upgrades_never_lower_quality() {
        let engine = engine(DecisionPolicy::default());
        let profile = profile();
        let titles = [
            "Show.S01E01.720p.HDTV-GRP",
            "Show.S01E01.720p.WEB-DL.x265-GRP",
            "Show.S01E01.1080p.HDTV-GRP",
            "Show.S01E01.1080p.WEB-DL-GRP",
            "Show.S01E01.1080p.WEB-DL.x265-GRP",
        ];
        for existing in [Quality::Hdtv720p, Quality::WebDl720p, Quality::WebDl1080p] {
            for cf in [0, 100] {
                let library = with_existing(existing, cf);
                for title in titles {
                    let parsed = parse(title, Protocol::Torrent);
                    if let Decision::Approved(approval) =
                        engine.decide(&parsed, &profile, &library, now())
                    {
                        let order = quality::compare(approval.quality, existing, &profile);
                        assert!(
                            order == Ordering::Greater
                                || (order == Ordering::Equal
                                    && approval.custom_format_score > cf),
                            "{} should not replace {} ({})",
                            title,
                            existing,
                            cf
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn minimum_format_score_is_enforced() {
        let engine = engine(DecisionPolicy::default());
        let mut profile = profile();
        profile.min_format_score = 50;
        let decision = engine.decide(
            &parse("Show.S01E01.1080p.WEB-DL.x264-GRP", Protocol::Torrent),
            &profile,
            &monitored(),
            now(),
        );
        assert!(matches!(
            decision.reasons()[0].reason,
            RejectionReason::BelowMinimumFormatScore { score: 0, minimum: 50 }
        ));
    }

    #[test]
    fn required_language_treats_untagged_as_english() {
        let engine = engine(DecisionPolicy::default());
        let mut profile = profile();
        profile.required_languages = vec![Language::English];

        let untagged = engine.decide(
            &parse("Show.S01E01.1080p.WEB-DL-GRP", Protocol::Torrent),
            &profile,
            &monitored(),
            now(),
        );
        assert!(untagged.is_approved());

        let german = engine.decide(
            &parse("Show.S01E01.GERMAN.1080p.WEB-DL-GRP", Protocol::Torrent),
            &profile,
            &monitored(),
            now(),
        );
        assert_eq!(german.reasons()[0].reason, RejectionReason::LanguageNotWanted);
    }

    #[test]
    fn delay_window_defers_until_publish_plus_delay() {
        let engine = engine(DecisionPolicy {
            delay_profile: DelayProfile {
                usenet_delay_minutes: 0,
                torrent_delay_minutes: 180,
                ..DelayProfile::default()
            },
            ..DecisionPolicy::default()
        });

        let decision = engine.decide(
            &parse("Show.S01E01.720p.HDTV-GRP", Protocol::Torrent),
            &profile(),
            &monitored(),
            now(),
        );
        match decision {
            Decision::Deferred { until, .. } => assert_eq!(until, now() + Duration::hours(1)),
            other => panic!("expected deferral, got {:?}", other),
        }

        let usenet = engine.decide(
            &parse("Show.S01E01.720p.HDTV-GRP", Protocol::Usenet),
            &profile(),
            &monitored(),
            now(),
        );
        assert!(usenet.is_approved());
    }

    #[test]
    fn delay_is_bypassed_at_profile_cutoff() {
        let engine = engine(DecisionPolicy {
            delay_profile: DelayProfile {
                torrent_delay_minutes: 180,
                bypass_if_highest_quality: true,
                ..DelayProfile::default()
            },
            ..DecisionPolicy::default()
        });
        let decision = engine.decide(
            &parse("Show.S01E01.1080p.BluRay.x264-GRP", Protocol::Torrent),
            &profile(),
            &monitored(),
            now(),
        );
        assert!(decision.is_approved());
    }

    #[test]
    fn delay_is_bypassed_by_format_score() {
        let engine = engine(DecisionPolicy {
            delay_profile: DelayProfile {
                torrent_delay_minutes: 180,
                bypass_if_highest_quality: false,
                bypass_if_above_custom_format_score: Some(100),
                ..DelayProfile::default()
            },
            ..DecisionPolicy::default()
        });
        let decision = engine.decide(
            &parse("Show.S01E01.720p.HDTV.x265-GRP", Protocol::Torrent),
            &profile(),
            &monitored(),
            now(),
        );
        assert!(decision.is_approved());
    }

    #[test]
    fn disabled_protocol_and_missing_client_are_fatal() {
        let engine = engine(DecisionPolicy {
            delay_profile: DelayProfile {
                enable_usenet: false,
                ..DelayProfile::default()
            },
            available_protocols: vec![Protocol::Usenet],
            ..DecisionPolicy::default()
        });
        let usenet = engine.decide(
            &parse("Show.S01E01.720p.HDTV-GRP", Protocol::Usenet),
            &profile(),
            &monitored(),
            now(),
        );
        assert_eq!(
            usenet.reasons()[0].reason,
            RejectionReason::ProtocolDisabled {
                protocol: Protocol::Usenet
            }
        );

        let torrent = engine.decide(
            &parse("Show.S01E01.720p.HDTV-GRP", Protocol::Torrent),
            &profile(),
            &monitored(),
            now(),
        );
        assert_eq!(
            torrent.reasons()[0].reason,
            RejectionReason::NoDownloadClient {
                protocol: Protocol::Torrent
            }
        );
    }

    #[test]
    fn minimum_age_is_recorded_but_not_fatal() {
        let engine = engine(DecisionPolicy {
            minimum_age_minutes: 600,
            ..DecisionPolicy::default()
        });
        let decision = engine.decide(
            &parse("Show.S01E01.480p.DVD-GRP", Protocol::Usenet),
            &profile(),
            &monitored(),
            now(),
        );
        let reasons = decision.reasons();
        assert_eq!(reasons.len(), 2);
        assert!(!reasons[0].fatal);
        assert!(matches!(reasons[0].reason, RejectionReason::BelowMinimumAge { .. }));
        assert!(reasons[1].fatal);
    }

    #[test]
    fn retention_only_applies_to_usenet() {
        let engine = engine(DecisionPolicy {
            retention_days: 1,
            ..DecisionPolicy::default()
        });
        let mut parsed = parse("Show.S01E01.720p.HDTV-GRP", Protocol::Usenet);
        parsed.published_at = Some(now() - Duration::days(3));
        let usenet = engine.decide(&parsed, &profile(), &monitored(), now());
        assert!(matches!(
            usenet.reasons()[0].reason,
            RejectionReason::RetentionExceeded { .. }
        ));

        parsed.protocol = Protocol::Torrent;
        assert!(engine.decide(&parsed, &profile(), &monitored(), now()).is_approved());
    }

    #[test]
    fn parse_failures_become_fatal_rejections() {
        let failure = parse_release_title("###garbage###", Protocol::Torrent, &IndexerHints::default())
            .unwrap_err();
        let rejection = Rejection::from(failure);
        assert!(rejection.fatal);
        assert!(rejection.reason.to_string().starts_with("unparseable title"));
    }

    #[test]
    fn rank_orders_quality_then_score_then_protocol_then_size() {
        let mut profile = profile();
        profile.preferred_protocol = Some(Protocol::Usenet);
        let base = ReleaseRank::new(
            Quality::WebDl1080p,
            0,
            Revision::default(),
            Protocol::Torrent,
            1,
            &profile,
        );
        let better_quality = ReleaseRank {
            quality_rank: quality::profile_rank(Quality::Bluray1080p, &profile),
            ..base
        };
        let better_score = ReleaseRank {
            custom_format_score: 10,
            ..base
        };
        let preferred = ReleaseRank {
            preferred_protocol: true,
            ..base
        };
        let repacked = ReleaseRank {
            revision: Revision {
                version: 2,
                real: 0,
            },
            ..base
        };
        let larger = ReleaseRank {
            size_bytes: 2,
            ..base
        };

        assert!(better_quality > better_score);
        assert!(better_score > preferred);
        assert!(preferred > repacked);
        assert!(repacked > larger);
        assert!(larger > base);
        assert!(repacked.replaces(&base));

        assert!(better_score.replaces(&base));
        assert!(!preferred.replaces(&base));
        assert!(!larger.replaces(&base));
    }
}
