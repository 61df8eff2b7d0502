// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Value Objects & IDs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesId(pub Uuid);

impl SeriesId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SeriesId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SeriesId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MovieId(pub Uuid);

impl MovieId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for MovieId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MovieId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueItemId(pub Uuid);

impl QueueItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Library entity a release is evaluated against.
///
/// Episode sets are kept sorted and free of duplicates so two references to
/// the same episodes compare equal regardless of how they were built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TargetRef {
    Episodes {
        series_id: SeriesId,
        season: u32,
        episodes: Vec<u32>,
    },
    Movie {
        movie_id: MovieId,
    },
}

/// Key used to serialize decisions; every episode of a season shares one key
/// so overlapping multi-episode releases cannot race each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKey {
    Season { series_id: SeriesId, season: u32 },
    Movie(MovieId),
}

impl TargetRef {
    pub fn episodes(series_id: SeriesId, season: u32, episodes: impl IntoIterator<Item = u32>) -> Self {
        let mut episodes: Vec<u32> = episodes.into_iter().collect();
        episodes.sort_unstable();
        episodes.dedup();
        Self::Episodes {
            series_id,
            season,
            episodes,
        }
    }

    pub fn movie(movie_id: MovieId) -> Self {
        Self::Movie { movie_id }
    }

    pub fn key(&self) -> TargetKey {
        match self {
            Self::Episodes {
                series_id, season, ..
            } => TargetKey::Season {
                series_id: *series_id,
                season: *season,
            },
            Self::Movie { movie_id } => TargetKey::Movie(*movie_id),
        }
    }

    /// Two targets overlap when they reference at least one common episode
    /// (or the same movie).
    pub fn overlaps(&self, other: &TargetRef) -> bool {
        match (self, other) {
            (
                Self::Episodes {
                    series_id: a_series,
                    season: a_season,
                    episodes: a_episodes,
                },
                Self::Episodes {
                    series_id: b_series,
                    season: b_season,
                    episodes: b_episodes,
                },
            ) => {
                a_series == b_series
                    && a_season == b_season
                    && a_episodes.iter().any(|ep| b_episodes.contains(ep))
            }
            (Self::Movie { movie_id: a }, Self::Movie { movie_id: b }) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for TargetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Episodes {
                series_id,
                season,
                episodes,
            } => {
                write!(f, "series {} S{:02}", series_id, season)?;
                for episode in episodes {
                    write!(f, "E{:02}", episode)?;
                }
                Ok(())
            }
            Self::Movie { movie_id } => write!(f, "movie {}", movie_id),
        }
    }
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Series,
    Movie,
    Anime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Usenet,
    Torrent,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usenet => "usenet",
            Self::Torrent => "torrent",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "576p")]
    P576,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "2160p")]
    P2160,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Unknown,
    Tv,
    Web,
    WebRip,
    Dvd,
    Bluray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityModifier {
    Remux,
    BlurayRaw,
    RawHd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    X264,
    X265,
    H264,
    H265,
    Av1,
    Xvid,
    Vp9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Unknown,
    English,
    French,
    German,
    Spanish,
    Italian,
    Portuguese,
    Dutch,
    Swedish,
    Norwegian,
    Danish,
    Finnish,
    Polish,
    Russian,
    Turkish,
    Arabic,
    Hindi,
    Japanese,
    Korean,
    Chinese,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexerFlag {
    Freeleech,
    Halfleech,
    DoubleUpload,
    Internal,
    Scene,
}

// ============================================================================
// Parsed Release
// ============================================================================

/// Proper/repack/real markers found in a release title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReleaseFlags {
    pub proper: bool,
    pub repack: bool,
    pub real_count: u32,
    /// Explicit `v2`/`v3` suffix used by anime groups; 0 when absent.
    pub version: u32,
}

impl ReleaseFlags {
    pub fn revision(&self) -> Revision {
        let bump = u32::from(self.proper || self.repack);
        Revision {
            version: self.version.max(1) + bump,
            real: self.real_count,
        }
    }
}

/// Comparable revision of a release: version first, then REAL count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision {
    pub version: u32,
    pub real: u32,
}

impl Default for Revision {
    fn default() -> Self {
        Self {
            version: 1,
            real: 0,
        }
    }
}

/// Structured view of a raw release title plus the metadata the indexer
/// supplied alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRelease {
    pub title: String,
    pub series_title: Option<String>,
    pub content_type: ContentType,
    pub season: Option<u32>,
    pub episodes: Vec<u32>,
    pub absolute_episodes: Vec<u32>,
    pub air_date: Option<NaiveDate>,
    pub year: Option<u16>,
    pub full_season: bool,
    pub resolution: Resolution,
    pub source: Source,
    pub modifier: Option<QualityModifier>,
    pub quality: Quality,
    pub codec: Option<Codec>,
    pub release_group: Option<String>,
    pub languages: Vec<Language>,
    pub flags: ReleaseFlags,
    pub size_bytes: u64,
    pub protocol: Protocol,
    pub indexer: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub indexer_flags: Vec<IndexerFlag>,
}

impl ParsedRelease {
    pub fn revision(&self) -> Revision {
        self.flags.revision()
    }

    /// Number of episodes the release covers, used to scale size bounds.
    pub fn episode_count(&self) -> u32 {
        let explicit = self.episodes.len().max(self.absolute_episodes.len());
        (explicit as u32).max(1)
    }
}

// ============================================================================
// Quality Catalog
// ============================================================================

/// Every quality the system knows about, in global default rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "Unknown")]
    Unknown,
    #[serde(rename = "SDTV")]
    Sdtv,
    #[serde(rename = "WEBRip-480p")]
    WebRip480p,
    #[serde(rename = "WEBDL-480p")]
    WebDl480p,
    #[serde(rename = "DVD")]
    Dvd,
    #[serde(rename = "Bluray-480p")]
    Bluray480p,
    #[serde(rename = "Bluray-576p")]
    Bluray576p,
    #[serde(rename = "HDTV-720p")]
    Hdtv720p,
    #[serde(rename = "HDTV-1080p")]
    Hdtv1080p,
    #[serde(rename = "Raw-HD")]
    RawHd,
    #[serde(rename = "WEBRip-720p")]
    WebRip720p,
    #[serde(rename = "WEBDL-720p")]
    WebDl720p,
    #[serde(rename = "Bluray-720p")]
    Bluray720p,
    #[serde(rename = "WEBRip-1080p")]
    WebRip1080p,
    #[serde(rename = "WEBDL-1080p")]
    WebDl1080p,
    #[serde(rename = "Bluray-1080p")]
    Bluray1080p,
    #[serde(rename = "Bluray-1080p Remux")]
    Remux1080p,
    #[serde(rename = "HDTV-2160p")]
    Hdtv2160p,
    #[serde(rename = "WEBRip-2160p")]
    WebRip2160p,
    #[serde(rename = "WEBDL-2160p")]
    WebDl2160p,
    #[serde(rename = "Bluray-2160p")]
    Bluray2160p,
    #[serde(rename = "Bluray-2160p Remux")]
    Remux2160p,
}

impl Quality {
    pub const ALL: [Quality; 22] = [
        Quality::Unknown,
        Quality::Sdtv,
        Quality::WebRip480p,
        Quality::WebDl480p,
        Quality::Dvd,
        Quality::Bluray480p,
        Quality::Bluray576p,
        Quality::Hdtv720p,
        Quality::Hdtv1080p,
        Quality::RawHd,
        Quality::WebRip720p,
        Quality::WebDl720p,
        Quality::Bluray720p,
        Quality::WebRip1080p,
        Quality::WebDl1080p,
        Quality::Bluray1080p,
        Quality::Remux1080p,
        Quality::Hdtv2160p,
        Quality::WebRip2160p,
        Quality::WebDl2160p,
        Quality::Bluray2160p,
        Quality::Remux2160p,
    ];

    /// Map parsed source/resolution/modifier tokens to a catalog entry.
    pub fn from_parts(
        source: Source,
        resolution: Resolution,
        modifier: Option<QualityModifier>,
    ) -> Self {
        match modifier {
            Some(QualityModifier::RawHd) => return Quality::RawHd,
            Some(QualityModifier::Remux) | Some(QualityModifier::BlurayRaw) => {
                return match resolution {
                    Resolution::P2160 => Quality::Remux2160p,
                    _ => Quality::Remux1080p,
                };
            }
            None => {}
        }

        match (source, resolution) {
            (Source::Bluray, Resolution::P2160) => Quality::Bluray2160p,
            (Source::Bluray, Resolution::P1080) => Quality::Bluray1080p,
            (Source::Bluray, Resolution::P576) => Quality::Bluray576p,
            (Source::Bluray, Resolution::P480) => Quality::Bluray480p,
            (Source::Bluray, _) => Quality::Bluray720p,
            (Source::Web, Resolution::P2160) => Quality::WebDl2160p,
            (Source::Web, Resolution::P1080) => Quality::WebDl1080p,
            (Source::Web, Resolution::P720) => Quality::WebDl720p,
            (Source::Web, _) => Quality::WebDl480p,
            (Source::WebRip, Resolution::P2160) => Quality::WebRip2160p,
            (Source::WebRip, Resolution::P1080) => Quality::WebRip1080p,
            (Source::WebRip, Resolution::P720) => Quality::WebRip720p,
            (Source::WebRip, _) => Quality::WebRip480p,
            (Source::Tv, Resolution::P2160) => Quality::Hdtv2160p,
            (Source::Tv, Resolution::P1080) => Quality::Hdtv1080p,
            (Source::Tv, Resolution::P720) => Quality::Hdtv720p,
            (Source::Tv, _) => Quality::Sdtv,
            (Source::Dvd, _) => Quality::Dvd,
            (Source::Unknown, Resolution::P2160) => Quality::Hdtv2160p,
            (Source::Unknown, Resolution::P1080) => Quality::Hdtv1080p,
            (Source::Unknown, Resolution::P720) => Quality::Hdtv720p,
            (Source::Unknown, Resolution::P480) | (Source::Unknown, Resolution::P576) => {
                Quality::Sdtv
            }
            (Source::Unknown, Resolution::Unknown) => Quality::Unknown,
        }
    }

    /// Position in the built-in catalog; higher is better.
    pub fn default_rank(&self) -> u32 {
        Quality::ALL
            .iter()
            .position(|quality| quality == self)
            .map(|index| index as u32 + 1)
            .unwrap_or(0)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Quality::Unknown => "Unknown",
            Quality::Sdtv => "SDTV",
            Quality::WebRip480p => "WEBRip-480p",
            Quality::WebDl480p => "WEBDL-480p",
            Quality::Dvd => "DVD",
            Quality::Bluray480p => "Bluray-480p",
            Quality::Bluray576p => "Bluray-576p",
            Quality::Hdtv720p => "HDTV-720p",
            Quality::Hdtv1080p => "HDTV-1080p",
            Quality::RawHd => "Raw-HD",
            Quality::WebRip720p => "WEBRip-720p",
            Quality::WebDl720p => "WEBDL-720p",
            Quality::Bluray720p => "Bluray-720p",
            Quality::WebRip1080p => "WEBRip-1080p",
            Quality::WebDl1080p => "WEBDL-1080p",
            Quality::Bluray1080p => "Bluray-1080p",
            Quality::Remux1080p => "Bluray-1080p Remux",
            Quality::Hdtv2160p => "HDTV-2160p",
            Quality::WebRip2160p => "WEBRip-2160p",
            Quality::WebDl2160p => "WEBDL-2160p",
            Quality::Bluray2160p => "Bluray-2160p",
            Quality::Remux2160p => "Bluray-2160p Remux",
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Catalog entry: global rank plus plausible size bounds in MB per minute of
/// runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityDefinition {
    pub quality: Quality,
    pub rank: u32,
    pub source: Source,
    pub resolution: Resolution,
    pub min_size: Option<f64>,
    pub preferred_size: Option<f64>,
    pub max_size: Option<f64>,
}

impl QualityDefinition {
    /// Built-in catalog, ordered by global rank.
    pub fn defaults() -> Vec<QualityDefinition> {
        use Quality as Q;
        use Resolution as R;
        use Source as S;

        let rows: [(Q, S, R, f64, Option<f64>); 22] = [
            (Q::Unknown, S::Unknown, R::Unknown, 1.0, Some(199.9)),
            (Q::Sdtv, S::Tv, R::P480, 2.0, Some(100.0)),
            (Q::WebRip480p, S::WebRip, R::P480, 2.0, Some(100.0)),
            (Q::WebDl480p, S::Web, R::P480, 2.0, Some(100.0)),
            (Q::Dvd, S::Dvd, R::P480, 2.0, Some(100.0)),
            (Q::Bluray480p, S::Bluray, R::P480, 2.0, Some(100.0)),
            (Q::Bluray576p, S::Bluray, R::P576, 2.0, Some(100.0)),
            (Q::Hdtv720p, S::Tv, R::P720, 3.0, Some(125.0)),
            (Q::Hdtv1080p, S::Tv, R::P1080, 4.0, Some(125.0)),
            (Q::RawHd, S::Tv, R::P1080, 4.0, None),
            (Q::WebRip720p, S::WebRip, R::P720, 3.0, Some(130.0)),
            (Q::WebDl720p, S::Web, R::P720, 3.0, Some(130.0)),
            (Q::Bluray720p, S::Bluray, R::P720, 4.0, Some(130.0)),
            (Q::WebRip1080p, S::WebRip, R::P1080, 4.0, Some(130.0)),
            (Q::WebDl1080p, S::Web, R::P1080, 4.0, Some(130.0)),
            (Q::Bluray1080p, S::Bluray, R::P1080, 4.0, Some(155.0)),
            (Q::Remux1080p, S::Bluray, R::P1080, 35.0, None),
            (Q::Hdtv2160p, S::Tv, R::P2160, 35.0, Some(199.9)),
            (Q::WebRip2160p, S::WebRip, R::P2160, 35.0, None),
            (Q::WebDl2160p, S::Web, R::P2160, 35.0, None),
            (Q::Bluray2160p, S::Bluray, R::P2160, 35.0, None),
            (Q::Remux2160p, S::Bluray, R::P2160, 35.0, None),
        ];

        rows.into_iter()
            .enumerate()
            .map(|(index, (quality, source, resolution, min, max))| QualityDefinition {
                quality,
                rank: index as u32 + 1,
                source,
                resolution,
                min_size: Some(min),
                preferred_size: max.map(|max| (min + max) / 2.0),
                max_size: max,
            })
            .collect()
    }
}

/// Override for a catalog entry's size bounds, as supplied by configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySizeOverride {
    pub quality: Quality,
    pub min_size: Option<f64>,
    pub preferred_size: Option<f64>,
    pub max_size: Option<f64>,
}

// ============================================================================
// Profiles
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityProfile {
    pub name: String,
    /// Allowed qualities ordered from least to most preferred. This order is
    /// the one used for every comparison made under the profile.
    pub allowed_qualities: Vec<Quality>,
    pub cutoff: Quality,
    pub upgrade_allowed: bool,
    #[serde(default)]
    pub min_format_score: i32,
    #[serde(default)]
    pub cutoff_format_score: i32,
    #[serde(default)]
    pub required_languages: Vec<Language>,
    #[serde(default)]
    pub preferred_protocol: Option<Protocol>,
}

impl QualityProfile {
    pub fn new(name: impl Into<String>, allowed_qualities: Vec<Quality>) -> Self {
        let cutoff = allowed_qualities.last().copied().unwrap_or(Quality::Unknown);
        Self {
            name: name.into(),
            allowed_qualities,
            cutoff,
            upgrade_allowed: true,
            min_format_score: 0,
            cutoff_format_score: 0,
            required_languages: Vec::new(),
            preferred_protocol: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayProfile {
    pub enable_usenet: bool,
    pub enable_torrent: bool,
    pub usenet_delay_minutes: u32,
    pub torrent_delay_minutes: u32,
    pub bypass_if_highest_quality: bool,
    pub bypass_if_above_custom_format_score: Option<i32>,
}

impl Default for DelayProfile {
    fn default() -> Self {
        Self {
            enable_usenet: true,
            enable_torrent: true,
            usenet_delay_minutes: 0,
            torrent_delay_minutes: 0,
            bypass_if_highest_quality: true,
            bypass_if_above_custom_format_score: None,
        }
    }
}

impl DelayProfile {
    pub fn is_enabled(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Usenet => self.enable_usenet,
            Protocol::Torrent => self.enable_torrent,
        }
    }

    pub fn delay_minutes(&self, protocol: Protocol) -> u32 {
        match protocol {
            Protocol::Usenet => self.usenet_delay_minutes,
            Protocol::Torrent => self.torrent_delay_minutes,
        }
    }
}

// ============================================================================
// Custom Formats
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpecificationKind {
    ReleaseTitle { pattern: String },
    ReleaseGroup { pattern: String },
    IndexerFlag { flag: IndexerFlag },
    Language { language: Language },
    Source { source: Source },
    Resolution { resolution: Resolution },
    QualityModifier { modifier: QualityModifier },
    Size { min_gb: f64, max_gb: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFormatSpecification {
    pub name: String,
    #[serde(default)]
    pub negate: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(flatten)]
    pub kind: SpecificationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFormat {
    pub name: String,
    pub score: i32,
    pub specifications: Vec<CustomFormatSpecification>,
}

// ============================================================================
// Library State
// ============================================================================

/// File already present in the library for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingFile {
    pub quality: Quality,
    pub custom_format_score: i32,
    #[serde(default)]
    pub revision: Revision,
}

// ============================================================================
// Acquisition Queue
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    Superseded,
    RetriesExhausted { last_error: String },
    PermanentDownload { message: String },
    ImportFailed { message: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Superseded => write!(f, "superseded"),
            Self::RetriesExhausted { last_error } => {
                write!(f, "retries exhausted: {}", last_error)
            }
            Self::PermanentDownload { message } => write!(f, "download failed: {}", message),
            Self::ImportFailed { message } => write!(f, "import failed: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueueState {
    Delay,
    Queued,
    Downloading,
    Completed,
    Importing,
    Imported,
    Warning,
    Failed(FailureReason),
}

impl QueueState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Imported | Self::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Delay => "delay",
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Importing => "importing",
            Self::Imported => "imported",
            Self::Warning => "warning",
            Self::Failed(_) => "failed",
        }
    }

    /// Whether a replacement candidate may still cancel this item.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Self::Delay | Self::Queued | Self::Downloading | Self::Warning
        )
    }

    /// The closed set of edges a queue item may take.
    pub fn can_transition_to(&self, next: &QueueState) -> bool {
        use QueueState::*;
        match (self, next) {
            (Delay, Queued) => true,
            (Delay, Failed(FailureReason::Superseded)) => true,
            (Queued, Queued | Downloading | Failed(_)) => true,
            (Downloading, Queued | Completed | Warning | Failed(_)) => true,
            (Warning, Queued | Downloading | Completed | Importing | Failed(_)) => true,
            (Completed, Importing) => true,
            (Importing, Imported | Warning) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed ({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid queue transition {from} -> {to}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

/// One accepted release in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub download_id: Option<String>,
    pub target: TargetRef,
    pub release: ParsedRelease,
    pub download_url: String,
    pub quality: Quality,
    pub custom_format_score: i32,
    pub score: i64,
    pub protocol: Protocol,
    pub size_bytes: u64,
    pub size_left: u64,
    pub state: QueueState,
    pub failure_count: u32,
    pub import_attempts: u32,
    pub output_path: Option<String>,
    pub hold_until: Option<DateTime<Utc>>,
    pub next_attempt_at: DateTime<Utc>,
    pub pending_removal: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn transition(&mut self, next: QueueState, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(&next) {
            return Err(TransitionError {
                from: self.state.name(),
                to: next.name(),
            });
        }
        self.state = next;
        self.last_updated_at = now;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

// ============================================================================
// Blocklist
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocklistEntry {
    pub source_title: String,
    pub target: TargetRef,
    pub reason: String,
    pub protocol: Protocol,
    pub indexer: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Domain Validation
// ============================================================================

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Result<(), Vec<ValidationError>>;
}

impl Validate for QualityProfile {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(ValidationError {
                field: "name",
                message: "name cannot be empty".into(),
            });
        }
        if self.allowed_qualities.is_empty() {
            errors.push(ValidationError {
                field: "allowed_qualities",
                message: "at least one quality must be allowed".into(),
            });
        }
        for (index, quality) in self.allowed_qualities.iter().enumerate() {
            if self.allowed_qualities[..index].contains(quality) {
                errors.push(ValidationError {
                    field: "allowed_qualities",
                    message: format!("{} is listed more than once", quality),
                });
            }
        }
        if !self.allowed_qualities.contains(&self.cutoff) {
            errors.push(ValidationError {
                field: "cutoff",
                message: "cutoff must be one of allowed_qualities".into(),
            });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Validate for CustomFormat {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(ValidationError {
                field: "name",
                message: "name cannot be empty".into(),
            });
        }
        if self.specifications.is_empty() {
            errors.push(ValidationError {
                field: "specifications",
                message: "at least one specification is required".into(),
            });
        }
        for spec in &self.specifications {
            if let SpecificationKind::Size { min_gb, max_gb } = spec.kind {
                if min_gb < 0.0 || max_gb < min_gb {
                    errors.push(ValidationError {
                        field: "specifications",
                        message: format!("size range of '{}' is invalid", spec.name),
                    });
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// ============================================================================
// Domain Events
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DomainEvent<TPayload> {
    pub name: &'static str,
    pub occurred_at: DateTime<Utc>,
    pub payload: TPayload,
}

impl<TPayload> DomainEvent<TPayload> {
    pub fn new(name: &'static str, payload: TPayload) -> Self {
        Self {
            name,
            occurred_at: Utc::now(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseGrabbedPayload {
    pub queue_item_id: QueueItemId,
    pub target: TargetRef,
    pub title: String,
    pub quality: Quality,
    pub custom_format_score: i32,
    pub protocol: Protocol,
    pub indexer: Option<String>,
    pub download_id: String,
}

pub type ReleaseGrabbed = DomainEvent<ReleaseGrabbedPayload>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseImportedPayload {
    pub queue_item_id: QueueItemId,
    pub target: TargetRef,
    pub title: String,
    pub quality: Quality,
    pub output_path: String,
}

pub type ReleaseImported = DomainEvent<ReleaseImportedPayload>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadFailedPayload {
    pub queue_item_id: QueueItemId,
    pub target: TargetRef,
    pub title: String,
    pub reason: String,
}

pub type DownloadFailed = DomainEvent<DownloadFailedPayload>;

/// Events emitted by the acquisition core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AcquisitionEvent {
    Grabbed(ReleaseGrabbedPayload),
    Imported(ReleaseImportedPayload),
    DownloadFailed(DownloadFailedPayload),
}

impl AcquisitionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Grabbed(_) => "grabbed",
            Self::Imported(_) => "imported",
            Self::DownloadFailed(_) => "download_failed",
        }
    }

    pub fn into_domain_event(self) -> DomainEvent<AcquisitionEvent> {
        DomainEvent::new(self.name(), self)
    }
}

// ============================================================================
// Tests
// ============================================================================
