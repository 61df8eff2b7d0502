// SPDX-License-Identifier: GPL-3.0-or-later
//! In-memory library backed by a JSON snapshot.
//!
//! The snapshot lists series (with their episodes) and movies together with
//! the quality profile each uses and the file currently on disk, if any.
//! Release titles are matched against library titles after Unicode
//! normalisation so accents, case and punctuation do not matter.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use corsair_domain::{
    ContentType, ExistingFile, MovieId, ParsedRelease, Quality, QualityProfile, SeriesId,
    TargetRef,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::repositories::{LibraryStateProvider, TargetDetails, WantedTarget};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeEntry {
    pub season: u32,
    pub episode: u32,
    #[serde(default)]
    pub absolute_number: Option<u32>,
    #[serde(default)]
    pub air_date: Option<NaiveDate>,
    #[serde(default = "default_true")]
    pub monitored: bool,
    #[serde(default)]
    pub file: Option<ExistingFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub id: SeriesId,
    pub title: String,
    #[serde(default)]
    pub alternate_titles: Vec<String>,
    pub quality_profile: String,
    #[serde(default = "default_true")]
    pub monitored: bool,
    #[serde(default)]
    pub runtime_minutes: Option<u32>,
    #[serde(default)]
    pub episodes: Vec<EpisodeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieEntry {
    pub id: MovieId,
    pub title: String,
    #[serde(default)]
    pub year: Option<u16>,
    pub quality_profile: String,
    #[serde(default = "default_true")]
    pub monitored: bool,
    #[serde(default)]
    pub runtime_minutes: Option<u32>,
    #[serde(default)]
    pub file: Option<ExistingFile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibrarySnapshot {
    #[serde(default)]
    pub series: Vec<SeriesEntry>,
    #[serde(default)]
    pub movies: Vec<MovieEntry>,
}

#[derive(Default)]
pub struct InMemoryLibrary {
    snapshot: RwLock<LibrarySnapshot>,
    profiles: HashMap<String, QualityProfile>,
}

impl InMemoryLibrary {
    pub fn from_snapshot(snapshot: LibrarySnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            profiles: HashMap::new(),
        }
    }

    /// Quality profiles by name, used to rank existing files the way the
    /// series' own profile does.
    pub fn with_profiles(mut self, profiles: impl IntoIterator<Item = QualityProfile>) -> Self {
        self.profiles = profiles
            .into_iter()
            .map(|profile| (profile.name.clone(), profile))
            .collect();
        self
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read library snapshot {}", path.display()))?;
        let snapshot: LibrarySnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("invalid library snapshot {}", path.display()))?;
        info!(
            target: "infrastructure",
            series = snapshot.series.len(),
            movies = snapshot.movies.len(),
            "library snapshot loaded"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Record a newly imported file for every entity the target covers.
    pub async fn record_file(&self, target: &TargetRef, file: ExistingFile) -> Result<()> {
        let mut snapshot = self.snapshot.write().await;
        match target {
            TargetRef::Episodes {
                series_id,
                season,
                episodes,
            } => {
                let series = snapshot
                    .series
                    .iter_mut()
                    .find(|s| s.id == *series_id)
                    .ok_or_else(|| anyhow!("unknown series {}", series_id))?;
                for entry in series
                    .episodes
                    .iter_mut()
                    .filter(|e| e.season == *season && episodes.contains(&e.episode))
                {
                    entry.file = Some(file);
                }
            }
            TargetRef::Movie { movie_id } => {
                let movie = snapshot
                    .movies
                    .iter_mut()
                    .find(|m| m.id == *movie_id)
                    .ok_or_else(|| anyhow!("unknown movie {}", movie_id))?;
                movie.file = Some(file);
            }
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> LibrarySnapshot {
        self.snapshot.read().await.clone()
    }
}

/// Fold a title to lowercase alphanumerics with diacritics removed.
pub fn normalize_title(title: &str) -> String {
    title
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

fn series_matches(series: &SeriesEntry, wanted: &str, year: Option<u16>) -> bool {
    std::iter::once(&series.title)
        .chain(series.alternate_titles.iter())
        .map(|title| normalize_title(title))
        .any(|title| {
            title == wanted || year.is_some_and(|y| format!("{}{}", title, y) == wanted)
        })
}

fn resolve_episodes(series: &SeriesEntry, release: &ParsedRelease) -> Option<TargetRef> {
    if let Some(season) = release.season {
        if !release.episodes.is_empty() {
            let all_known = release.episodes.iter().all(|ep| {
                series
                    .episodes
                    .iter()
                    .any(|e| e.season == season && e.episode == *ep)
            });
            return all_known
                .then(|| TargetRef::episodes(series.id, season, release.episodes.iter().copied()));
        }
        if release.full_season {
            let episodes: Vec<u32> = series
                .episodes
                .iter()
                .filter(|e| e.season == season)
                .map(|e| e.episode)
                .collect();
            return (!episodes.is_empty()).then(|| TargetRef::episodes(series.id, season, episodes));
        }
    }

    if !release.absolute_episodes.is_empty() {
        let mut season = None;
        let mut episodes = Vec::new();
        for absolute in &release.absolute_episodes {
            let entry = series
                .episodes
                .iter()
                .find(|e| e.absolute_number == Some(*absolute))?;
            if *season.get_or_insert(entry.season) != entry.season {
                return None;
            }
            episodes.push(entry.episode);
        }
        return season.map(|season| TargetRef::episodes(series.id, season, episodes));
    }

    if let Some(date) = release.air_date {
        let entry = series.episodes.iter().find(|e| e.air_date == Some(date))?;
        return Some(TargetRef::episodes(series.id, entry.season, [entry.episode]));
    }

    None
}

/// Rank under the profile when one is known; qualities the profile does
/// not allow rank below all others.
fn rank(quality: Quality, profile: Option<&QualityProfile>) -> u32 {
    match profile {
        Some(profile) => profile
            .allowed_qualities
            .iter()
            .position(|allowed| *allowed == quality)
            .map_or(0, |index| index as u32 + 1),
        None => quality.default_rank(),
    }
}

fn worst_file(
    files: impl Iterator<Item = Option<ExistingFile>>,
    profile: Option<&QualityProfile>,
) -> Option<ExistingFile> {
    let mut worst: Option<ExistingFile> = None;
    for file in files {
        let file = file?;
        let replace = worst.map_or(true, |current| {
            (rank(file.quality, profile), file.custom_format_score)
                < (rank(current.quality, profile), current.custom_format_score)
        });
        if replace {
            worst = Some(file);
        }
    }
    worst
}

#[async_trait::async_trait]
impl LibraryStateProvider for InMemoryLibrary {
    async fn current_file(&self, target: &TargetRef) -> Result<Option<ExistingFile>> {
        let snapshot = self.snapshot.read().await;
        match target {
            TargetRef::Episodes {
                series_id,
                season,
                episodes,
            } => {
                let Some(series) = snapshot.series.iter().find(|s| s.id == *series_id) else {
                    return Ok(None);
                };
                // every episode needs a file before the set counts as present
                let profile = self.profiles.get(&series.quality_profile);
                Ok(worst_file(
                    episodes.iter().map(|ep| {
                        series
                            .episodes
                            .iter()
                            .find(|e| e.season == *season && e.episode == *ep)
                            .and_then(|e| e.file)
                    }),
                    profile,
                ))
            }
            TargetRef::Movie { movie_id } => Ok(snapshot
                .movies
                .iter()
                .find(|m| m.id == *movie_id)
                .and_then(|m| m.file)),
        }
    }

    async fn is_monitored(&self, target: &TargetRef) -> Result<bool> {
        let snapshot = self.snapshot.read().await;
        match target {
            TargetRef::Episodes {
                series_id,
                season,
                episodes,
            } => {
                let Some(series) = snapshot.series.iter().find(|s| s.id == *series_id) else {
                    return Ok(false);
                };
                Ok(series.monitored
                    && episodes.iter().all(|ep| {
                        series
                            .episodes
                            .iter()
                            .any(|e| e.season == *season && e.episode == *ep && e.monitored)
                    }))
            }
            TargetRef::Movie { movie_id } => Ok(snapshot
                .movies
                .iter()
                .any(|m| m.id == *movie_id && m.monitored)),
        }
    }

    async fn find_target(&self, release: &ParsedRelease) -> Result<Option<TargetRef>> {
        let Some(title) = release.series_title.as_deref() else {
            return Ok(None);
        };
        let wanted = normalize_title(title);
        let snapshot = self.snapshot.read().await;

        let target = if release.content_type == ContentType::Movie {
            snapshot
                .movies
                .iter()
                .find(|m| {
                    normalize_title(&m.title) == wanted
                        && match (m.year, release.year) {
                            (Some(a), Some(b)) => a == b,
                            _ => true,
                        }
                })
                .map(|m| TargetRef::movie(m.id))
        } else {
            snapshot
                .series
                .iter()
                .filter(|s| series_matches(s, &wanted, release.year))
                .find_map(|s| resolve_episodes(s, release))
        };

        debug!(target: "infrastructure", title = %release.title, found = target.is_some(), "resolved release target");
        Ok(target)
    }

    async fn describe(&self, target: &TargetRef) -> Result<TargetDetails> {
        let snapshot = self.snapshot.read().await;
        match target {
            TargetRef::Episodes { series_id, .. } => snapshot
                .series
                .iter()
                .find(|s| s.id == *series_id)
                .map(|s| TargetDetails {
                    quality_profile: s.quality_profile.clone(),
                    runtime_minutes: s.runtime_minutes,
                })
                .ok_or_else(|| anyhow!("unknown series {}", series_id)),
            TargetRef::Movie { movie_id } => snapshot
                .movies
                .iter()
                .find(|m| m.id == *movie_id)
                .map(|m| TargetDetails {
                    quality_profile: m.quality_profile.clone(),
                    runtime_minutes: m.runtime_minutes,
                })
                .ok_or_else(|| anyhow!("unknown movie {}", movie_id)),
        }
    }

    async fn wanted(&self) -> Result<Vec<WantedTarget>> {
        let snapshot = self.snapshot.read().await;
        let mut wanted = Vec::new();

        for series in snapshot.series.iter().filter(|s| s.monitored) {
            for episode in series
                .episodes
                .iter()
                .filter(|e| e.monitored && e.file.is_none())
            {
                wanted.push(WantedTarget {
                    target: TargetRef::episodes(series.id, episode.season, [episode.episode]),
                    search_term: format!(
                        "{} S{:02}E{:02}",
                        series.title, episode.season, episode.episode
                    ),
                });
            }
        }

        for movie in snapshot
            .movies
            .iter()
            .filter(|m| m.monitored && m.file.is_none())
        {
            let search_term = match movie.year {
                Some(year) => format!("{} {}", movie.title, year),
                None => movie.title.clone(),
            };
            wanted.push(WantedTarget {
                target: TargetRef::movie(movie.id),
                search_term,
            });
        }

        Ok(wanted)
    }
}
