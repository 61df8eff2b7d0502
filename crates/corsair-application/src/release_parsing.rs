// SPDX-License-Identifier: GPL-3.0-or-later
//! Release title parsing.
//!
//! Extraction runs in a fixed order over a working copy of the title. Every
//! stage blanks out the span it consumed, so a token is never read twice and
//! the title words in front of the episode identifier are never mistaken for
//! quality or language tokens.

use std::ops::Range;

use chrono::{DateTime, NaiveDate, Utc};
use corsair_domain::{
    Codec, ContentType, IndexerFlag, Language, ParsedRelease, Protocol, Quality, QualityModifier,
    ReleaseFlags, Resolution, Source,
};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Metadata the indexer reported next to the title.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexerHints {
    pub size_bytes: Option<u64>,
    pub indexer: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub indexer_flags: Vec<IndexerFlag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("release title is empty")]
    Empty,
    #[error("no episode, date or year identifier in '{0}'")]
    NoIdentifier(String),
}

#[derive(Debug, Default)]
struct EpisodeInfo {
    start: usize,
    season: Option<u32>,
    episodes: Vec<u32>,
    absolute_episodes: Vec<u32>,
    air_date: Option<NaiveDate>,
    full_season: bool,
    version: Option<u32>,
}

lazy_static! {
    static ref EXTENSION_REGEX: Regex =
        Regex::new(r"(?i)\.(?:mkv|mp4|m4v|avi|ts|nzb|torrent)$").expect("valid extension regex");
    static ref ANIME_GROUP_REGEX: Regex =
        Regex::new(r"^\s*\[(?P<group>[^\]]+)\]").expect("valid anime group regex");
    static ref STANDARD_EPISODE_REGEX: Regex = Regex::new(
        r"(?i)\bS(?P<season>\d{1,3})[ .]?E(?P<first>\d{1,4})(?P<rest>(?:[ .-]?E\d{1,4})*)(?:-(?P<end>\d{1,4}))?\b"
    )
    .expect("valid episode regex");
    static ref EPISODE_TOKEN_REGEX: Regex =
        Regex::new(r"(?i)(?P<sep>[ .-]?)E(?P<ep>\d{1,4})").expect("valid episode token regex");
    static ref CROSS_EPISODE_REGEX: Regex =
        Regex::new(r"(?i)\b(?P<season>\d{1,2})x(?P<episode>\d{2,3})\b").expect("valid cross episode regex");
    static ref SEASON_PACK_REGEX: Regex =
        Regex::new(r"(?i)\b(?:S|Season[ .]?)(?P<season>\d{1,2})\b").expect("valid season pack regex");
    static ref DAILY_REGEX: Regex = Regex::new(
        r"\b(?P<year>(?:19|20)\d{2})[.\- ](?P<month>\d{2})[.\- ](?P<day>\d{2})\b"
    )
    .expect("valid daily regex");
    static ref ABSOLUTE_REGEX: Regex = Regex::new(
        r"(?:^|\s)-\s?(?P<abs>\d{1,4})(?:-(?P<end>\d{1,4}))?(?:v(?P<version>\d))?(?:\s|\[|\(|$)"
    )
    .expect("valid absolute episode regex");
    static ref YEAR_REGEX: Regex =
        Regex::new(r"\b(?P<year>(?:19|20)\d{2})\b").expect("valid year regex");
    static ref TRAILING_YEAR_REGEX: Regex =
        Regex::new(r"^(?P<title>.+?)[ (]+(?P<year>(?:19|20)\d{2})\)?$").expect("valid trailing year regex");
    static ref RESOLUTION_REGEX: Regex = Regex::new(
        r"(?i)\b(?:(?P<r2160>2160p|4k|uhd)|(?P<r1080>1080[pi])|(?P<r720>720p)|(?P<r576>576p)|(?P<r480>480p|480i|848x480|640x480))\b"
    )
    .expect("valid resolution regex");
    static ref MODIFIER_REGEX: Regex = Regex::new(
        r"(?i)\b(?:(?P<remux>remux)|(?P<raw>br-?disk|complete[ .]blu-?ray)|(?P<rawhd>raw-?hd))\b"
    )
    .expect("valid modifier regex");
    static ref SOURCE_REGEX: Regex = Regex::new(
        r"(?i)\b(?:(?P<bluray>blu-?ray|bdrip|brrip|bd25|bd50)|(?P<webrip>web-?rip)|(?P<web>web[ .-]?dl|webhd|web)|(?P<tv>hdtv|pdtv|sdtv|dsr|tvrip)|(?P<dvd>dvdrip|dvdr|dvd5|dvd9|dvd))\b"
    )
    .expect("valid source regex");
    static ref CODEC_REGEX: Regex = Regex::new(
        r"(?i)\b(?:(?P<x264>x264)|(?P<x265>x265)|(?P<h264>h\.?264|avc)|(?P<h265>h\.?265|hevc)|(?P<av1>av1)|(?P<xvid>xvid|divx)|(?P<vp9>vp9))\b"
    )
    .expect("valid codec regex");
    static ref LANGUAGE_REGEX: Regex = Regex::new(
        r"(?i)\b(?P<lang>english|eng|french|truefrench|vff|vostfr|german|deutsch|ger|spanish|castellano|latino|esp|italian|ita|portuguese|brazilian|dutch|flemish|swedish|swe|norwegian|danish|finnish|polish|russian|rus|turkish|arabic|hindi|japanese|jpn|korean|kor|chinese|mandarin|cantonese)\b"
    )
    .expect("valid language regex");
    static ref PROPER_REGEX: Regex = Regex::new(r"(?i)\bproper\b").expect("valid proper regex");
    static ref REPACK_REGEX: Regex =
        Regex::new(r"(?i)\b(?:repack|rerip)\b").expect("valid repack regex");
    static ref REAL_REGEX: Regex = Regex::new(r"\bREAL\b").expect("valid real regex");
    static ref VERSION_REGEX: Regex =
        Regex::new(r"(?i)\bv(?P<version>[2-9])\b").expect("valid version regex");
    static ref GROUP_REGEX: Regex = Regex::new(
        r"-(?P<group>[A-Za-z0-9_]{2,32})(?:\s*\[[^\]]*\])?$"
    )
    .expect("valid group regex");
}

/// Tokens that can trail a hyphen without being a release group.
const NOT_A_GROUP: &[&str] = &[
    "dl", "rip", "web", "hdtv", "x264", "x265", "h264", "h265", "hevc", "avc", "1080p", "720p",
    "2160p", "480p", "sd", "hd", "uhd", "remux", "bluray", "ray", "disk",
];

/// Parse a raw release title. Identical inputs always produce identical output.
pub fn parse_release_title(
    title: &str,
    protocol: Protocol,
    hints: &IndexerHints,
) -> Result<ParsedRelease, ParseFailure> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ParseFailure::Empty);
    }

    let stripped = EXTENSION_REGEX.replace(trimmed, "").to_string();
    // '_' -> ' ' keeps byte offsets stable and lets \b see word breaks
    let mut work = stripped.replace('_', " ");

    let bracket_group = ANIME_GROUP_REGEX.captures(&work).map(|caps| {
        let group = caps["group"].trim().to_string();
        (group, caps.get(0).map(|m| m.range()).unwrap_or_default())
    });
    if let Some((_, range)) = &bracket_group {
        consume(&mut work, range.clone());
    }

    let episode = extract_episode_info(&mut work);

    let (content_type, title_end, year) = match &episode {
        Some(info) if !info.absolute_episodes.is_empty() => (ContentType::Anime, info.start, None),
        Some(info) if bracket_group.is_some() => (ContentType::Anime, info.start, None),
        Some(info) => (ContentType::Series, info.start, None),
        None => {
            let Some((range, year)) = find_movie_year(&work) else {
                return Err(ParseFailure::NoIdentifier(trimmed.to_string()));
            };
            consume(&mut work, range.clone());
            (ContentType::Movie, range.start, Some(year))
        }
    };

    let (series_title, year) = {
        let cleaned = clean_title(&work[..title_end]);
        match (cleaned, year) {
            (Some(cleaned), None) => match split_trailing_year(&cleaned) {
                Some((title, year)) => (Some(title), Some(year)),
                None => (Some(cleaned), None),
            },
            (cleaned, year) => (cleaned, year),
        }
    };
    consume(&mut work, 0..title_end);

    let resolution = take_resolution(&mut work);
    let modifier = take_modifier(&mut work);
    let mut source = take_source(&mut work);
    if source == Source::Unknown {
        source = match modifier {
            Some(QualityModifier::Remux) | Some(QualityModifier::BlurayRaw) => Source::Bluray,
            Some(QualityModifier::RawHd) => Source::Tv,
            None => Source::Unknown,
        };
    }
    let codec = take_codec(&mut work);
    let languages = take_languages(&mut work);
    let flags = take_flags(&mut work, episode.as_ref().and_then(|e| e.version));

    let release_group = bracket_group
        .map(|(group, _)| group)
        .or_else(|| detect_release_group(&stripped));

    let info = episode.unwrap_or_default();
    let parsed = ParsedRelease {
        title: title.to_string(),
        series_title,
        content_type,
        season: info.season,
        episodes: info.episodes,
        absolute_episodes: info.absolute_episodes,
        air_date: info.air_date,
        year,
        full_season: info.full_season,
        resolution,
        source,
        modifier,
        quality: Quality::from_parts(source, resolution, modifier),
        codec,
        release_group,
        languages,
        flags,
        size_bytes: hints.size_bytes.unwrap_or(0),
        protocol,
        indexer: hints.indexer.clone(),
        published_at: hints.published_at,
        indexer_flags: hints.indexer_flags.clone(),
    };

    debug!(
        target: "parser",
        title = %parsed.title,
        quality = %parsed.quality,
        season = ?parsed.season,
        episodes = ?parsed.episodes,
        "release parsed"
    );
    Ok(parsed)
}

fn consume(work: &mut String, range: Range<usize>) {
    if range.is_empty() {
        return;
    }
    let blank = " ".repeat(range.len());
    work.replace_range(range, &blank);
}

fn number(caps: &Captures<'_>, name: &str) -> Option<u32> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}

fn extract_episode_info(work: &mut String) -> Option<EpisodeInfo> {
    let info = standard_episode(work)
        .or_else(|| cross_episode(work))
        .or_else(|| season_pack(work))
        .or_else(|| daily_episode(work))
        .or_else(|| absolute_episode(work))?;
    Some(info)
}

fn standard_episode(work: &mut String) -> Option<EpisodeInfo> {
    let (range, info) = {
        let caps = STANDARD_EPISODE_REGEX.captures(work)?;
        let whole = caps.get(0)?;
        let season = number(&caps, "season")?;
        let first = number(&caps, "first")?;

        let mut episodes = vec![first];
        let mut ranged = false;
        if let Some(rest) = caps.name("rest") {
            for token in EPISODE_TOKEN_REGEX.captures_iter(rest.as_str()) {
                if let Some(ep) = number(&token, "ep") {
                    ranged = &token["sep"] == "-";
                    episodes.push(ep);
                }
            }
        }
        if let Some(end) = number(&caps, "end") {
            episodes.push(end);
            ranged = true;
        }
        // S01E01-E03 and S01E01-03 are ranges; S01E01E02 is a list
        if ranged && episodes.len() == 2 && episodes[1] > episodes[0] {
            episodes = (episodes[0]..=episodes[1]).collect();
        }
        episodes.sort_unstable();
        episodes.dedup();

        (
            whole.range(),
            EpisodeInfo {
                start: whole.start(),
                season: Some(season),
                episodes,
                ..Default::default()
            },
        )
    };
    consume(work, range);
    Some(info)
}

fn cross_episode(work: &mut String) -> Option<EpisodeInfo> {
    let (range, info) = {
        let caps = CROSS_EPISODE_REGEX.captures(work)?;
        let whole = caps.get(0)?;
        (
            whole.range(),
            EpisodeInfo {
                start: whole.start(),
                season: Some(number(&caps, "season")?),
                episodes: vec![number(&caps, "episode")?],
                ..Default::default()
            },
        )
    };
    consume(work, range);
    Some(info)
}

fn season_pack(work: &mut String) -> Option<EpisodeInfo> {
    let (range, info) = {
        let caps = SEASON_PACK_REGEX.captures(work)?;
        let whole = caps.get(0)?;
        (
            whole.range(),
            EpisodeInfo {
                start: whole.start(),
                season: Some(number(&caps, "season")?),
                full_season: true,
                ..Default::default()
            },
        )
    };
    consume(work, range);
    Some(info)
}

fn daily_episode(work: &mut String) -> Option<EpisodeInfo> {
    let (range, info) = {
        let caps = DAILY_REGEX.captures(work)?;
        let whole = caps.get(0)?;
        let date = NaiveDate::from_ymd_opt(
            number(&caps, "year")? as i32,
            number(&caps, "month")?,
            number(&caps, "day")?,
        )?;
        (
            whole.range(),
            EpisodeInfo {
                start: whole.start(),
                air_date: Some(date),
                ..Default::default()
            },
        )
    };
    consume(work, range);
    Some(info)
}

fn absolute_episode(work: &mut String) -> Option<EpisodeInfo> {
    let (range, info) = {
        let caps = ABSOLUTE_REGEX.captures(work)?;
        let whole = caps.get(0)?;
        let first = number(&caps, "abs")?;
        let absolute_episodes = match number(&caps, "end") {
            Some(end) if end > first => (first..=end).collect(),
            _ => vec![first],
        };
        (
            whole.range(),
            EpisodeInfo {
                start: whole.start(),
                absolute_episodes,
                version: number(&caps, "version"),
                ..Default::default()
            },
        )
    };
    consume(work, range);
    Some(info)
}

fn find_movie_year(work: &str) -> Option<(Range<usize>, u16)> {
    // the last year wins so titles such as "2001 A Space Odyssey 1968" work
    YEAR_REGEX
        .captures_iter(work)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let year = caps["year"].parse().ok()?;
            (whole.start() > 0).then(|| (whole.range(), year))
        })
        .last()
}

fn clean_title(raw: &str) -> Option<String> {
    let replaced = raw.replace(['.', '_'], " ");
    let trimmed = replaced
        .trim()
        .trim_end_matches(|c: char| c == '-' || c == '(' || c == '[' || c.is_whitespace())
        .trim();
    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

fn split_trailing_year(title: &str) -> Option<(String, u16)> {
    let caps = TRAILING_YEAR_REGEX.captures(title)?;
    let year = caps["year"].parse().ok()?;
    Some((caps["title"].trim().to_string(), year))
}

fn take_resolution(work: &mut String) -> Resolution {
    let Some((range, resolution)) = RESOLUTION_REGEX.captures(work).and_then(|caps| {
        let resolution = if caps.name("r2160").is_some() {
            Resolution::P2160
        } else if caps.name("r1080").is_some() {
            Resolution::P1080
        } else if caps.name("r720").is_some() {
            Resolution::P720
        } else if caps.name("r576").is_some() {
            Resolution::P576
        } else {
            Resolution::P480
        };
        Some((caps.get(0)?.range(), resolution))
    }) else {
        return Resolution::Unknown;
    };
    consume(work, range);
    resolution
}

fn take_modifier(work: &mut String) -> Option<QualityModifier> {
    let (range, modifier) = MODIFIER_REGEX.captures(work).and_then(|caps| {
        let modifier = if caps.name("remux").is_some() {
            QualityModifier::Remux
        } else if caps.name("raw").is_some() {
            QualityModifier::BlurayRaw
        } else {
            QualityModifier::RawHd
        };
        Some((caps.get(0)?.range(), modifier))
    })?;
    consume(work, range);
    Some(modifier)
}

fn take_source(work: &mut String) -> Source {
    let Some((range, source)) = SOURCE_REGEX.captures(work).and_then(|caps| {
        let source = if caps.name("bluray").is_some() {
            Source::Bluray
        } else if caps.name("webrip").is_some() {
            Source::WebRip
        } else if caps.name("web").is_some() {
            Source::Web
        } else if caps.name("tv").is_some() {
            Source::Tv
        } else {
            Source::Dvd
        };
        Some((caps.get(0)?.range(), source))
    }) else {
        return Source::Unknown;
    };
    consume(work, range);
    source
}

fn take_codec(work: &mut String) -> Option<Codec> {
    let (range, codec) = CODEC_REGEX.captures(work).and_then(|caps| {
        let codec = if caps.name("x264").is_some() {
            Codec::X264
        } else if caps.name("x265").is_some() {
            Codec::X265
        } else if caps.name("h264").is_some() {
            Codec::H264
        } else if caps.name("h265").is_some() {
            Codec::H265
        } else if caps.name("av1").is_some() {
            Codec::Av1
        } else if caps.name("xvid").is_some() {
            Codec::Xvid
        } else {
            Codec::Vp9
        };
        Some((caps.get(0)?.range(), codec))
    })?;
    consume(work, range);
    Some(codec)
}

fn language_for(token: &str) -> Language {
    match token.to_lowercase().as_str() {
        "english" | "eng" => Language::English,
        "french" | "truefrench" | "vff" | "vostfr" => Language::French,
        "german" | "deutsch" | "ger" => Language::German,
        "spanish" | "castellano" | "latino" | "esp" => Language::Spanish,
        "italian" | "ita" => Language::Italian,
        "portuguese" | "brazilian" => Language::Portuguese,
        "dutch" | "flemish" => Language::Dutch,
        "swedish" | "swe" => Language::Swedish,
        "norwegian" => Language::Norwegian,
        "danish" => Language::Danish,
        "finnish" => Language::Finnish,
        "polish" => Language::Polish,
        "russian" | "rus" => Language::Russian,
        "turkish" => Language::Turkish,
        "arabic" => Language::Arabic,
        "hindi" => Language::Hindi,
        "japanese" | "jpn" => Language::Japanese,
        "korean" | "kor" => Language::Korean,
        "chinese" | "mandarin" | "cantonese" => Language::Chinese,
        _ => Language::Unknown,
    }
}

fn take_languages(work: &mut String) -> Vec<Language> {
    let found: Vec<(Range<usize>, Language)> = LANGUAGE_REGEX
        .captures_iter(work)
        .filter_map(|caps| Some((caps.get(0)?.range(), language_for(&caps["lang"]))))
        .collect();

    let mut languages = Vec::new();
    for (range, language) in found {
        consume(work, range);
        if language != Language::Unknown && !languages.contains(&language) {
            languages.push(language);
        }
    }
    if languages.is_empty() {
        languages.push(Language::Unknown);
    }
    languages
}

fn take_flags(work: &mut String, version: Option<u32>) -> ReleaseFlags {
    let proper = PROPER_REGEX.is_match(work);
    let repack = REPACK_REGEX.is_match(work);
    let real_count = REAL_REGEX.find_iter(work).count() as u32;
    let version = version
        .or_else(|| {
            VERSION_REGEX
                .captures(work)
                .and_then(|caps| number(&caps, "version"))
        })
        .unwrap_or(0);

    for regex in [&*PROPER_REGEX, &*REPACK_REGEX, &*REAL_REGEX, &*VERSION_REGEX] {
        let ranges: Vec<Range<usize>> = regex.find_iter(work).map(|m| m.range()).collect();
        for range in ranges {
            consume(work, range);
        }
    }

    ReleaseFlags {
        proper,
        repack,
        real_count,
        version,
    }
}

fn detect_release_group(title: &str) -> Option<String> {
    let group = GROUP_REGEX
        .captures(title)
        .and_then(|captures| captures.name("group").map(|m| m.as_str().to_string()))?;

    let lowered = group.to_lowercase();
    if NOT_A_GROUP.contains(&lowered.as_str()) || lowered.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(group)
}
