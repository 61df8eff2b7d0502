// SPDX-License-Identifier: GPL-3.0-or-later
//! Custom format matching.
//!
//! A format matches when every one of its specifications matches, so a
//! failed `required` specification always rules the format out. `negate`
//! inverts a single specification before the combination.

use corsair_domain::{
    CustomFormat, CustomFormatSpecification, ParsedRelease, SpecificationKind,
};
use regex::{Regex, RegexBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CustomFormatError {
    #[error("custom format '{format}' has an invalid pattern in '{specification}': {message}")]
    InvalidPattern {
        format: String,
        specification: String,
        message: String,
    },
}

#[derive(Debug, Clone)]
enum Matcher {
    Title(Regex),
    Group(Regex),
    Other,
}

#[derive(Debug, Clone)]
struct CompiledSpecification {
    spec: CustomFormatSpecification,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
struct CompiledFormat {
    name: String,
    score: i32,
    specifications: Vec<CompiledSpecification>,
}

/// Formats matched by a release and their summed score.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormatMatch {
    pub score: i32,
    pub matched: Vec<String>,
}

/// Compiled set of custom formats, shared by every decision.
#[derive(Debug, Clone, Default)]
pub struct CustomFormatEngine {
    formats: Vec<CompiledFormat>,
}

fn compile(pattern: &str, format: &str, spec: &str) -> Result<Regex, CustomFormatError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| CustomFormatError::InvalidPattern {
            format: format.to_string(),
            specification: spec.to_string(),
            message: e.to_string(),
        })
}

impl CustomFormatEngine {
    pub fn new(formats: &[CustomFormat]) -> Result<Self, CustomFormatError> {
        let mut compiled = Vec::with_capacity(formats.len());
        for format in formats {
            let mut specifications = Vec::with_capacity(format.specifications.len());
            for spec in &format.specifications {
                let matcher = match &spec.kind {
                    SpecificationKind::ReleaseTitle { pattern } => {
                        Matcher::Title(compile(pattern, &format.name, &spec.name)?)
                    }
                    SpecificationKind::ReleaseGroup { pattern } => {
                        Matcher::Group(compile(pattern, &format.name, &spec.name)?)
                    }
                    _ => Matcher::Other,
                };
                specifications.push(CompiledSpecification {
                    spec: spec.clone(),
                    matcher,
                });
            }
            compiled.push(CompiledFormat {
                name: format.name.clone(),
                score: format.score,
                specifications,
            });
        }
        Ok(Self { formats: compiled })
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Match every format against the release. Pure: the same release always
    /// yields the same result.
    pub fn evaluate(&self, release: &ParsedRelease) -> FormatMatch {
        let mut result = FormatMatch::default();
        for format in &self.formats {
            if format_matches(format, release) {
                result.score += format.score;
                result.matched.push(format.name.clone());
            }
        }
        result
    }
}

fn format_matches(format: &CompiledFormat, release: &ParsedRelease) -> bool {
    !format.specifications.is_empty()
        && format
            .specifications
            .iter()
            .all(|spec| specification_matches(spec, release))
}

fn specification_matches(spec: &CompiledSpecification, release: &ParsedRelease) -> bool {
    let raw = match (&spec.matcher, &spec.spec.kind) {
        (Matcher::Title(regex), _) => regex.is_match(&release.title),
        (Matcher::Group(regex), _) => release
            .release_group
            .as_deref()
            .is_some_and(|group| regex.is_match(group)),
        (Matcher::Other, SpecificationKind::IndexerFlag { flag }) => {
            release.indexer_flags.contains(flag)
        }
        (Matcher::Other, SpecificationKind::Language { language }) => {
            release.languages.contains(language)
        }
        (Matcher::Other, SpecificationKind::Source { source }) => release.source == *source,
        (Matcher::Other, SpecificationKind::Resolution { resolution }) => {
            release.resolution == *resolution
        }
        (Matcher::Other, SpecificationKind::QualityModifier { modifier }) => {
            release.modifier == Some(*modifier)
        }
        (Matcher::Other, SpecificationKind::Size { min_gb, max_gb }) => {
            let size_gb = release.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
            size_gb > *min_gb && size_gb <= *max_gb
        }
        (Matcher::Other, _) => false,
    };
    raw != spec.spec.negate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release_parsing::{parse_release_title, IndexerHints};
    use corsair_domain::{IndexerFlag, Language, Protocol, Source};

    fn spec(name: &str, kind: SpecificationKind) -> CustomFormatSpecification {
        CustomFormatSpecification {
            name: name.into(),
            negate: false,
            required: false,
            kind,
        }
    }

    fn title(pattern: &str) -> SpecificationKind {
        SpecificationKind::ReleaseTitle {
            pattern: pattern.into(),
        }
    }

    fn parse(title: &str, flags: Vec<IndexerFlag>) -> ParsedRelease {
        parse_release_title(
            title,
            Protocol::Torrent,
            &IndexerHints {
                size_bytes: Some(3 * 1024 * 1024 * 1024),
                indexer_flags: flags,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn sums_scores_of_matching_formats() {
        let engine = CustomFormatEngine::new(&[
            CustomFormat {
                name: "x265".into(),
                score: 50,
                specifications: vec![spec("hevc", title(r"\b(x265|hevc)\b"))],
            },
            CustomFormat {
                name: "Freeleech".into(),
                score: 10,
                specifications: vec![spec(
                    "fl",
                    SpecificationKind::IndexerFlag {
                        flag: IndexerFlag::Freeleech,
                    },
                )],
            },
            CustomFormat {
                name: "German".into(),
                score: -100,
                specifications: vec![spec(
                    "de",
                    SpecificationKind::Language {
                        language: Language::German,
                    },
                )],
            },
        ])
        .unwrap();

        let release = parse(
            "Show.S01E01.1080p.WEB-DL.x265-GRP",
            vec![IndexerFlag::Freeleech],
        );
        let result = engine.evaluate(&release);
        assert_eq!(result.score, 60);
        assert_eq!(result.matched, vec!["x265".to_string(), "Freeleech".to_string()]);
        assert_eq!(engine.evaluate(&release), result);
    }

    #[test]
    fn different_kinds_are_and_combined() {
        let engine = CustomFormatEngine::new(&[CustomFormat {
            name: "WEB x265".into(),
            score: 20,
            specifications: vec![
                spec("codec", title("x265")),
                spec("source", SpecificationKind::Source { source: Source::Web }),
            ],
        }])
        .unwrap();

        assert_eq!(engine.evaluate(&parse("Show.S01E01.1080p.WEB-DL.x265-GRP", vec![])).score, 20);
        assert_eq!(engine.evaluate(&parse("Show.S01E01.1080p.BluRay.x265-GRP", vec![])).score, 0);
    }

    #[test]
    fn every_specification_must_match() {
        let groups = CustomFormatEngine::new(&[CustomFormat {
            name: "Groups".into(),
            score: 5,
            specifications: vec![
                spec("a", SpecificationKind::ReleaseGroup { pattern: "^AAA$".into() }),
                spec("b", SpecificationKind::ReleaseGroup { pattern: "^BBB$".into() }),
            ],
        }])
        .unwrap();
        assert_eq!(groups.evaluate(&parse("Show.S01E01.720p.HDTV-BBB", vec![])).score, 0);

        let mut required_group = spec("group", SpecificationKind::ReleaseGroup { pattern: "^BBB$".into() });
        required_group.required = true;
        let required = CustomFormatEngine::new(&[CustomFormat {
            name: "BBB HDTV".into(),
            score: 5,
            specifications: vec![
                required_group,
                spec("tv", SpecificationKind::Source { source: Source::Tv }),
            ],
        }])
        .unwrap();
        assert_eq!(required.evaluate(&parse("Show.S01E01.720p.HDTV-BBB", vec![])).score, 5);
        assert_eq!(required.evaluate(&parse("Show.S01E01.720p.HDTV-AAA", vec![])).score, 0);
    }

    #[test]
    fn negate_inverts_a_specification() {
        let mut not_hdtv = spec("no tv", SpecificationKind::Source { source: Source::Tv });
        not_hdtv.negate = true;
        let engine = CustomFormatEngine::new(&[CustomFormat {
            name: "Not TV".into(),
            score: 15,
            specifications: vec![not_hdtv],
        }])
        .unwrap();

        assert_eq!(engine.evaluate(&parse("Show.S01E01.720p.HDTV-GRP", vec![])).score, 0);
        assert_eq!(engine.evaluate(&parse("Show.S01E01.720p.WEB-DL-GRP", vec![])).score, 15);
    }

    #[test]
    fn size_specification_uses_gigabytes() {
        let engine = CustomFormatEngine::new(&[CustomFormat {
            name: "Small".into(),
            score: 3,
            specifications: vec![spec(
                "size",
                SpecificationKind::Size {
                    min_gb: 1.0,
                    max_gb: 4.0,
                },
            )],
        }])
        .unwrap();
        assert_eq!(engine.evaluate(&parse("Show.S01E01.720p.HDTV-GRP", vec![])).score, 3);
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = CustomFormatEngine::new(&[CustomFormat {
            name: "Broken".into(),
            score: 1,
            specifications: vec![spec("bad", title("(unclosed"))],
        }])
        .unwrap_err();
        assert!(err.to_string().contains("Broken"));
    }
}
