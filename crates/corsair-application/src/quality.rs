// SPDX-License-Identifier: GPL-3.0-or-later
use std::cmp::Ordering;
use std::collections::HashMap;

use corsair_domain::{Quality, QualityDefinition, QualityProfile, QualitySizeOverride};

/// Rank of a quality inside a profile; `None` when the profile does not allow it.
///
/// The profile's own order is authoritative, even when it disagrees with the
/// global catalog.
pub fn profile_rank(quality: Quality, profile: &QualityProfile) -> Option<usize> {
    profile
        .allowed_qualities
        .iter()
        .position(|allowed| *allowed == quality)
}

/// Compare two qualities under a profile. Qualities the profile does not
/// allow rank below every allowed one.
pub fn compare(a: Quality, b: Quality, profile: &QualityProfile) -> Ordering {
    profile_rank(a, profile).cmp(&profile_rank(b, profile))
}

pub fn is_above_cutoff(quality: Quality, profile: &QualityProfile) -> bool {
    compare(quality, profile.cutoff, profile) != Ordering::Less
}

/// Whether a quality sits at the top of the profile.
pub fn is_highest_allowed(quality: Quality, profile: &QualityProfile) -> bool {
    profile.allowed_qualities.last() == Some(&quality)
}

/// Result of checking a release size against its quality definition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeCheck {
    Acceptable,
    /// Runtime or size unknown.
    Skipped,
    TooSmall { size_mb: f64, min_mb: f64 },
    TooLarge { size_mb: f64, max_mb: f64 },
}

/// Quality catalog: built-in definitions with configured size overrides applied.
#[derive(Debug, Clone)]
pub struct QualityCatalog {
    definitions: HashMap<Quality, QualityDefinition>,
}

impl Default for QualityCatalog {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl QualityCatalog {
    pub fn new(overrides: &[QualitySizeOverride]) -> Self {
        let mut definitions: HashMap<Quality, QualityDefinition> = QualityDefinition::defaults()
            .into_iter()
            .map(|def| (def.quality, def))
            .collect();

        for item in overrides {
            if let Some(def) = definitions.get_mut(&item.quality) {
                def.min_size = item.min_size;
                def.preferred_size = item.preferred_size;
                def.max_size = item.max_size;
            }
        }

        Self { definitions }
    }

    pub fn definition(&self, quality: Quality) -> Option<&QualityDefinition> {
        self.definitions.get(&quality)
    }

    /// Check `size_bytes` against the definition's MB-per-minute bounds scaled
    /// by total runtime.
    pub fn check_size(
        &self,
        quality: Quality,
        size_bytes: u64,
        runtime_minutes: Option<u32>,
        episode_count: u32,
    ) -> SizeCheck {
        let Some(runtime) = runtime_minutes.filter(|r| *r > 0) else {
            return SizeCheck::Skipped;
        };
        if size_bytes == 0 {
            return SizeCheck::Skipped;
        }
        let Some(def) = self.definition(quality) else {
            return SizeCheck::Skipped;
        };

        let minutes = f64::from(runtime) * f64::from(episode_count.max(1));
        let size_mb = size_bytes as f64 / (1024.0 * 1024.0);

        if let Some(min) = def.min_size {
            let min_mb = min * minutes;
            if size_mb < min_mb {
                return SizeCheck::TooSmall { size_mb, min_mb };
            }
        }
        if let Some(max) = def.max_size {
            let max_mb = max * minutes;
            if size_mb > max_mb {
                return SizeCheck::TooLarge { size_mb, max_mb };
            }
        }
        SizeCheck::Acceptable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> QualityProfile {
        // intentionally not in global order: WEBDL-1080p ranks above Bluray-1080p
        let mut profile = QualityProfile::new(
            "Web first",
            vec![
                Quality::Hdtv720p,
                Quality::Bluray1080p,
                Quality::WebDl1080p,
            ],
        );
        profile.cutoff = Quality::Bluray1080p;
        profile
    }

    #[test]
    fn compare_follows_profile_order() {
        let profile = profile();
        assert_eq!(
            compare(Quality::WebDl1080p, Quality::Bluray1080p, &profile),
            Ordering::Greater
        );
        assert_eq!(
            compare(Quality::Hdtv720p, Quality::Hdtv720p, &profile),
            Ordering::Equal
        );
        assert_eq!(
            compare(Quality::Remux2160p, Quality::Hdtv720p, &profile),
            Ordering::Less
        );
    }

    #[test]
    fn compare_is_a_total_order() {
        let profile = profile();
        let qualities = [
            Quality::Hdtv720p,
            Quality::Bluray1080p,
            Quality::WebDl1080p,
            Quality::Sdtv,
        ];
        for a in qualities {
            for b in qualities {
                assert_eq!(compare(a, b, &profile), compare(b, a, &profile).reverse());
                for c in qualities {
                    if compare(a, b, &profile) == Ordering::Greater
                        && compare(b, c, &profile) == Ordering::Greater
                    {
                        assert_eq!(compare(a, c, &profile), Ordering::Greater);
                    }
                }
            }
        }
    }

    #[test]
    fn cutoff_uses_profile_rank() {
        let profile = profile();
        assert!(is_above_cutoff(Quality::WebDl1080p, &profile));
        assert!(is_above_cutoff(Quality::Bluray1080p, &profile));
        assert!(!is_above_cutoff(Quality::Hdtv720p, &profile));
        assert!(is_highest_allowed(Quality::WebDl1080p, &profile));
    }

    #[test]
    fn size_check_scales_with_runtime_and_episodes() {
        let catalog = QualityCatalog::default();
        let mb = 1024 * 1024;
        // WEBDL-1080p: 4..130 MB per minute
        assert_eq!(
            catalog.check_size(Quality::WebDl1080p, 1000 * mb, Some(45), 1),
            SizeCheck::Acceptable
        );
        assert!(matches!(
            catalog.check_size(Quality::WebDl1080p, 100 * mb, Some(45), 1),
            SizeCheck::TooSmall { .. }
        ));
        assert!(matches!(
            catalog.check_size(Quality::WebDl1080p, 7000 * mb, Some(45), 1),
            SizeCheck::TooLarge { .. }
        ));
        assert_eq!(
            catalog.check_size(Quality::WebDl1080p, 7000 * mb, Some(45), 2),
            SizeCheck::Acceptable
        );
    }

    #[test]
    fn size_check_skips_unknown_runtime() {
        let catalog = QualityCatalog::default();
        assert_eq!(
            catalog.check_size(Quality::WebDl1080p, 1, None, 1),
            SizeCheck::Skipped
        );
    }

    #[test]
    fn overrides_replace_bounds() {
        let catalog = QualityCatalog::new(&[QualitySizeOverride {
            quality: Quality::WebDl1080p,
            min_size: None,
            preferred_size: None,
            max_size: Some(10.0),
        }]);
        let mb = 1024 * 1024;
        assert!(matches!(
            catalog.check_size(Quality::WebDl1080p, 1000 * mb, Some(45), 1),
            SizeCheck::TooLarge { .. }
        ));
        assert_eq!(
            catalog.check_size(Quality::WebDl1080p, 10 * mb, Some(45), 1),
            SizeCheck::Acceptable
        );
    }
}
