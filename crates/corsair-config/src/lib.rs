// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::{Path, PathBuf};

use anyhow::Result;
use corsair_domain::{
    CustomFormat, DelayProfile, Quality, QualityProfile, QualitySizeOverride, Validate,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub max_concurrent_jobs: usize,
    /// Fallback RSS interval for indexers that do not set their own.
    pub rss_interval_secs: u64,
    pub backlog_interval_secs: u64,
    pub tracker_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 8,
            rss_interval_secs: 900,
            backlog_interval_secs: 6 * 60 * 60,
            tracker_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    pub max_concurrent_decisions: usize,
    pub max_concurrent_polls: usize,
    pub max_failures: u32,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub max_import_attempts: u32,
    pub indexer_timeout_secs: u64,
    pub download_client_timeout_secs: u64,
    /// Usenet posts younger than this are held back.
    pub minimum_age_minutes: u32,
    /// Usenet posts older than this are rejected; 0 disables the check.
    pub retention_days: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_decisions: 4,
            max_concurrent_polls: 4,
            max_failures: 3,
            retry_base_delay_secs: 30,
            retry_max_delay_secs: 60 * 60,
            max_import_attempts: 3,
            indexer_timeout_secs: 30,
            download_client_timeout_secs: 15,
            minimum_age_minutes: 0,
            retention_days: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerKind {
    Newznab,
    Torznab,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub name: String,
    pub kind: IndexerKind,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub categories: Vec<u32>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub rss_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadClientKind {
    QBittorrent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadClientConfig {
    pub name: String,
    pub kind: DownloadClientKind,
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LibraryConfig {
    pub snapshot_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_quality_profiles() -> Vec<QualityProfile> {
    let mut profile = QualityProfile::new(
        "HD-1080p",
        vec![
            Quality::Hdtv720p,
            Quality::WebRip720p,
            Quality::WebDl720p,
            Quality::Bluray720p,
            Quality::Hdtv1080p,
            Quality::WebRip1080p,
            Quality::WebDl1080p,
            Quality::Bluray1080p,
        ],
    );
    profile.cutoff = Quality::WebDl1080p;
    vec![profile]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub telemetry: TelemetryConfig,
    pub scheduler: SchedulerConfig,
    pub acquisition: AcquisitionConfig,
    pub delay_profile: DelayProfile,
    pub quality_profiles: Vec<QualityProfile>,
    pub custom_formats: Vec<CustomFormat>,
    pub quality_definitions: Vec<QualitySizeOverride>,
    pub indexers: Vec<IndexerConfig>,
    pub download_clients: Vec<DownloadClientConfig>,
    pub library: LibraryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            telemetry: TelemetryConfig::default(),
            scheduler: SchedulerConfig::default(),
            acquisition: AcquisitionConfig::default(),
            delay_profile: DelayProfile::default(),
            quality_profiles: default_quality_profiles(),
            custom_formats: Vec::new(),
            quality_definitions: Vec::new(),
            indexers: Vec::new(),
            download_clients: Vec::new(),
            library: LibraryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Check profiles, custom formats and collaborator entries. Every problem
    /// is reported, not just the first.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.quality_profiles.is_empty() {
            errors.push("quality_profiles: at least one profile is required".to_string());
        }
        for profile in &self.quality_profiles {
            if let Err(errs) = profile.validate() {
                errors.extend(
                    errs.into_iter()
                        .map(|e| format!("quality profile '{}': {}: {}", profile.name, e.field, e.message)),
                );
            }
        }
        for format in &self.custom_formats {
            if let Err(errs) = format.validate() {
                errors.extend(
                    errs.into_iter()
                        .map(|e| format!("custom format '{}': {}: {}", format.name, e.field, e.message)),
                );
            }
        }
        for def in &self.quality_definitions {
            if let (Some(min), Some(max)) = (def.min_size, def.max_size) {
                if max < min {
                    errors.push(format!(
                        "quality definition '{}': max_size is below min_size",
                        def.quality
                    ));
                }
            }
        }
        for indexer in &self.indexers {
            if indexer.base_url.trim().is_empty() {
                errors.push(format!("indexer '{}': base_url cannot be empty", indexer.name));
            }
        }
        for client in &self.download_clients {
            if client.base_url.trim().is_empty() {
                errors.push(format!(
                    "download client '{}': base_url cannot be empty",
                    client.name
                ));
            }
        }
        if self.acquisition.max_failures == 0 {
            errors.push("acquisition.max_failures must be at least 1".to_string());
        }
        if self.acquisition.max_concurrent_decisions == 0
            || self.acquisition.max_concurrent_polls == 0
        {
            errors.push("acquisition pool sizes must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Load configuration from defaults, optional TOML file, and environment overrides (prefix: CORSAIR_).
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("CORSAIR_").split("__"));

    let config: AppConfig = figment.extract()?;
    info!(
        target: "config",
        indexers = config.indexers.len(),
        download_clients = config.download_clients.len(),
        "configuration loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.acquisition.max_failures, 3);
    }

    #[test]
    fn load_merges_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[telemetry]
log_level = "debug"

[acquisition]
max_failures = 5

[[indexers]]
name = "tracker"
kind = "torznab"
base_url = "http://localhost:9117/api"
categories = [5000, 5040]

[[download_clients]]
name = "qbit"
kind = "qbittorrent"
base_url = "http://localhost:8080"
username = "admin"
"#
        )
        .unwrap();

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.acquisition.max_failures, 5);
        // untouched keys keep their defaults
        assert_eq!(config.acquisition.max_import_attempts, 3);
        assert_eq!(config.indexers.len(), 1);
        assert_eq!(config.indexers[0].kind, IndexerKind::Torznab);
        assert!(config.indexers[0].enabled);
        assert_eq!(config.indexers[0].categories, vec![5000, 5040]);
        assert_eq!(config.download_clients[0].kind, DownloadClientKind::QBittorrent);
    }

    #[test]
    fn load_reads_profiles_and_custom_formats() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[quality_profiles]]
name = "UHD"
allowed_qualities = ["WEBDL-1080p", "WEBDL-2160p"]
cutoff = "WEBDL-2160p"
upgrade_allowed = true
min_format_score = 0

[[custom_formats]]
name = "x265"
score = 50

[[custom_formats.specifications]]
name = "codec"
kind = "release_title"
pattern = "(?i)x265|hevc"
"#
        )
        .unwrap();

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.quality_profiles.len(), 1);
        assert_eq!(config.quality_profiles[0].cutoff, Quality::WebDl2160p);
        assert_eq!(config.custom_formats[0].score, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_collects_every_problem() {
        let mut config = AppConfig::default();
        config.quality_profiles[0].cutoff = Quality::Remux2160p;
        config.acquisition.max_failures = 0;
        config.indexers.push(IndexerConfig {
            name: "empty".into(),
            kind: IndexerKind::Newznab,
            base_url: " ".into(),
            api_key: None,
            categories: vec![],
            enabled: true,
            rss_interval_secs: None,
        });

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("cutoff")));
    }
}
