// SPDX-License-Identifier: GPL-3.0-or-later
//! End-to-end run: torznab feed in, qBittorrent grab, import into the library.

use std::sync::Arc;

use corsair_application::{rss_sync, AppState, Collaborators, InMemoryEventBus, SystemClock};
use corsair_config::{AppConfig, DownloadClientConfig, DownloadClientKind, IndexerConfig, IndexerKind};
use corsair_domain::{Quality, QualityProfile, SeriesId, TargetRef};
use corsair_infrastructure::library::{EpisodeEntry, SeriesEntry};
use corsair_infrastructure::{
    InMemoryBlocklist, InMemoryLibrary, LibrarySnapshot, LibraryStateProvider, PathCheckImporter,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:torznab="http://torznab.com/schemas/2015/feed">
  <channel>
    <item>
      <title>Show.Name.S02E05.1080p.WEB-DL.DDP5.1.x264-GROUP</title>
      <guid>https://tracker.example/details/5</guid>
      <pubDate>Wed, 25 Feb 2026 10:00:00 +0000</pubDate>
      <enclosure url="magnet:?xt=urn:btih:ABCDEF0123456789" length="2000000000" type="application/x-bittorrent"/>
      <torznab:attr name="seeders" value="12"/>
    </item>
    <item>
      <title>Show.Name.S02E05.720p.HDTV.x264-LESSER</title>
      <enclosure url="magnet:?xt=urn:btih:FEDCBA9876543210" length="900000000" type="application/x-bittorrent"/>
    </item>
  </channel>
</rss>"#;

fn library(series_id: SeriesId) -> Arc<InMemoryLibrary> {
    Arc::new(InMemoryLibrary::from_snapshot(LibrarySnapshot {
        series: vec![SeriesEntry {
            id: series_id,
            title: "Show Name".into(),
            alternate_titles: vec![],
            quality_profile: "HD".into(),
            monitored: true,
            runtime_minutes: Some(45),
            episodes: vec![EpisodeEntry {
                season: 2,
                episode: 5,
                absolute_number: None,
                air_date: None,
                monitored: true,
                file: None,
            }],
        }],
        movies: vec![],
    }))
}

fn config(indexer_url: String, client_url: String) -> AppConfig {
    let mut config = AppConfig::default();
    config.quality_profiles = vec![QualityProfile::new(
        "HD",
        vec![Quality::Hdtv720p, Quality::WebDl720p, Quality::WebDl1080p],
    )];
    config.indexers = vec![IndexerConfig {
        name: "tracker".into(),
        kind: IndexerKind::Torznab,
        base_url: indexer_url,
        api_key: Some("secret".into()),
        categories: vec![5000],
        enabled: true,
        rss_interval_secs: None,
    }];
    config.download_clients = vec![DownloadClientConfig {
        name: "qbit".into(),
        kind: DownloadClientKind::QBittorrent,
        base_url: client_url,
        username: None,
        password: None,
        category: Some("tv".into()),
        enabled: true,
    }];
    config
}

#[tokio::test]
async fn rss_release_is_grabbed_downloaded_and_imported() {
    let indexer = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api"))
        .and(query_param("t", "search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .mount(&indexer)
        .await;

    let output = tempfile::tempdir().expect("Failed to create temp dir");
    let episode_file = output.path().join("Show.Name.S02E05.mkv");
    std::fs::write(&episode_file, b"video").expect("Failed to write file");

    let qbit = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/torrents/add"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
        .expect(1)
        .mount(&qbit)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/torrents/info"))
        .and(query_param("hashes", "abcdef0123456789"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "hash": "abcdef0123456789",
            "name": "Show.Name.S02E05.1080p.WEB-DL.DDP5.1.x264-GROUP",
            "progress": 1.0,
            "state": "uploading",
            "amount_left": 0,
            "content_path": output.path().to_string_lossy(),
        }])))
        .mount(&qbit)
        .await;

    let series_id = SeriesId::new();
    let library = library(series_id);
    let events = InMemoryEventBus::new();
    let state = AppState::new(
        config(indexer.uri(), qbit.uri()),
        Collaborators {
            library: library.clone(),
            blocklist: Arc::new(InMemoryBlocklist::new()),
            importer: Arc::new(PathCheckImporter::new(library.clone())),
            events: Arc::new(events.clone()),
            clock: Arc::new(SystemClock),
            http: reqwest::Client::new(),
        },
    )
    .expect("Failed to build app state");

    let outcomes = rss_sync(&state.service, state.indexers[0].as_ref())
        .await
        .expect("rss sync should succeed");
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].is_queued());
    assert!(!outcomes[1].is_queued());

    // grab, then poll the finished torrent and import it
    state.tracker().tick().await;
    state.tracker().tick().await;

    assert!(state.tracker().snapshot().await.is_empty());
    assert_eq!(events.names(), vec!["grabbed".to_string(), "imported".to_string()]);

    let target = TargetRef::episodes(series_id, 2, [5]);
    let file = library
        .current_file(&target)
        .await
        .unwrap()
        .expect("file should be recorded");
    assert_eq!(file.quality, Quality::WebDl1080p);
}
