use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corsair_config::{IndexerConfig, IndexerKind};
use corsair_domain::{IndexerFlag, Protocol};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::release_parsing::IndexerHints;

/// A release as an indexer reported it, before any parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub title: String,
    pub download_url: String,
    pub guid: Option<String>,
    pub size_bytes: Option<u64>,
    pub published_at: Option<DateTime<Utc>>,
    pub protocol: Protocol,
    pub indexer: String,
    pub indexer_flags: Vec<IndexerFlag>,
    pub seeders: Option<u32>,
}

impl RawCandidate {
    pub fn hints(&self) -> IndexerHints {
        IndexerHints {
            size_bytes: self.size_bytes,
            indexer: Some(self.indexer.clone()),
            published_at: self.published_at,
            indexer_flags: self.indexer_flags.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerSearchQuery {
    pub query: String,
    pub limit: Option<usize>,
}

impl IndexerSearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timed out")]
    Timeout,
    #[error("indexer responded with status {status}")]
    HttpStatus { status: u16 },
    #[error("indexer error {code}: {description}")]
    Api { code: String, description: String },
    #[error("feed parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for IndexerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(err.to_string())
        }
    }
}

#[async_trait]
pub trait IndexerClient: Send + Sync {
    fn config(&self) -> &IndexerConfig;

    fn name(&self) -> &str {
        &self.config().name
    }

    async fn search(&self, query: &IndexerSearchQuery) -> Result<Vec<RawCandidate>, IndexerError>;

    async fn fetch_rss(&self) -> Result<Vec<RawCandidate>, IndexerError>;

    async fn test_connection(&self) -> Result<(), IndexerError>;
}

pub fn build_indexer(
    config: &IndexerConfig,
    client: Client,
    timeout: Duration,
) -> Arc<dyn IndexerClient> {
    match config.kind {
        IndexerKind::Newznab | IndexerKind::Torznab => {
            Arc::new(TorznabIndexer::new(config.clone(), client).with_timeout(timeout))
        }
    }
}

/// Newznab/Torznab API client. Both speak the same query dialect and return
/// RSS with `newznab:attr`/`torznab:attr` extensions.
pub struct TorznabIndexer {
    config: IndexerConfig,
    client: Client,
    timeout: Duration,
}

impl TorznabIndexer {
    pub fn new(config: IndexerConfig, client: Client) -> Self {
        Self {
            config,
            client,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn protocol(&self) -> Protocol {
        match self.config.kind {
            IndexerKind::Newznab => Protocol::Usenet,
            IndexerKind::Torznab => Protocol::Torrent,
        }
    }

    async fn get(&self, params: Vec<(&str, String)>) -> Result<String, IndexerError> {
        let url = format!("{}/api", self.config.base_url.trim_end_matches('/'));
        let mut params = params;
        if let Some(api_key) = &self.config.api_key {
            params.push(("apikey", api_key.clone()));
        }

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IndexerError::HttpStatus {
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }

    fn category_param(&self) -> Option<(&'static str, String)> {
        if self.config.categories.is_empty() {
            return None;
        }
        let joined = self
            .config
            .categories
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        Some(("cat", joined))
    }

    async fn query(&self, query: Option<&IndexerSearchQuery>) -> Result<Vec<RawCandidate>, IndexerError> {
        let mut params = vec![("t", "search".to_string())];
        if let Some(query) = query {
            params.push(("q", query.query.clone()));
            if let Some(limit) = query.limit {
                params.push(("limit", limit.to_string()));
            }
        }
        params.extend(self.category_param());

        let body = self.get(params).await?;
        let candidates = parse_feed(&body, &self.config.name, self.protocol())?;
        debug!(
            target: "indexer",
            indexer = %self.config.name,
            query = query.map(|q| q.query.as_str()).unwrap_or("<rss>"),
            results = candidates.len(),
            "indexer query complete"
        );
        Ok(candidates)
    }
}

#[async_trait]
impl IndexerClient for TorznabIndexer {
    fn config(&self) -> &IndexerConfig {
        &self.config
    }

    async fn search(&self, query: &IndexerSearchQuery) -> Result<Vec<RawCandidate>, IndexerError> {
        self.query(Some(query)).await
    }

    async fn fetch_rss(&self) -> Result<Vec<RawCandidate>, IndexerError> {
        self.query(None).await
    }

    async fn test_connection(&self) -> Result<(), IndexerError> {
        let body = self.get(vec![("t", "caps".to_string())]).await?;
        if let Some(error) = api_error(&body)? {
            return Err(error);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ItemBuilder {
    title: Option<String>,
    guid: Option<String>,
    link: Option<String>,
    enclosure: Option<String>,
    magnet: Option<String>,
    size: Option<u64>,
    published_at: Option<DateTime<Utc>>,
    seeders: Option<u32>,
    flags: Vec<IndexerFlag>,
}

impl ItemBuilder {
    fn set_attr(&mut self, name: &str, value: &str) {
        match name {
            "size" => {
                if let Ok(size) = value.parse() {
                    self.size = Some(size);
                }
            }
            "seeders" => self.seeders = value.parse().ok(),
            "magneturl" => self.magnet = Some(value.to_string()),
            "downloadvolumefactor" => match value.parse::<f32>() {
                Ok(factor) if factor == 0.0 => self.flags.push(IndexerFlag::Freeleech),
                Ok(factor) if factor > 0.0 && factor < 1.0 => {
                    self.flags.push(IndexerFlag::Halfleech)
                }
                _ => {}
            },
            "uploadvolumefactor" => {
                if value.parse::<f32>().is_ok_and(|factor| factor >= 2.0) {
                    self.flags.push(IndexerFlag::DoubleUpload);
                }
            }
            "tag" => match value.to_lowercase().as_str() {
                "internal" => self.flags.push(IndexerFlag::Internal),
                "scene" => self.flags.push(IndexerFlag::Scene),
                "freeleech" => self.flags.push(IndexerFlag::Freeleech),
                _ => {}
            },
            _ => {}
        }
    }

    fn read_enclosure(&mut self, element: &BytesStart<'_>) {
        for attr in element.attributes().flatten() {
            let value = String::from_utf8_lossy(&attr.value).to_string();
            match attr.key.as_ref() {
                b"url" => self.enclosure = Some(value),
                b"length" => {
                    if self.size.is_none() {
                        self.size = value.parse().ok().filter(|size| *size > 0);
                    }
                }
                _ => {}
            }
        }
    }

    fn read_attr(&mut self, element: &BytesStart<'_>) {
        let mut name = String::new();
        let mut value = String::new();
        for attr in element.attributes().flatten() {
            match attr.key.as_ref() {
                b"name" => name = String::from_utf8_lossy(&attr.value).to_string(),
                b"value" => value = String::from_utf8_lossy(&attr.value).to_string(),
                _ => {}
            }
        }
        self.set_attr(&name, &value);
    }

    fn build(self, indexer: &str, protocol: Protocol) -> Option<RawCandidate> {
        let title = self.title.filter(|title| !title.trim().is_empty())?;
        let download_url = self.enclosure.or(self.link).or(self.magnet)?;
        let mut flags = self.flags;
        flags.sort_by_key(|flag| *flag as u8);
        flags.dedup();
        Some(RawCandidate {
            title,
            download_url,
            guid: self.guid,
            size_bytes: self.size,
            published_at: self.published_at,
            protocol,
            indexer: indexer.to_string(),
            indexer_flags: flags,
            seeders: self.seeders,
        })
    }
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

fn is_attr(name: &[u8]) -> bool {
    name == b"newznab:attr" || name == b"torznab:attr"
}

/// `<error code=".." description=".."/>` responses.
fn api_error(xml: &str) -> Result<Option<IndexerError>, IndexerError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) if e.name().as_ref() == b"error" => {
                let mut code = String::new();
                let mut description = String::new();
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"code" => code = String::from_utf8_lossy(&attr.value).to_string(),
                        b"description" => {
                            description = String::from_utf8_lossy(&attr.value).to_string()
                        }
                        _ => {}
                    }
                }
                return Ok(Some(IndexerError::Api { code, description }));
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(IndexerError::Parse(e.to_string())),
            _ => {}
        }
    }
}

/// Parse a Newznab/Torznab RSS response. Items without a title or download
/// link are skipped.
pub fn parse_feed(
    xml: &str,
    indexer: &str,
    protocol: Protocol,
) -> Result<Vec<RawCandidate>, IndexerError> {
    if let Some(error) = api_error(xml)? {
        return Err(error);
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut candidates = Vec::new();
    let mut current: Option<ItemBuilder> = None;
    let mut current_tag = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = e.name().as_ref().to_vec();
                if name == b"item" {
                    current = Some(ItemBuilder::default());
                } else if let Some(item) = current.as_mut() {
                    if is_attr(&name) {
                        item.read_attr(e);
                    } else if name == b"enclosure" {
                        item.read_enclosure(e);
                    }
                }
                current_tag = name;
            }
            Ok(Event::Empty(ref e)) => {
                if let Some(item) = current.as_mut() {
                    let name = e.name();
                    if is_attr(name.as_ref()) {
                        item.read_attr(e);
                    } else if name.as_ref() == b"enclosure" {
                        item.read_enclosure(e);
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some(item) = current.as_mut() {
                    let text = e
                        .unescape()
                        .map_err(|err| IndexerError::Parse(err.to_string()))?
                        .to_string();
                    set_text(item, &current_tag, text);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(item) = current.as_mut() {
                    let text = String::from_utf8_lossy(e).to_string();
                    set_text(item, &current_tag, text);
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"item" {
                    if let Some(item) = current.take() {
                        candidates.extend(item.build(indexer, protocol));
                    }
                }
                current_tag.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(IndexerError::Parse(e.to_string())),
            _ => {}
        }
    }

    Ok(candidates)
}

fn set_text(item: &mut ItemBuilder, tag: &[u8], text: String) {
    if text.is_empty() {
        return;
    }
    match tag {
        b"title" => item.title = Some(text),
        b"guid" => item.guid = Some(text),
        b"link" => item.link = Some(text),
        b"pubDate" => item.published_at = parse_date(&text),
        b"size" => item.size = text.parse().ok(),
        _ => {}
    }
}
