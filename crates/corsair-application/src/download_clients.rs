use async_trait::async_trait;
use corsair_config::{DownloadClientConfig, DownloadClientKind};
use corsair_domain::Protocol;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const TAG_PREFIX: &str = "corsair-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Queued,
    Downloading,
    Paused,
    Stalled,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadStatus {
    pub state: DownloadState,
    /// 0.0 to 1.0
    pub progress: f32,
    pub size_left: u64,
    pub output_path: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddDownloadRequest {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Error)]
pub enum DownloadClientError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timed out")]
    Timeout,
    #[error("authentication failed")]
    Authentication,
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),
    #[error("download client responded with status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("deserialization failed: {0}")]
    Deserialization(String),
    #[error("download {0} not found in client")]
    NotFound(String),
    #[error("download client rejected the release: {0}")]
    Rejected(String),
}

impl DownloadClientError {
    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout | Self::NotFound(_) => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Authentication
            | Self::InvalidBaseUrl(_)
            | Self::Deserialization(_)
            | Self::Rejected(_) => false,
        }
    }
}

impl From<reqwest::Error> for DownloadClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(err.to_string())
        }
    }
}

#[async_trait]
pub trait DownloadClient: Send + Sync {
    fn name(&self) -> &str;

    fn protocol(&self) -> Protocol;

    async fn test_connection(&self) -> Result<(), DownloadClientError>;

    /// Hand a release to the client. Returns the id later used for status and removal.
    async fn add(&self, request: &AddDownloadRequest) -> Result<String, DownloadClientError>;

    async fn status(&self, download_id: &str) -> Result<DownloadStatus, DownloadClientError>;

    async fn remove(&self, download_id: &str, delete_data: bool)
        -> Result<(), DownloadClientError>;
}

pub fn build_download_client(
    config: &DownloadClientConfig,
    client: Client,
    timeout: Duration,
) -> Arc<dyn DownloadClient> {
    match config.kind {
        DownloadClientKind::QBittorrent => {
            Arc::new(QBittorrentClient::new(config, client).with_timeout(timeout))
        }
    }
}

pub struct QBittorrentClient {
    name: String,
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    category: Option<String>,
    timeout: Duration,
}

impl QBittorrentClient {
    pub fn new(config: &DownloadClientConfig, client: Client) -> Self {
        Self {
            name: config.name.clone(),
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            category: config.category.clone(),
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, DownloadClientError> {
        Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|err| DownloadClientError::InvalidBaseUrl(err.to_string()))
    }

    async fn authenticate_if_configured(&self) -> Result<(), DownloadClientError> {
        let Some(username) = self.username.as_deref() else {
            return Ok(());
        };
        let Some(password) = self.password.as_deref() else {
            return Ok(());
        };

        let url = self.endpoint("/api/v2/auth/login")?;
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(DownloadClientError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim() != "Ok." {
            return Err(DownloadClientError::Authentication);
        }

        Ok(())
    }

    async fn post_form(
        &self,
        path: &str,
        form: &HashMap<&str, String>,
    ) -> Result<String, DownloadClientError> {
        self.authenticate_if_configured().await?;
        let url = self.endpoint(path)?;

        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(DownloadClientError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }

    async fn torrents(&self, query: &[(&str, &str)]) -> Result<Vec<QBittorrentTorrent>, DownloadClientError> {
        self.authenticate_if_configured().await?;
        let url = self.endpoint("/api/v2/torrents/info")?;

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(DownloadClientError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| DownloadClientError::Deserialization(e.to_string()))
    }

    async fn find(&self, download_id: &str) -> Result<QBittorrentTorrent, DownloadClientError> {
        let query = if download_id.starts_with(TAG_PREFIX) {
            ("tag", download_id)
        } else {
            ("hashes", download_id)
        };
        self.torrents(&[query])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DownloadClientError::NotFound(download_id.to_string()))
    }
}

/// Info-hash of a magnet link, lowercased.
fn magnet_hash(url: &str) -> Option<String> {
    if !url.starts_with("magnet:") {
        return None;
    }
    let start = url.find("xt=urn:btih:")? + "xt=urn:btih:".len();
    let hash: String = url[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    (!hash.is_empty()).then(|| hash.to_lowercase())
}

#[async_trait]
impl DownloadClient for QBittorrentClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> Protocol {
        Protocol::Torrent
    }

    async fn test_connection(&self) -> Result<(), DownloadClientError> {
        self.authenticate_if_configured().await?;
        let url = self.endpoint("/api/v2/app/version")?;

        let response = self.client.get(url).timeout(self.timeout).send().await?;

        if !response.status().is_success() {
            return Err(DownloadClientError::HttpStatus {
                status: response.status().as_u16(),
                body: response.text().await?,
            });
        }

        Ok(())
    }

    async fn add(&self, request: &AddDownloadRequest) -> Result<String, DownloadClientError> {
        // the tag lets a torrent added from a .torrent url be found again
        let tag = format!("{}{}", TAG_PREFIX, Uuid::new_v4().simple());

        let mut form = HashMap::new();
        form.insert("urls", request.url.clone());
        form.insert("tags", tag.clone());
        if let Some(category) = self.category.clone() {
            form.insert("category", category);
        }

        let body = self.post_form("/api/v2/torrents/add", &form).await?;
        if body.trim() == "Fails." {
            return Err(DownloadClientError::Rejected(request.title.clone()));
        }

        if let Some(hash) = magnet_hash(&request.url) {
            debug!(target: "download_client", client = %self.name, %hash, "magnet added");
            return Ok(hash);
        }

        let id = match self.torrents(&[("tag", tag.as_str())]).await?.into_iter().next() {
            Some(torrent) => torrent.hash,
            None => tag,
        };
        debug!(target: "download_client", client = %self.name, download_id = %id, "torrent added");
        Ok(id)
    }

    async fn status(&self, download_id: &str) -> Result<DownloadStatus, DownloadClientError> {
        let torrent = self.find(download_id).await?;
        let state = map_qbittorrent_state(&torrent.state);
        let output_path = torrent
            .content_path
            .filter(|path| !path.trim().is_empty())
            .or_else(|| {
                torrent
                    .save_path
                    .filter(|path| !path.trim().is_empty())
                    .map(|path| format!("{}/{}", path.trim_end_matches('/'), torrent.name))
            });

        Ok(DownloadStatus {
            state,
            progress: torrent.progress.clamp(0.0, 1.0),
            size_left: torrent.amount_left,
            output_path,
            message: (state == DownloadState::Failed).then(|| torrent.state.clone()),
        })
    }

    async fn remove(
        &self,
        download_id: &str,
        delete_data: bool,
    ) -> Result<(), DownloadClientError> {
        let hash = if download_id.starts_with(TAG_PREFIX) {
            self.find(download_id).await?.hash
        } else {
            download_id.to_string()
        };

        let mut form = HashMap::new();
        form.insert("hashes", hash);
        form.insert("deleteFiles", delete_data.to_string());

        self.post_form("/api/v2/torrents/delete", &form).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct QBittorrentTorrent {
    hash: String,
    name: String,
    #[serde(default)]
    progress: f32,
    #[serde(default)]
    state: String,
    #[serde(default)]
    amount_left: u64,
    #[serde(default)]
    save_path: Option<String>,
    #[serde(default)]
    content_path: Option<String>,
}

fn map_qbittorrent_state(state: &str) -> DownloadState {
    match state {
        "error" | "missingFiles" => DownloadState::Failed,
        "uploading" | "stalledUP" | "pausedUP" | "stoppedUP" | "queuedUP" | "forcedUP"
        | "checkingUP" => DownloadState::Completed,
        "pausedDL" | "stoppedDL" => DownloadState::Paused,
        "stalledDL" => DownloadState::Stalled,
        "queuedDL" => DownloadState::Queued,
        _ => DownloadState::Downloading,
    }
}
