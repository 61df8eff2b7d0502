// SPDX-License-Identifier: GPL-3.0-or-later
pub mod blocklist;
pub mod importer;
pub mod library;
pub mod repositories;

pub use blocklist::InMemoryBlocklist;
pub use importer::{ImportError, Importer, PathCheckImporter};
pub use library::{InMemoryLibrary, LibrarySnapshot};
pub use repositories::{Blocklist, LibraryStateProvider, TargetDetails, WantedTarget};

use anyhow::{Context, Result};
use corsair_config::AppConfig;
use reqwest::Client;
use std::sync::Arc;
use tracing::info;

/// Shared HTTP client for indexer and download-client adapters. The cookie
/// store keeps download-client sessions alive between calls.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .pool_max_idle_per_host(8)
        .cookie_store(true)
        .user_agent(concat!("corsair/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build http client")
}

/// Build the library adapter, loading the configured snapshot if there is one.
pub async fn init_library(config: &AppConfig) -> Result<Arc<InMemoryLibrary>> {
    let library = match config.library.snapshot_path.as_deref() {
        Some(path) => {
            info!(target: "infrastructure", path = %path.display(), "loading library snapshot");
            InMemoryLibrary::load(path).await?
        }
        None => {
            info!(target: "infrastructure", "no library snapshot configured; starting empty");
            InMemoryLibrary::default()
        }
    };
    Ok(Arc::new(library.with_profiles(config.quality_profiles.clone())))
}
