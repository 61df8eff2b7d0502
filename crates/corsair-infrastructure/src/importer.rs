//! Hand-off of completed downloads to the library.

use std::path::Path;
use std::sync::Arc;

use corsair_domain::{ExistingFile, QueueItem};
use thiserror::Error;
use tracing::info;

use crate::library::InMemoryLibrary;

/// Errors that can occur when handing a download to the library.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("output path does not exist: {0}")]
    MissingOutput(String),

    #[error("output path is empty: {0}")]
    EmptyOutput(String),

    #[error("library update failed: {0}")]
    Library(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
pub trait Importer: Send + Sync {
    async fn import(&self, item: &QueueItem, output_path: &str) -> Result<(), ImportError>;
}

/// Importer that verifies the client's output exists and records the new file
/// in the in-memory library. Renaming and moving files is left to the media
/// server.
pub struct PathCheckImporter {
    library: Arc<InMemoryLibrary>,
}

impl PathCheckImporter {
    pub fn new(library: Arc<InMemoryLibrary>) -> Self {
        Self { library }
    }
}

async fn has_content(path: &Path) -> Result<bool, ImportError> {
    let metadata = tokio::fs::metadata(path).await?;
    if metadata.is_file() {
        return Ok(metadata.len() > 0);
    }
    let mut entries = tokio::fs::read_dir(path).await?;
    Ok(entries.next_entry().await?.is_some())
}

#[async_trait::async_trait]
impl Importer for PathCheckImporter {
    async fn import(&self, item: &QueueItem, output_path: &str) -> Result<(), ImportError> {
        let path = Path::new(output_path);
        if !tokio::fs::try_exists(path).await? {
            return Err(ImportError::MissingOutput(output_path.to_string()));
        }
        if !has_content(path).await? {
            return Err(ImportError::EmptyOutput(output_path.to_string()));
        }

        self.library
            .record_file(
                &item.target,
                ExistingFile {
                    quality: item.quality,
                    custom_format_score: item.custom_format_score,
                    revision: item.release.revision(),
                },
            )
            .await
            .map_err(|e| ImportError::Library(e.to_string()))?;

        info!(
            target: "import",
            queue_item_id = %item.id,
            target_ref = %item.target,
            path = %output_path,
            "download imported"
        );
        Ok(())
    }
}
