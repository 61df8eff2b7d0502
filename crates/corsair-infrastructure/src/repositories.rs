// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::Result;
use corsair_domain::{BlocklistEntry, ExistingFile, ParsedRelease, TargetRef};
use serde::{Deserialize, Serialize};

// ============================================================================
// Library State
// ============================================================================

/// Per-target settings the decision engine needs beyond the existing file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDetails {
    pub quality_profile: String,
    /// Runtime of a single episode (or the movie); `None` skips size checks.
    pub runtime_minutes: Option<u32>,
}

/// A monitored target that has no file yet, plus the text to search for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantedTarget {
    pub target: TargetRef,
    pub search_term: String,
}

/// Read-only view of the media library
#[async_trait::async_trait]
pub trait LibraryStateProvider: Send + Sync {
    async fn current_file(&self, target: &TargetRef) -> Result<Option<ExistingFile>>;
    async fn is_monitored(&self, target: &TargetRef) -> Result<bool>;
    /// Resolve the library entity a parsed release refers to.
    async fn find_target(&self, release: &ParsedRelease) -> Result<Option<TargetRef>>;
    async fn describe(&self, target: &TargetRef) -> Result<TargetDetails>;
    async fn wanted(&self) -> Result<Vec<WantedTarget>>;
}

// ============================================================================
// Blocklist
// ============================================================================

/// Sink and lookup for releases that must not be grabbed again
#[async_trait::async_trait]
pub trait Blocklist: Send + Sync {
    async fn add(&self, entry: BlocklistEntry) -> Result<()>;
    async fn is_blocklisted(&self, source_title: &str, target: &TargetRef) -> Result<bool>;
}
