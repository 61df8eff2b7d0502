// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::Result;
use corsair_domain::{BlocklistEntry, TargetRef};
use tokio::sync::RwLock;
use tracing::info;

use crate::repositories::Blocklist;

/// Blocklist kept in process memory.
#[derive(Default)]
pub struct InMemoryBlocklist {
    entries: RwLock<Vec<BlocklistEntry>>,
}

impl InMemoryBlocklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<BlocklistEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait::async_trait]
impl Blocklist for InMemoryBlocklist {
    async fn add(&self, entry: BlocklistEntry) -> Result<()> {
        info!(
            target: "blocklist",
            title = %entry.source_title,
            target_ref = %entry.target,
            reason = %entry.reason,
            "release blocklisted"
        );
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn is_blocklisted(&self, source_title: &str, target: &TargetRef) -> Result<bool> {
        Ok(self.entries.read().await.iter().any(|entry| {
            entry.source_title.eq_ignore_ascii_case(source_title) && entry.target.overlaps(target)
        }))
    }
}
