// SPDX-License-Identifier: GPL-3.0-or-later
//! Per-target serialization of decisions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use corsair_domain::TargetKey;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async lock per [`TargetKey`]. Decisions for different keys
/// run in parallel; decisions for the same key queue up behind each other.
#[derive(Debug, Clone, Default)]
pub struct TargetLocks {
    locks: Arc<Mutex<HashMap<TargetKey, Arc<AsyncMutex<()>>>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: TargetKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("Failed to acquire lock");
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop locks nobody holds or waits on.
    pub fn prune(&self) {
        let mut locks = self.locks.lock().expect("Failed to acquire lock");
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().expect("Failed to acquire lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
