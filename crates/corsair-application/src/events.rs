// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::{Arc, Mutex};

use corsair_domain::{AcquisitionEvent, DomainEvent};
use serde_json::json;
use tracing::info;

/// Event publisher abstraction
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &DomainEvent<AcquisitionEvent>);
}

/// A minimal in-memory event bus that stores serialized events.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    inner: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("Failed to acquire lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retrieve and clear all captured events
    pub fn drain(&self) -> Vec<serde_json::Value> {
        let mut guard = self.inner.lock().expect("Failed to acquire lock");
        std::mem::take(&mut *guard)
    }

    /// Names of the captured events, oldest first, without draining them.
    pub fn names(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("Failed to acquire lock")
            .iter()
            .filter_map(|event| event["name"].as_str().map(str::to_string))
            .collect()
    }
}

impl EventPublisher for InMemoryEventBus {
    fn publish(&self, event: &DomainEvent<AcquisitionEvent>) {
        let value = json!({
            "name": event.name,
            "occurred_at": event.occurred_at,
            "payload": event.payload,
        });
        self.inner
            .lock()
            .expect("Failed to acquire lock")
            .push(value);
    }
}

/// Publisher that writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

impl EventPublisher for TracingEventPublisher {
    fn publish(&self, event: &DomainEvent<AcquisitionEvent>) {
        let payload = serde_json::to_string(&event.payload).unwrap_or_default();
        info!(
            target: "events",
            name = event.name,
            occurred_at = %event.occurred_at,
            payload = %payload,
            "acquisition event"
        );
    }
}
