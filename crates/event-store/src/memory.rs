use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

#[derive(Debug, Default)]
struct InMemoryState {
    events: Vec<EventEnvelope>,
    failing_aggregate_type: Option<String>,
}

/// In-memory event store with the same semantics as the PostgreSQL store.
///
/// Appends for an aggregate type can be made to fail, which lets tests
/// simulate an unreachable ledger while other streams keep working.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }

    /// Makes every append for `aggregate_type` fail with `Unavailable`.
    /// Pass `None` to restore normal behavior.
    pub async fn set_fail_on_aggregate_type(&self, aggregate_type: Option<&str>) {
        self.state.write().await.failing_aggregate_type = aggregate_type.map(str::to_string);
    }

    pub async fn clear(&self) {
        self.state.write().await.events.clear();
    }
}

fn current_version(events: &[EventEnvelope], aggregate_id: AggregateId) -> Option<Version> {
    events
        .iter()
        .filter(|e| e.aggregate_id == aggregate_id)
        .map(|e| e.version)
        .max()
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let mut state = self.state.write().await;
        let first = &events[0];
        let aggregate_id = first.aggregate_id;

        if state.failing_aggregate_type.as_deref() == Some(first.aggregate_type.as_str()) {
            return Err(EventStoreError::Unavailable(format!(
                "appends for {} are disabled",
                first.aggregate_type
            )));
        }

        let current = current_version(&state.events, aggregate_id).unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current,
            });
        }

        // Mirrors the (aggregate_id, version) unique constraint.
        if first.version != current.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current),
                actual: current,
            });
        }

        let last_version = events.last().map(|e| e.version).unwrap_or(current);
        state.events.extend(events);

        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let state = self.state.read().await;
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let state = self.state.read().await;
        Ok(current_version(&state.events, aggregate_id))
    }
}
