//! Event-store backing for the leaf services.
//!
//! The cart store and the payment processor keep their working state in
//! memory. With a journal attached, every change is also appended to an
//! [`EventStore`] and replayed on startup, so carts and payment receipts
//! survive a restart alongside the orders and sagas in the same store.

use std::sync::Arc;

use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};
use serde::Serialize;

use crate::error::SagaError;

/// Shared handle to the event store the leaf services write through.
#[derive(Clone)]
pub struct Journal {
    store: Arc<dyn EventStore>,
}

impl Journal {
    pub fn new<S: EventStore + 'static>(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Appends one event at `version`, which must be the stream's next version.
    pub(crate) async fn record<E: Serialize>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        version: Version,
        event_type: &str,
        event: &E,
    ) -> Result<(), SagaError> {
        let envelope =
            EventEnvelope::from_event(aggregate_id, aggregate_type, version, event_type, event)?;
        self.store.append(vec![envelope], AppendOptions::new()).await?;
        Ok(())
    }

    /// Every event of `event_type`, in insertion order.
    pub(crate) async fn replay(&self, event_type: &str) -> Result<Vec<EventEnvelope>, SagaError> {
        Ok(self.store.get_events_by_type(event_type).await?)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").finish_non_exhaustive()
    }
}
