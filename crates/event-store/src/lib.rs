//! Append-only event store.
//!
//! Every order and every fulfillment saga is persisted as a stream of events
//! keyed by aggregate ID. Appends are atomic per call and guarded by an
//! expected version, which is what makes a multi-part write (an order header
//! together with its line items) all-or-nothing.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt};
