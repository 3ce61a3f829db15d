use common::{AggregateId, ErrorKind};
use event_store::EventStoreError;
use thiserror::Error;

use crate::order::OrderError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::EventStore(e) if e.is_conflict() => ErrorKind::Conflict,
            LedgerError::EventStore(_) | LedgerError::Serialization(_) => {
                ErrorKind::Infrastructure
            }
            LedgerError::Order(e) => e.kind(),
            LedgerError::OrderNotFound(_) => ErrorKind::NotFound,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
