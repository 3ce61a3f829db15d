//! Fulfillment error types.

use std::time::Duration;

use common::{AggregateId, CustomerId, ErrorKind};
use event_store::EventStoreError;
use ledger::{LedgerError, Money, OrderStatus, PaymentStatus};
use thiserror::Error;

use crate::services::payment::PaymentId;

/// Errors raised by the cart store, the payment processor and the
/// coordinator that drives them.
///
/// A declined payment is not an error; it comes back as a normal outcome.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("Cart is empty for customer {0}")]
    EmptyCart(CustomerId),

    #[error("Invalid amount: {0}")]
    InvalidAmount(Money),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i64),

    #[error("Invalid unit price: {0}")]
    InvalidPrice(Money),

    #[error("Cart total does not fit in i64 cents")]
    AmountOverflow,

    #[error("Cart item {item_id} not found for customer {customer_id}")]
    CartItemNotFound { customer_id: CustomerId, item_id: u64 },

    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    #[error("Saga not found: {0}")]
    SagaNotFound(AggregateId),

    #[error("Order {0} has no completed payment")]
    NoCompletedPayment(AggregateId),

    #[error("Payment {payment_id} cannot be refunded in status {status}")]
    PaymentNotRefundable {
        payment_id: PaymentId,
        status: PaymentStatus,
    },

    #[error("Order {0} already has a completed payment")]
    AlreadyPaid(AggregateId),

    #[error("Order {order_id} is not payable ({status}/{payment_status})")]
    OrderNotPayable {
        order_id: AggregateId,
        status: OrderStatus,
        payment_status: PaymentStatus,
    },

    #[error("Checkout {saga_id} failed earlier: {reason}")]
    PreviousAttemptFailed { saga_id: AggregateId, reason: String },

    #[error("Cart service error: {0}")]
    CartService(String),

    #[error("Payment service error: {0}")]
    PaymentService(String),

    #[error("Payment timed out after {0:?}")]
    PaymentTimeout(Duration),

    #[error("Could not allocate a unique transaction id, last tried {0}")]
    DuplicateTransactionId(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::EmptyCart(_)
            | SagaError::InvalidAmount(_)
            | SagaError::InvalidQuantity(_)
            | SagaError::InvalidPrice(_)
            | SagaError::AmountOverflow => ErrorKind::Validation,

            SagaError::CartItemNotFound { .. }
            | SagaError::OrderNotFound(_)
            | SagaError::PaymentNotFound(_)
            | SagaError::SagaNotFound(_) => ErrorKind::NotFound,

            SagaError::NoCompletedPayment(_)
            | SagaError::PaymentNotRefundable { .. }
            | SagaError::AlreadyPaid(_)
            | SagaError::OrderNotPayable { .. }
            | SagaError::PreviousAttemptFailed { .. } => ErrorKind::Conflict,

            SagaError::Ledger(e) => e.kind(),
            SagaError::EventStore(e) if e.is_conflict() => ErrorKind::Conflict,

            SagaError::CartService(_)
            | SagaError::PaymentService(_)
            | SagaError::PaymentTimeout(_)
            | SagaError::DuplicateTransactionId(_)
            | SagaError::Notification(_)
            | SagaError::EventStore(_)
            | SagaError::Serialization(_) => ErrorKind::Infrastructure,
        }
    }
}

pub type Result<T> = std::result::Result<T, SagaError>;
