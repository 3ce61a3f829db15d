//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use commands::{CreateOrder, UpdateOrderStatus, UpdatePaymentStatus};
pub use events::{OrderEvent, OrderPlacedData, PaymentStatusChangedData, StatusChangedData};
pub use service::{OrderLedger, OrderService};
pub use state::{OrderStatus, PaymentStatus};
pub use value_objects::{Money, OrderItem};

use common::{ErrorKind, ProductId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order has no items")]
    NoItems,

    #[error("Invalid quantity {quantity} for product {product_id} (must be at least 1)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    #[error("Invalid price {price} for product {product_id} (must not be negative)")]
    InvalidPrice { product_id: ProductId, price: i64 },

    #[error("Order total does not fit in i64 cents")]
    AmountOverflow,

    #[error("Unknown order status: {0}")]
    UnknownStatus(String),

    #[error("Unknown payment status: {0}")]
    UnknownPaymentStatus(String),

    #[error("Order already placed")]
    AlreadyPlaced,

    #[error("Order has not been placed")]
    NotPlaced,

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("Invalid payment status transition: {from} -> {to}")]
    InvalidPaymentTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Cannot complete payment on a cancelled order")]
    PaymentOnCancelledOrder,
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::NoItems
            | OrderError::InvalidQuantity { .. }
            | OrderError::InvalidPrice { .. }
            | OrderError::AmountOverflow
            | OrderError::UnknownStatus(_)
            | OrderError::UnknownPaymentStatus(_) => ErrorKind::Validation,
            OrderError::NotPlaced => ErrorKind::NotFound,
            OrderError::AlreadyPlaced
            | OrderError::InvalidStatusTransition { .. }
            | OrderError::InvalidPaymentTransition { .. }
            | OrderError::PaymentOnCancelledOrder => ErrorKind::Conflict,
        }
    }
}
