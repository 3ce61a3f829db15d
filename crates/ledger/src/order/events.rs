//! Order domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{Money, OrderItem, OrderStatus, PaymentStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order header and all of its line items, written as one unit.
    OrderPlaced(OrderPlacedData),

    StatusChanged(StatusChangedData),

    /// Payment status moved. When a payment completes, `order_status` carries
    /// the status the order advanced to in the same event.
    PaymentStatusChanged(PaymentStatusChangedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::StatusChanged(_) => "StatusChanged",
            OrderEvent::PaymentStatusChanged(_) => "PaymentStatusChanged",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
    pub total_amount: Money,
    pub shipping_address: String,
    pub payment_method: String,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangedData {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentStatusChangedData {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_status: Option<OrderStatus>,
    pub changed_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn order_placed(
        order_id: AggregateId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        total_amount: Money,
        shipping_address: String,
        payment_method: String,
    ) -> Self {
        OrderEvent::OrderPlaced(OrderPlacedData {
            order_id,
            customer_id,
            items,
            total_amount,
            shipping_address,
            payment_method,
            placed_at: Utc::now(),
        })
    }

    pub fn status_changed(from: OrderStatus, to: OrderStatus) -> Self {
        OrderEvent::StatusChanged(StatusChangedData {
            from,
            to,
            changed_at: Utc::now(),
        })
    }

    pub fn payment_status_changed(
        from: PaymentStatus,
        to: PaymentStatus,
        order_status: Option<OrderStatus>,
    ) -> Self {
        OrderEvent::PaymentStatusChanged(PaymentStatusChangedData {
            from,
            to,
            order_status,
            changed_at: Utc::now(),
        })
    }

    /// Customer of an `OrderPlaced` event; None for every other variant.
    pub fn placed_by(&self) -> Option<CustomerId> {
        match self {
            OrderEvent::OrderPlaced(data) => Some(data.customer_id),
            _ => None,
        }
    }
}
