//! Order commands.

use common::{AggregateId, CustomerId};

use crate::command::Command;

use super::{Order, OrderItem, OrderStatus, PaymentStatus};

/// Places an order with its line items.
///
/// The order ID is chosen by the caller so that it can be recorded before
/// the order exists.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub shipping_address: String,
    pub payment_method: String,
    pub items: Vec<OrderItem>,
}

impl CreateOrder {
    pub fn new(
        order_id: AggregateId,
        customer_id: CustomerId,
        shipping_address: impl Into<String>,
        payment_method: impl Into<String>,
        items: Vec<OrderItem>,
    ) -> Self {
        Self {
            order_id,
            customer_id,
            shipping_address: shipping_address.into(),
            payment_method: payment_method.into(),
            items,
        }
    }
}

impl Command for CreateOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

#[derive(Debug, Clone)]
pub struct UpdateOrderStatus {
    pub order_id: AggregateId,
    pub status: OrderStatus,
}

impl UpdateOrderStatus {
    pub fn new(order_id: AggregateId, status: OrderStatus) -> Self {
        Self { order_id, status }
    }
}

impl Command for UpdateOrderStatus {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

#[derive(Debug, Clone)]
pub struct UpdatePaymentStatus {
    pub order_id: AggregateId,
    pub payment_status: PaymentStatus,
}

impl UpdatePaymentStatus {
    pub fn new(order_id: AggregateId, payment_status: PaymentStatus) -> Self {
        Self {
            order_id,
            payment_status,
        }
    }
}

impl Command for UpdatePaymentStatus {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}
