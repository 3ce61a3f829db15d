//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId};
use event_store::Version;

use crate::aggregate::Aggregate;

use super::{
    Money, OrderError, OrderEvent, OrderItem, OrderStatus, PaymentStatus,
    events::{OrderPlacedData, PaymentStatusChangedData, StatusChangedData},
};

/// Order aggregate root.
///
/// Created once, in `pending/pending`, together with its items. Items and
/// total never change afterwards; only the two status fields move.
#[derive(Debug, Clone, Default)]
pub struct Order {
    id: Option<AggregateId>,
    version: Version,
    customer_id: Option<CustomerId>,
    status: OrderStatus,
    payment_status: PaymentStatus,
    items: Vec<OrderItem>,
    total_amount: Money,
    shipping_address: String,
    payment_method: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderPlaced(data) => self.apply_placed(data),
            OrderEvent::StatusChanged(data) => self.apply_status_changed(data),
            OrderEvent::PaymentStatusChanged(data) => self.apply_payment_status_changed(data),
        }
    }
}

// Query methods
impl Order {
    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn shipping_address(&self) -> &str {
        &self.shipping_address
    }

    pub fn payment_method(&self) -> &str {
        &self.payment_method
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// True while a new charge attempt may be made against this order.
    pub fn is_payable(&self) -> bool {
        self.status == OrderStatus::Pending
            && matches!(
                self.payment_status,
                PaymentStatus::Pending | PaymentStatus::Failed
            )
    }
}

// Command methods (return events)
impl Order {
    /// Places the order. The total is computed from `items`.
    pub fn place(
        &self,
        order_id: AggregateId,
        customer_id: CustomerId,
        shipping_address: String,
        payment_method: String,
        items: Vec<OrderItem>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyPlaced);
        }
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id,
                    quantity: item.quantity,
                });
            }
            if item.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id,
                    price: item.unit_price.cents(),
                });
            }
        }

        let total_amount = items
            .iter()
            .map(OrderItem::line_total)
            .collect::<Option<Vec<_>>>()
            .and_then(Money::checked_sum)
            .ok_or(OrderError::AmountOverflow)?;

        Ok(vec![OrderEvent::order_placed(
            order_id,
            customer_id,
            items,
            total_amount,
            shipping_address,
            payment_method,
        )])
    }

    /// Moves the fulfillment status. Setting the current status is a no-op.
    pub fn change_status(&self, next: OrderStatus) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;

        if next == self.status {
            return Ok(vec![]);
        }
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidStatusTransition {
                from: self.status,
                to: next,
            });
        }

        Ok(vec![OrderEvent::status_changed(self.status, next)])
    }

    /// Moves the payment status.
    ///
    /// Completing a payment on a pending order confirms the order in the same
    /// event. Repeating the current status is a no-op, except `failed`, which
    /// records another failed attempt.
    pub fn change_payment_status(
        &self,
        next: PaymentStatus,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;

        if next == self.payment_status && next != PaymentStatus::Failed {
            return Ok(vec![]);
        }
        if !self.payment_status.can_transition_to(next) {
            return Err(OrderError::InvalidPaymentTransition {
                from: self.payment_status,
                to: next,
            });
        }
        if next == PaymentStatus::Completed && self.status == OrderStatus::Cancelled {
            return Err(OrderError::PaymentOnCancelledOrder);
        }

        let order_status = (next == PaymentStatus::Completed
            && self.status == OrderStatus::Pending)
            .then_some(OrderStatus::Confirmed);

        Ok(vec![OrderEvent::payment_status_changed(
            self.payment_status,
            next,
            order_status,
        )])
    }

    fn ensure_placed(&self) -> Result<(), OrderError> {
        match self.id {
            Some(_) => Ok(()),
            None => Err(OrderError::NotPlaced),
        }
    }
}

// Event application
impl Order {
    fn apply_placed(&mut self, data: OrderPlacedData) {
        self.id = Some(data.order_id);
        self.customer_id = Some(data.customer_id);
        self.status = OrderStatus::Pending;
        self.payment_status = PaymentStatus::Pending;
        self.items = data.items;
        self.total_amount = data.total_amount;
        self.shipping_address = data.shipping_address;
        self.payment_method = data.payment_method;
        self.created_at = data.placed_at;
        self.updated_at = data.placed_at;
    }

    fn apply_status_changed(&mut self, data: StatusChangedData) {
        self.status = data.to;
        self.updated_at = data.changed_at;
    }

    fn apply_payment_status_changed(&mut self, data: PaymentStatusChangedData) {
        self.payment_status = data.to;
        if let Some(status) = data.order_status {
            self.status = status;
        }
        self.updated_at = data.changed_at;
    }
}
