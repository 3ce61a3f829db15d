//! Order ledger contract and its event-sourced implementation.

use async_trait::async_trait;
use common::{AggregateId, CustomerId};
use event_store::EventStore;

use crate::command::{Command, CommandHandler};
use crate::error::{LedgerError, Result};

use super::{CreateOrder, Order, OrderError, OrderEvent, UpdateOrderStatus, UpdatePaymentStatus};

/// Durable record of orders and their two status machines.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Persists the order header and items atomically in `pending/pending`.
    async fn create_order(&self, cmd: CreateOrder) -> Result<Order>;

    async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>>;

    /// Orders placed by `customer_id`, newest first.
    async fn orders_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>>;

    async fn update_status(&self, cmd: UpdateOrderStatus) -> Result<Order>;

    /// Completing a payment also confirms a pending order in the same write.
    async fn update_payment_status(&self, cmd: UpdatePaymentStatus) -> Result<Order>;
}

/// [`OrderLedger`] backed by an event store.
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
}

impl<S: EventStore + Clone> Clone for OrderService<S> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<S: EventStore> OrderService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }
}

fn not_found_as(order_id: AggregateId) -> impl FnOnce(LedgerError) -> LedgerError {
    move |e| match e {
        LedgerError::Order(OrderError::NotPlaced) => LedgerError::OrderNotFound(order_id),
        other => other,
    }
}

#[async_trait]
impl<S: EventStore> OrderLedger for OrderService<S> {
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, customer_id = %cmd.customer_id))]
    async fn create_order(&self, cmd: CreateOrder) -> Result<Order> {
        let order_id = cmd.aggregate_id();
        let CreateOrder {
            customer_id,
            shipping_address,
            payment_method,
            items,
            ..
        } = cmd;

        let result = self
            .handler
            .execute(order_id, |order| {
                order.place(
                    order_id,
                    customer_id,
                    shipping_address,
                    payment_method,
                    items,
                )
            })
            .await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(total = %result.aggregate.total_amount(), "order placed");
        Ok(result.aggregate)
    }

    #[tracing::instrument(skip(self))]
    async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>> {
        self.handler.load_existing(order_id).await
    }

    #[tracing::instrument(skip(self))]
    async fn orders_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let placed = self
            .handler
            .store()
            .get_events_by_type("OrderPlaced")
            .await?;

        let mut orders = Vec::new();
        for envelope in placed.iter().rev() {
            let event: OrderEvent = envelope.decode()?;
            if event.placed_by() != Some(customer_id) {
                continue;
            }
            if let Some(order) = self.handler.load_existing(envelope.aggregate_id).await? {
                orders.push(order);
            }
        }

        // Stable sort keeps reverse insertion order for equal timestamps.
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(orders)
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, status = %cmd.status))]
    async fn update_status(&self, cmd: UpdateOrderStatus) -> Result<Order> {
        let order_id = cmd.aggregate_id();
        let result = self
            .handler
            .execute(order_id, |order| order.change_status(cmd.status))
            .await
            .map_err(not_found_as(order_id))?;

        Ok(result.aggregate)
    }

    #[tracing::instrument(
        skip(self, cmd),
        fields(order_id = %cmd.order_id, payment_status = %cmd.payment_status)
    )]
    async fn update_payment_status(&self, cmd: UpdatePaymentStatus) -> Result<Order> {
        let order_id = cmd.aggregate_id();
        let result = self
            .handler
            .execute(order_id, |order| {
                order.change_payment_status(cmd.payment_status)
            })
            .await
            .map_err(not_found_as(order_id))?;

        Ok(result.aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregate;
    use crate::order::{Money, OrderItem, OrderStatus, PaymentStatus};
    use common::{ErrorKind, ProductId};
    use event_store::InMemoryEventStore;

    fn create_cmd(customer: u64) -> CreateOrder {
        CreateOrder::new(
            AggregateId::new(),
            CustomerId::new(customer),
            "1 Main St",
            "credit_card",
            vec![OrderItem::new(
                ProductId::new(7),
                "Widget",
                2,
                Money::from_cents(1000),
            )],
        )
    }

    #[tokio::test]
    async fn create_and_get_order() {
        let service = OrderService::new(InMemoryEventStore::new());
        let cmd = create_cmd(5);
        let order_id = cmd.order_id;

        let created = service.create_order(cmd).await.unwrap();
        assert_eq!(created.id(), Some(order_id));

        let loaded = service.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(loaded.total_amount(), Money::from_cents(2000));
        assert_eq!(loaded.items().len(), 1);
    }

    #[tokio::test]
    async fn create_is_a_single_append() {
        let store = InMemoryEventStore::new();
        let service = OrderService::new(store.clone());

        service.create_order(create_cmd(5)).await.unwrap();
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn get_missing_order_is_none() {
        let service = OrderService::new(InMemoryEventStore::new());
        assert!(service.get_order(AggregateId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_missing_order_is_not_found() {
        let service = OrderService::new(InMemoryEventStore::new());
        let err = service
            .update_status(UpdateOrderStatus::new(
                AggregateId::new(),
                OrderStatus::Confirmed,
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::OrderNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn payment_completed_confirms_order() {
        let service = OrderService::new(InMemoryEventStore::new());
        let cmd = create_cmd(5);
        let order_id = cmd.order_id;
        service.create_order(cmd).await.unwrap();

        let order = service
            .update_payment_status(UpdatePaymentStatus::new(
                order_id,
                PaymentStatus::Completed,
            ))
            .await
            .unwrap();

        assert_eq!(order.payment_status(), PaymentStatus::Completed);
        assert_eq!(order.status(), OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn invalid_transition_is_conflict() {
        let service = OrderService::new(InMemoryEventStore::new());
        let cmd = create_cmd(5);
        let order_id = cmd.order_id;
        service.create_order(cmd).await.unwrap();

        let err = service
            .update_status(UpdateOrderStatus::new(order_id, OrderStatus::Delivered))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let order = service.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[tokio::test]
    async fn orders_for_customer_newest_first() {
        let service = OrderService::new(InMemoryEventStore::new());

        let first = service.create_order(create_cmd(5)).await.unwrap();
        service.create_order(create_cmd(6)).await.unwrap();
        let second = service.create_order(create_cmd(5)).await.unwrap();

        let orders = service
            .orders_for_customer(CustomerId::new(5))
            .await
            .unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].id(), second.id());
        assert_eq!(orders[1].id(), first.id());

        assert!(
            service
                .orders_for_customer(CustomerId::new(99))
                .await
                .unwrap()
                .is_empty()
        );
    }
}
