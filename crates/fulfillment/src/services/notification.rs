//! Customer notifications.

use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, CustomerId};
use ledger::{Money, OrderStatus};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::SagaError;
use crate::services::payment::PaymentId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    OrderConfirmed {
        order_id: AggregateId,
        customer_id: CustomerId,
        total: Money,
    },
    PaymentReceipt {
        order_id: AggregateId,
        customer_id: CustomerId,
        payment_id: PaymentId,
        amount: Money,
        transaction_id: String,
    },
    PaymentRefunded {
        order_id: AggregateId,
        customer_id: CustomerId,
        payment_id: PaymentId,
        amount: Money,
    },
    ShippingUpdate {
        order_id: AggregateId,
        customer_id: CustomerId,
        status: OrderStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        tracking_number: Option<String>,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::OrderConfirmed { .. } => "order_confirmed",
            Notification::PaymentReceipt { .. } => "payment_receipt",
            Notification::PaymentRefunded { .. } => "payment_refunded",
            Notification::ShippingUpdate { .. } => "shipping_update",
        }
    }

    pub fn customer_id(&self) -> CustomerId {
        match self {
            Notification::OrderConfirmed { customer_id, .. }
            | Notification::PaymentReceipt { customer_id, .. }
            | Notification::PaymentRefunded { customer_id, .. }
            | Notification::ShippingUpdate { customer_id, .. } => *customer_id,
        }
    }
}

/// Best-effort delivery. Callers never let a failure here change an outcome.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), SagaError>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), SagaError> {
        tracing::info!(
            kind = notification.kind(),
            customer_id = %notification.customer_id(),
            "notification sent"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail: bool,
}

/// Records notifications for inspection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.state.read().await.sent.clone()
    }

    pub async fn set_fail(&self, fail: bool) {
        self.state.write().await.fail = fail;
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), SagaError> {
        let mut state = self.state.write().await;
        if state.fail {
            return Err(SagaError::Notification("mailer unavailable".to_string()));
        }
        state.sent.push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed() -> Notification {
        Notification::OrderConfirmed {
            order_id: AggregateId::new(),
            customer_id: CustomerId::new(5),
            total: Money::from_cents(2000),
        }
    }

    #[tokio::test]
    async fn test_in_memory_records() {
        let notifier = InMemoryNotifier::new();
        let notification = confirmed();
        notifier.notify(notification.clone()).await.unwrap();
        assert_eq!(notifier.sent().await, vec![notification]);

        notifier.set_fail(true).await;
        assert!(notifier.notify(confirmed()).await.is_err());
        assert_eq!(notifier.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_tracing_notifier_never_fails() {
        assert!(TracingNotifier.notify(confirmed()).await.is_ok());
    }

    #[test]
    fn test_serialized_kind() {
        let json = serde_json::to_value(confirmed()).unwrap();
        assert_eq!(json["kind"], "order_confirmed");
        assert_eq!(json["total"], 2000);
        assert_eq!(confirmed().customer_id(), CustomerId::new(5));

        let shipped = Notification::ShippingUpdate {
            order_id: AggregateId::new(),
            customer_id: CustomerId::new(5),
            status: OrderStatus::Shipped,
            tracking_number: Some("1Z999".to_string()),
        };
        let json = serde_json::to_value(&shipped).unwrap();
        assert_eq!(json["kind"], "shipping_update");
        assert_eq!(json["status"], "shipped");
        assert_eq!(json["tracking_number"], "1Z999");
    }
}
