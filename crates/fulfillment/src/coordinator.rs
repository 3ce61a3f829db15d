//! Fulfillment coordinator: drives checkout, payment retry and refund sagas.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{AggregateId, CustomerId};
use event_store::{AppendOptions, EventEnvelope, EventStore};
use ledger::{
    Aggregate, CommandHandler, CreateOrder, DomainEvent, Order, OrderLedger, OrderStatus,
    PaymentStatus, UpdateOrderStatus, UpdatePaymentStatus,
};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::aggregate::SagaInstance;
use crate::checkout;
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::services::payment::DECLINE_MESSAGE;
use crate::services::{
    CardDetails, CartStore, ChargeRequest, Notification, Notifier, Payment, PaymentProcessor,
    TracingNotifier,
};
use crate::state::SagaState;

pub const DEFAULT_PAYMENT_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound on one charge call. Exceeding it is an infrastructure
    /// failure; the order stays payable.
    pub payment_timeout: Duration,
    pub currency: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            payment_timeout: DEFAULT_PAYMENT_TIMEOUT,
            currency: crate::services::payment::DEFAULT_CURRENCY.to_string(),
        }
    }
}

/// Checkout request for a customer's current cart.
#[derive(Debug)]
pub struct PlaceOrder {
    pub customer_id: CustomerId,
    pub shipping_address: String,
    pub payment_method: String,
    pub card: Option<CardDetails>,
    /// Repeating a checkout with the same key returns the first outcome.
    pub idempotency_key: Option<String>,
}

impl PlaceOrder {
    pub fn new(
        customer_id: CustomerId,
        shipping_address: impl Into<String>,
        payment_method: impl Into<String>,
    ) -> Self {
        Self {
            customer_id,
            shipping_address: shipping_address.into(),
            payment_method: payment_method.into(),
            card: None,
            idempotency_key: None,
        }
    }

    pub fn with_card(mut self, card: CardDetails) -> Self {
        self.card = Some(card);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    Confirmed,
    /// The gateway refused the charge. Not an error.
    Declined { reason: String },
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub saga_id: AggregateId,
    pub order: Order,
    pub payment: Option<Payment>,
    pub outcome: CheckoutOutcome,
    /// False when the charge was approved but clearing the cart failed; a
    /// later `resume` retries the clear.
    pub cart_cleared: bool,
}

impl OrderResult {
    pub fn is_confirmed(&self) -> bool {
        self.outcome == CheckoutOutcome::Confirmed
    }
}

#[derive(Debug, Clone)]
pub struct RefundResult {
    pub saga_id: AggregateId,
    pub order: Order,
    pub payment: Payment,
}

/// Tally of one reconcile pass over non-terminal sagas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub completed: usize,
    pub declined: usize,
    pub failed: usize,
    pub still_running: usize,
    pub errors: usize,
}

/// Saga id of a keyed checkout. Stable for the same customer and key.
pub fn checkout_saga_id(customer_id: CustomerId, idempotency_key: &str) -> AggregateId {
    AggregateId::derived(&format!("checkout:{customer_id}:{idempotency_key}"))
}

/// Orchestrates the cart store, order ledger and payment processor.
///
/// There is no transaction spanning the three. Steps run in a fixed order
/// (create, charge, record, clear) and every step is recorded on an
/// event-sourced saga instance, so a run interrupted at any point can be
/// finished by [`resume`](Self::resume) from the leaves' actual state.
pub struct FulfillmentCoordinator<S, C, L, P>
where
    S: EventStore,
    C: CartStore,
    L: OrderLedger,
    P: PaymentProcessor,
{
    sagas: CommandHandler<S, SagaInstance>,
    carts: C,
    ledger: L,
    payments: P,
    notifier: Arc<dyn Notifier>,
    config: CoordinatorConfig,
    checkout_locks: Mutex<HashMap<CustomerId, Arc<Mutex<()>>>>,
}

impl<S, C, L, P> FulfillmentCoordinator<S, C, L, P>
where
    S: EventStore,
    C: CartStore,
    L: OrderLedger,
    P: PaymentProcessor,
{
    pub fn new(store: S, carts: C, ledger: L, payments: P) -> Self {
        Self {
            sagas: CommandHandler::new(store),
            carts,
            ledger,
            payments,
            notifier: Arc::new(TracingNotifier),
            config: CoordinatorConfig::default(),
            checkout_locks: Mutex::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        self.sagas.store()
    }

    pub fn carts(&self) -> &C {
        &self.carts
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn payments(&self) -> &P {
        &self.payments
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Checks out the customer's cart.
    ///
    /// A decline is returned as `Ok` with [`CheckoutOutcome::Declined`]. An
    /// error means no charge was approved, except when recording an approved
    /// charge failed; the saga then stays running for `resume`.
    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<OrderResult> {
        metrics::counter!("checkout_attempts_total").increment(1);
        let started = Instant::now();

        let result = self.checkout(cmd).await;

        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        match &result {
            Ok(r) if r.is_confirmed() => {
                metrics::counter!("checkout_confirmed_total").increment(1);
            }
            Ok(_) => metrics::counter!("checkout_declined_total").increment(1),
            Err(e) => {
                metrics::counter!("checkout_failed_total").increment(1);
                tracing::warn!(error = %e, kind = %e.kind(), "checkout failed");
            }
        }
        result
    }

    #[tracing::instrument(
        skip(self, cmd),
        fields(customer_id = %cmd.customer_id, saga_type = checkout::CHECKOUT)
    )]
    async fn checkout(&self, cmd: PlaceOrder) -> Result<OrderResult> {
        let PlaceOrder {
            customer_id,
            shipping_address,
            payment_method,
            card,
            idempotency_key,
        } = cmd;
        let _guard = self.lock_customer(customer_id).await;

        let saga_id = match idempotency_key.as_deref() {
            Some(key) => checkout_saga_id(customer_id, key),
            None => AggregateId::new(),
        };
        if idempotency_key.is_some() {
            if let Some(existing) = self.get_saga(saga_id).await? {
                tracing::info!(%saga_id, state = %existing.state(), "replaying keyed checkout");
                return self.replay_checkout(saga_id, existing).await;
            }
        }

        let cart = self.carts.get_cart(customer_id).await?;
        if cart.is_empty() {
            return Err(SagaError::EmptyCart(customer_id));
        }
        if !cart.total_price.is_positive() {
            return Err(SagaError::InvalidAmount(cart.total_price));
        }

        let order_id = AggregateId::new();
        let mut saga = SagaInstance::default();
        self.record(
            saga_id,
            &mut saga,
            SagaEvent::saga_started(
                saga_id,
                checkout::CHECKOUT,
                customer_id,
                order_id,
                idempotency_key,
            ),
        )
        .await?;

        // Step 1: create the order from a snapshot of the cart
        self.record(
            saga_id,
            &mut saga,
            SagaEvent::step_started(checkout::STEP_CREATE_ORDER),
        )
        .await?;
        let create = CreateOrder::new(
            order_id,
            customer_id,
            shipping_address,
            payment_method,
            cart.order_items(),
        );
        let order = match self.ledger.create_order(create).await {
            Ok(order) => order,
            Err(e) => {
                return Err(self
                    .abort(saga_id, &mut saga, checkout::STEP_CREATE_ORDER, e.into())
                    .await);
            }
        };
        self.record(
            saga_id,
            &mut saga,
            SagaEvent::step_completed(checkout::STEP_CREATE_ORDER),
        )
        .await?;
        tracing::info!(%order_id, total = %order.total_amount(), "order created");

        self.settle_payment(saga_id, &mut saga, order_id, &order, card)
            .await
    }

    /// Runs a new charge attempt against an order whose payment is pending
    /// or failed.
    ///
    /// If the processor already holds a completed payment for the order, the
    /// ledger is brought in line with it and the call is rejected instead of
    /// charging again.
    #[tracing::instrument(skip(self, card), fields(saga_type = checkout::PAYMENT_RETRY))]
    pub async fn retry_payment(
        &self,
        order_id: AggregateId,
        card: Option<CardDetails>,
    ) -> Result<OrderResult> {
        metrics::counter!("payment_retries_total").increment(1);
        let customer_id = self
            .existing_order(order_id)
            .await?
            .customer_id()
            .ok_or(SagaError::OrderNotFound(order_id))?;
        let _guard = self.lock_customer(customer_id).await;
        let order = self.existing_order(order_id).await?;

        let payments = self.payments.payments_for_order(order_id).await?;
        if let Some(paid) = payments.iter().find(|p| p.is_completed()) {
            if order.status() != OrderStatus::Cancelled
                && matches!(
                    order.payment_status(),
                    PaymentStatus::Pending | PaymentStatus::Failed
                )
            {
                tracing::warn!(
                    payment_id = %paid.id,
                    "ledger behind processor, recording completed payment"
                );
                self.ledger
                    .update_payment_status(UpdatePaymentStatus::new(
                        order_id,
                        PaymentStatus::Completed,
                    ))
                    .await?;
            }
            return Err(SagaError::AlreadyPaid(order_id));
        }
        if !order.is_payable() {
            return Err(SagaError::OrderNotPayable {
                order_id,
                status: order.status(),
                payment_status: order.payment_status(),
            });
        }

        let saga_id = AggregateId::new();
        let mut saga = SagaInstance::default();
        self.record(
            saga_id,
            &mut saga,
            SagaEvent::saga_started(
                saga_id,
                checkout::PAYMENT_RETRY,
                customer_id,
                order_id,
                None,
            ),
        )
        .await?;

        self.settle_payment(saga_id, &mut saga, order_id, &order, card)
            .await
    }

    /// Refunds the order's completed payment and marks the order refunded.
    ///
    /// Without a completed payment nothing is written and the call is a
    /// conflict.
    #[tracing::instrument(skip(self), fields(saga_type = checkout::ORDER_REFUND))]
    pub async fn refund_order(&self, order_id: AggregateId) -> Result<RefundResult> {
        let customer_id = self
            .existing_order(order_id)
            .await?
            .customer_id()
            .ok_or(SagaError::OrderNotFound(order_id))?;
        let _guard = self.lock_customer(customer_id).await;

        let payment = self
            .payments
            .payments_for_order(order_id)
            .await?
            .into_iter()
            .find(Payment::is_completed)
            .ok_or(SagaError::NoCompletedPayment(order_id))?;

        let saga_id = AggregateId::new();
        let mut saga = SagaInstance::default();
        self.record(
            saga_id,
            &mut saga,
            SagaEvent::saga_started(
                saga_id,
                checkout::ORDER_REFUND,
                customer_id,
                order_id,
                None,
            ),
        )
        .await?;

        // Step 1: refund at the gateway
        self.record(
            saga_id,
            &mut saga,
            SagaEvent::step_started(checkout::STEP_REFUND_PAYMENT),
        )
        .await?;
        let refunded = match self.payments.refund(payment.id).await {
            Ok(refunded) => refunded,
            Err(e) => {
                return Err(self
                    .abort(saga_id, &mut saga, checkout::STEP_REFUND_PAYMENT, e)
                    .await);
            }
        };
        self.record(
            saga_id,
            &mut saga,
            SagaEvent::payment_step_completed(
                checkout::STEP_REFUND_PAYMENT,
                refunded.id,
                refunded.transaction_id.clone(),
            ),
        )
        .await?;

        // Step 2: compensate the ledger
        let order = self
            .record_payment_status(
                saga_id,
                &mut saga,
                checkout::STEP_RECORD_REFUND,
                order_id,
                PaymentStatus::Refunded,
            )
            .await?;
        self.record(saga_id, &mut saga, SagaEvent::saga_completed())
            .await?;

        metrics::counter!("refunds_total").increment(1);
        tracing::info!(%order_id, payment_id = %refunded.id, "order refunded");
        self.notify(Notification::PaymentRefunded {
            order_id,
            customer_id,
            payment_id: refunded.id,
            amount: refunded.amount,
        });

        Ok(RefundResult {
            saga_id,
            order,
            payment: refunded,
        })
    }

    /// Moves the order's fulfillment status. Reaching `shipped` or
    /// `delivered` sends the customer a shipping update.
    #[tracing::instrument(skip(self, tracking_number), fields(%status))]
    pub async fn update_status(
        &self,
        order_id: AggregateId,
        status: OrderStatus,
        tracking_number: Option<String>,
    ) -> Result<Order> {
        let previous = self.existing_order(order_id).await?.status();
        let order = self
            .ledger
            .update_status(UpdateOrderStatus::new(order_id, status))
            .await?;

        let shipping = matches!(status, OrderStatus::Shipped | OrderStatus::Delivered);
        if shipping
            && previous != status
            && let Some(customer_id) = order.customer_id()
        {
            self.notify(Notification::ShippingUpdate {
                order_id,
                customer_id,
                status,
                tracking_number,
            });
        }
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_saga(&self, saga_id: AggregateId) -> Result<Option<SagaInstance>> {
        Ok(self.sagas.load_existing(saga_id).await?)
    }

    /// Drives a non-terminal saga to a terminal state from the leaves' actual
    /// state. Never charges.
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self, saga_id: AggregateId) -> Result<SagaInstance> {
        let saga = self
            .get_saga(saga_id)
            .await?
            .ok_or(SagaError::SagaNotFound(saga_id))?;
        if saga.state().is_terminal() {
            return Ok(saga);
        }

        let customer_id = saga
            .customer_id()
            .ok_or(SagaError::SagaNotFound(saga_id))?;
        let _guard = self.lock_customer(customer_id).await;

        let saga = self
            .get_saga(saga_id)
            .await?
            .ok_or(SagaError::SagaNotFound(saga_id))?;
        self.resume_saga(saga_id, saga).await
    }

    /// Resumes every non-terminal saga in the store.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let started = self.store().get_events_by_type("SagaStarted").await?;
        let mut report = ReconcileReport::default();

        for envelope in started {
            if envelope.aggregate_type != SagaInstance::aggregate_type() {
                continue;
            }
            let saga_id = envelope.aggregate_id;
            let Some(saga) = self.get_saga(saga_id).await? else {
                continue;
            };
            if saga.state().is_terminal() {
                continue;
            }

            report.examined += 1;
            match self.resume(saga_id).await {
                Ok(saga) => match saga.state() {
                    SagaState::Completed => report.completed += 1,
                    SagaState::Declined => report.declined += 1,
                    SagaState::Failed => report.failed += 1,
                    SagaState::NotStarted | SagaState::Running => report.still_running += 1,
                },
                Err(e) => {
                    tracing::warn!(%saga_id, error = %e, "could not resume saga");
                    report.errors += 1;
                }
            }
        }

        tracing::info!(?report, "reconcile finished");
        Ok(report)
    }
}

// Saga steps
impl<S, C, L, P> FulfillmentCoordinator<S, C, L, P>
where
    S: EventStore,
    C: CartStore,
    L: OrderLedger,
    P: PaymentProcessor,
{
    /// Charges the order and records the outcome.
    async fn settle_payment(
        &self,
        saga_id: AggregateId,
        saga: &mut SagaInstance,
        order_id: AggregateId,
        order: &Order,
        card: Option<CardDetails>,
    ) -> Result<OrderResult> {
        let customer_id = order
            .customer_id()
            .ok_or(SagaError::OrderNotFound(order_id))?;

        self.record(
            saga_id,
            saga,
            SagaEvent::step_started(checkout::STEP_CHARGE_PAYMENT),
        )
        .await?;
        let request = ChargeRequest::new(
            order_id,
            customer_id,
            order.total_amount(),
            order.payment_method(),
        )
        .with_currency(self.config.currency.clone())
        .with_card(card);

        let charged =
            tokio::time::timeout(self.config.payment_timeout, self.payments.charge(request)).await;
        let payment = match charged {
            Ok(Ok(payment)) => payment,
            Ok(Err(e)) => {
                return Err(self
                    .abort(saga_id, saga, checkout::STEP_CHARGE_PAYMENT, e)
                    .await);
            }
            Err(_) => {
                // The gateway may still settle the charge; resume decides
                // from its records.
                let e = SagaError::PaymentTimeout(self.config.payment_timeout);
                return Err(self
                    .interrupt(saga_id, saga, checkout::STEP_CHARGE_PAYMENT, e)
                    .await);
            }
        };
        self.record(
            saga_id,
            saga,
            SagaEvent::payment_step_completed(
                checkout::STEP_CHARGE_PAYMENT,
                payment.id,
                payment.transaction_id.clone(),
            ),
        )
        .await?;

        match payment.status {
            PaymentStatus::Completed => {
                let order = self
                    .record_payment_status(
                        saga_id,
                        saga,
                        checkout::STEP_RECORD_PAYMENT,
                        order_id,
                        PaymentStatus::Completed,
                    )
                    .await?;
                let cart_cleared = self.complete_checkout(saga_id, saga, &order, &payment).await?;
                Ok(OrderResult {
                    saga_id,
                    order,
                    payment: Some(payment),
                    outcome: CheckoutOutcome::Confirmed,
                    cart_cleared,
                })
            }
            PaymentStatus::Failed => {
                let reason = decline_reason(&payment);
                self.record(
                    saga_id,
                    saga,
                    SagaEvent::payment_declined(payment.id, reason.clone()),
                )
                .await?;
                let order = self
                    .record_payment_status(
                        saga_id,
                        saga,
                        checkout::STEP_RECORD_PAYMENT,
                        order_id,
                        PaymentStatus::Failed,
                    )
                    .await?;
                self.record(saga_id, saga, SagaEvent::saga_declined(reason.clone()))
                    .await?;
                tracing::info!(%order_id, %reason, "payment declined");

                Ok(OrderResult {
                    saga_id,
                    order,
                    payment: Some(payment),
                    outcome: CheckoutOutcome::Declined { reason },
                    cart_cleared: false,
                })
            }
            other => {
                let e = SagaError::PaymentService(format!("charge returned status {other}"));
                Err(self
                    .interrupt(saga_id, saga, checkout::STEP_RECORD_PAYMENT, e)
                    .await)
            }
        }
    }

    /// Pushes a payment status into the ledger as one saga step. A failure
    /// leaves the saga running.
    async fn record_payment_status(
        &self,
        saga_id: AggregateId,
        saga: &mut SagaInstance,
        step: &'static str,
        order_id: AggregateId,
        payment_status: PaymentStatus,
    ) -> Result<Order> {
        self.record(saga_id, saga, SagaEvent::step_started(step))
            .await?;
        let order = match self
            .ledger
            .update_payment_status(UpdatePaymentStatus::new(order_id, payment_status))
            .await
        {
            Ok(order) => order,
            Err(e) => return Err(self.interrupt(saga_id, saga, step, e.into()).await),
        };
        self.record(saga_id, saga, SagaEvent::step_completed(step))
            .await?;
        Ok(order)
    }

    /// Clears the cart and completes an approved checkout. Returns false when
    /// the clear failed, leaving the saga running.
    async fn complete_checkout(
        &self,
        saga_id: AggregateId,
        saga: &mut SagaInstance,
        order: &Order,
        payment: &Payment,
    ) -> Result<bool> {
        let customer_id = saga
            .customer_id()
            .ok_or(SagaError::SagaNotFound(saga_id))?;

        if !saga.has_completed(checkout::STEP_CLEAR_CART) {
            self.record(
                saga_id,
                saga,
                SagaEvent::step_started(checkout::STEP_CLEAR_CART),
            )
            .await?;
            if let Err(e) = self.carts.clear(customer_id).await {
                self.interrupt(saga_id, saga, checkout::STEP_CLEAR_CART, e)
                    .await;
                return Ok(false);
            }
            self.record(
                saga_id,
                saga,
                SagaEvent::step_completed(checkout::STEP_CLEAR_CART),
            )
            .await?;
        }
        self.record(saga_id, saga, SagaEvent::saga_completed())
            .await?;

        tracing::info!(order_id = %payment.order_id, "checkout confirmed");
        self.notify(Notification::OrderConfirmed {
            order_id: payment.order_id,
            customer_id,
            total: order.total_amount(),
        });
        self.notify(Notification::PaymentReceipt {
            order_id: payment.order_id,
            customer_id,
            payment_id: payment.id,
            amount: payment.amount,
            transaction_id: payment.transaction_id.clone(),
        });
        Ok(true)
    }

    /// Outcome of a keyed checkout that already ran.
    async fn replay_checkout(
        &self,
        saga_id: AggregateId,
        saga: SagaInstance,
    ) -> Result<OrderResult> {
        let saga = self.resume_saga(saga_id, saga).await?;
        if saga.state() == SagaState::Failed {
            return Err(SagaError::PreviousAttemptFailed {
                saga_id,
                reason: saga.failure_reason().unwrap_or("unknown").to_string(),
            });
        }

        let order_id = saga.order_id().ok_or(SagaError::SagaNotFound(saga_id))?;
        let order = self.existing_order(order_id).await?;
        let payment = match saga.payment_id() {
            Some(payment_id) => self.payments.get_payment(payment_id).await?,
            None => None,
        };
        let outcome = match saga.state() {
            SagaState::Declined => CheckoutOutcome::Declined {
                reason: saga.decline_reason().unwrap_or(DECLINE_MESSAGE).to_string(),
            },
            _ => CheckoutOutcome::Confirmed,
        };

        Ok(OrderResult {
            saga_id,
            order,
            payment,
            outcome,
            cart_cleared: saga.has_completed(checkout::STEP_CLEAR_CART),
        })
    }

    /// Caller holds the customer's checkout lock.
    async fn resume_saga(&self, saga_id: AggregateId, mut saga: SagaInstance) -> Result<SagaInstance> {
        if saga.state().is_terminal() {
            return Ok(saga);
        }

        tracing::info!(%saga_id, saga_type = saga.saga_type(), "resuming saga");
        if saga.saga_type() == checkout::ORDER_REFUND {
            self.resume_refund(saga_id, &mut saga).await?;
        } else {
            self.resume_payment(saga_id, &mut saga).await?;
        }
        Ok(saga)
    }

    async fn resume_payment(&self, saga_id: AggregateId, saga: &mut SagaInstance) -> Result<()> {
        let order_id = saga.order_id().ok_or(SagaError::SagaNotFound(saga_id))?;
        let Some(order) = self.ledger.get_order(order_id).await? else {
            return self
                .record(saga_id, saga, SagaEvent::saga_failed("order was never created"))
                .await;
        };

        let Some(payment) = self.find_saga_payment(saga, order_id).await? else {
            return self
                .record(
                    saga_id,
                    saga,
                    SagaEvent::saga_failed("payment never reached the gateway"),
                )
                .await;
        };
        if saga.payment_id().is_none() {
            self.record(
                saga_id,
                saga,
                SagaEvent::payment_step_completed(
                    checkout::STEP_CHARGE_PAYMENT,
                    payment.id,
                    payment.transaction_id.clone(),
                ),
            )
            .await?;
        }

        match payment.status {
            PaymentStatus::Completed | PaymentStatus::Refunded => {
                let order = if matches!(
                    order.payment_status(),
                    PaymentStatus::Pending | PaymentStatus::Failed
                ) {
                    self.record_payment_status(
                        saga_id,
                        saga,
                        checkout::STEP_RECORD_PAYMENT,
                        order_id,
                        PaymentStatus::Completed,
                    )
                    .await?
                } else {
                    order
                };
                self.complete_checkout(saga_id, saga, &order, &payment)
                    .await?;
            }
            PaymentStatus::Failed => {
                let reason = decline_reason(&payment);
                if saga.decline_reason().is_none() {
                    self.record(
                        saga_id,
                        saga,
                        SagaEvent::payment_declined(payment.id, reason.clone()),
                    )
                    .await?;
                }
                if order.payment_status() == PaymentStatus::Pending {
                    self.record_payment_status(
                        saga_id,
                        saga,
                        checkout::STEP_RECORD_PAYMENT,
                        order_id,
                        PaymentStatus::Failed,
                    )
                    .await?;
                }
                self.record(saga_id, saga, SagaEvent::saga_declined(reason))
                    .await?;
            }
            PaymentStatus::Pending => {
                tracing::info!(%saga_id, payment_id = %payment.id, "payment still pending at gateway");
            }
        }
        Ok(())
    }

    async fn resume_refund(&self, saga_id: AggregateId, saga: &mut SagaInstance) -> Result<()> {
        let order_id = saga.order_id().ok_or(SagaError::SagaNotFound(saga_id))?;
        let order = self.existing_order(order_id).await?;

        let refunded = self
            .payments
            .payments_for_order(order_id)
            .await?
            .into_iter()
            .find(|p| p.status == PaymentStatus::Refunded);
        let Some(refunded) = refunded else {
            return self
                .record(saga_id, saga, SagaEvent::saga_failed("refund was never performed"))
                .await;
        };

        if !saga.has_completed(checkout::STEP_REFUND_PAYMENT) {
            self.record(
                saga_id,
                saga,
                SagaEvent::payment_step_completed(
                    checkout::STEP_REFUND_PAYMENT,
                    refunded.id,
                    refunded.transaction_id.clone(),
                ),
            )
            .await?;
        }
        if order.payment_status() == PaymentStatus::Completed {
            self.record_payment_status(
                saga_id,
                saga,
                checkout::STEP_RECORD_REFUND,
                order_id,
                PaymentStatus::Refunded,
            )
            .await?;
        }
        self.record(saga_id, saga, SagaEvent::saga_completed())
            .await?;

        metrics::counter!("refunds_total").increment(1);
        if let Some(customer_id) = saga.customer_id() {
            self.notify(Notification::PaymentRefunded {
                order_id,
                customer_id,
                payment_id: refunded.id,
                amount: refunded.amount,
            });
        }
        Ok(())
    }

    /// The payment this saga produced: the recorded one, else a completed
    /// payment of the order, else an attempt made after the saga started.
    async fn find_saga_payment(
        &self,
        saga: &SagaInstance,
        order_id: AggregateId,
    ) -> Result<Option<Payment>> {
        if let Some(payment_id) = saga.payment_id() {
            return self.payments.get_payment(payment_id).await;
        }

        let started_at = saga.started_at();
        let payments = self.payments.payments_for_order(order_id).await?;
        Ok(payments.into_iter().find(|p| {
            matches!(p.status, PaymentStatus::Completed | PaymentStatus::Refunded)
                || started_at.is_some_and(|t| p.created_at >= t)
        }))
    }
}

// Plumbing
impl<S, C, L, P> FulfillmentCoordinator<S, C, L, P>
where
    S: EventStore,
    C: CartStore,
    L: OrderLedger,
    P: PaymentProcessor,
{
    /// Appends one saga event with an expected-version check and applies it.
    async fn record(
        &self,
        saga_id: AggregateId,
        saga: &mut SagaInstance,
        event: SagaEvent,
    ) -> Result<()> {
        let current = saga.version();
        let envelope = EventEnvelope::from_event(
            saga_id,
            SagaInstance::aggregate_type(),
            current.next(),
            event.event_type(),
            &event,
        )?;
        let version = self
            .store()
            .append(vec![envelope], AppendOptions::expect_version(current))
            .await?;

        saga.apply(event);
        saga.set_version(version);
        Ok(())
    }

    /// Records a failed step and hands the error back. The saga stays running.
    async fn interrupt(
        &self,
        saga_id: AggregateId,
        saga: &mut SagaInstance,
        step: &'static str,
        error: SagaError,
    ) -> SagaError {
        tracing::warn!(%saga_id, step, error = %error, "saga step failed");
        if let Err(e) = self
            .record(saga_id, saga, SagaEvent::step_failed(step, error.to_string()))
            .await
        {
            tracing::error!(%saga_id, error = %e, "could not record step failure");
        }
        error
    }

    /// Records a failed step and fails the saga. Only for failures that left
    /// nothing behind at the gateway.
    async fn abort(
        &self,
        saga_id: AggregateId,
        saga: &mut SagaInstance,
        step: &'static str,
        error: SagaError,
    ) -> SagaError {
        let error = self.interrupt(saga_id, saga, step, error).await;
        if let Err(e) = self
            .record(saga_id, saga, SagaEvent::saga_failed(error.to_string()))
            .await
        {
            tracing::error!(%saga_id, error = %e, "could not record saga failure");
        }
        error
    }

    async fn existing_order(&self, order_id: AggregateId) -> Result<Order> {
        self.ledger
            .get_order(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))
    }

    /// Serializes checkouts, retries and refunds of one customer.
    ///
    /// Locks nobody holds or waits on are dropped from the table first.
    async fn lock_customer(&self, customer_id: CustomerId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.checkout_locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(customer_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Fire and forget; a failed notification is logged only.
    fn notify(&self, notification: Notification) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let kind = notification.kind();
            if let Err(e) = notifier.notify(notification).await {
                tracing::warn!(kind, error = %e, "notification failed");
            }
        });
    }
}

fn decline_reason(payment: &Payment) -> String {
    payment
        .error_message
        .clone()
        .unwrap_or_else(|| DECLINE_MESSAGE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        ApprovalPolicy, InMemoryCartStore, InMemoryPaymentProcessor, NewCartItem,
    };
    use common::{ErrorKind, ProductId};
    use event_store::InMemoryEventStore;
    use ledger::{Money, OrderService};

    type TestCoordinator = FulfillmentCoordinator<
        InMemoryEventStore,
        InMemoryCartStore,
        OrderService<InMemoryEventStore>,
        InMemoryPaymentProcessor,
    >;

    fn setup(policy: ApprovalPolicy) -> (TestCoordinator, InMemoryCartStore, InMemoryPaymentProcessor) {
        let store = InMemoryEventStore::new();
        let carts = InMemoryCartStore::new();
        let payments = InMemoryPaymentProcessor::with_policy(policy);
        let coordinator = FulfillmentCoordinator::new(
            store.clone(),
            carts.clone(),
            OrderService::new(store),
            payments.clone(),
        );
        (coordinator, carts, payments)
    }

    async fn fill_cart(carts: &InMemoryCartStore, customer_id: CustomerId) {
        carts
            .add_item(
                customer_id,
                NewCartItem::new(ProductId::new(7), 2, Money::from_cents(1000), "Widget"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_saga_steps_recorded() {
        let (coordinator, carts, _) = setup(ApprovalPolicy::AlwaysApprove);
        let customer = CustomerId::new(5);
        fill_cart(&carts, customer).await;

        let result = coordinator
            .place_order(PlaceOrder::new(customer, "1 Main St", "credit_card"))
            .await
            .unwrap();

        let saga = coordinator.get_saga(result.saga_id).await.unwrap().unwrap();
        assert_eq!(saga.state(), SagaState::Completed);
        assert_eq!(saga.saga_type(), checkout::CHECKOUT);
        assert_eq!(
            saga.completed_steps(),
            &[
                checkout::STEP_CREATE_ORDER,
                checkout::STEP_CHARGE_PAYMENT,
                checkout::STEP_RECORD_PAYMENT,
                checkout::STEP_CLEAR_CART,
            ]
        );
        assert_eq!(saga.order_id(), result.order.id());
        assert_eq!(saga.payment_id(), result.payment.map(|p| p.id));
    }

    #[tokio::test]
    async fn test_empty_cart_writes_nothing() {
        let (coordinator, _, payments) = setup(ApprovalPolicy::AlwaysApprove);

        let err = coordinator
            .place_order(PlaceOrder::new(CustomerId::new(5), "addr", "card"))
            .await
            .unwrap_err();

        assert!(matches!(err, SagaError::EmptyCart(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(coordinator.store().event_count().await, 0);
        assert_eq!(payments.charge_attempts().await, 0);
    }

    #[tokio::test]
    async fn test_zero_total_writes_nothing() {
        let (coordinator, carts, payments) = setup(ApprovalPolicy::AlwaysApprove);
        let customer = CustomerId::new(5);
        carts
            .add_item(
                customer,
                NewCartItem::new(ProductId::new(9), 1, Money::zero(), "Sample"),
            )
            .await
            .unwrap();

        let err = coordinator
            .place_order(PlaceOrder::new(customer, "addr", "card"))
            .await
            .unwrap_err();

        assert!(matches!(err, SagaError::InvalidAmount(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(coordinator.store().event_count().await, 0);
        assert_eq!(payments.charge_attempts().await, 0);
        assert!(!carts.get_cart(customer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idle_checkout_locks_are_dropped() {
        let (coordinator, carts, _) = setup(ApprovalPolicy::AlwaysApprove);
        for id in 1..=50 {
            let customer = CustomerId::new(id);
            fill_cart(&carts, customer).await;
            coordinator
                .place_order(PlaceOrder::new(customer, "addr", "card"))
                .await
                .unwrap();
        }
        assert_eq!(coordinator.checkout_locks.lock().await.len(), 1);

        let held = coordinator.lock_customer(CustomerId::new(1)).await;
        let _other = coordinator.lock_customer(CustomerId::new(2)).await;
        assert_eq!(coordinator.checkout_locks.lock().await.len(), 2);

        drop(held);
        let _third = coordinator.lock_customer(CustomerId::new(3)).await;
        let locks = coordinator.checkout_locks.lock().await;
        assert_eq!(locks.len(), 2);
        assert!(locks.contains_key(&CustomerId::new(2)));
        assert!(!locks.contains_key(&CustomerId::new(1)));
    }

    #[tokio::test]
    async fn test_unreadable_cart_is_infrastructure() {
        let (coordinator, carts, _) = setup(ApprovalPolicy::AlwaysApprove);
        carts.set_fail_on_read(true).await;

        let err = coordinator
            .place_order(PlaceOrder::new(CustomerId::new(5), "addr", "card"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert_eq!(coordinator.store().event_count().await, 0);
    }

    #[tokio::test]
    async fn test_get_unknown_saga() {
        let (coordinator, _, _) = setup(ApprovalPolicy::AlwaysApprove);
        assert!(coordinator.get_saga(AggregateId::new()).await.unwrap().is_none());

        let err = coordinator.resume(AggregateId::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_checkout_saga_id_is_stable() {
        let a = checkout_saga_id(CustomerId::new(5), "key");
        assert_eq!(a, checkout_saga_id(CustomerId::new(5), "key"));
        assert_ne!(a, checkout_saga_id(CustomerId::new(6), "key"));
        assert_ne!(a, checkout_saga_id(CustomerId::new(5), "other"));
    }
}
