//! Payment processor trait and simulated gateway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId};
use event_store::Version;
use ledger::{Money, PaymentStatus};
use rand::Rng;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::journal::Journal;
use crate::error::SagaError;

pub const DEFAULT_CURRENCY: &str = "USD";

pub const DEFAULT_APPROVAL_RATE: f64 = 0.9;

pub const SIMULATED_GATEWAY: &str = "simulated_gateway";

pub const DECLINE_MESSAGE: &str = "Payment declined by issuer";

const MAX_TRANSACTION_ID_ATTEMPTS: usize = 3;

const PAYMENT_AGGREGATE_TYPE: &str = "Payment";

const PAYMENT_RECORDED: &str = "PaymentRecorded";

/// Identifier of one charge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(Uuid);

impl PaymentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PaymentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Card data for a single charge.
///
/// Number and CVC are held as secrets for the duration of the call and are
/// never stored or logged; a payment keeps only the last four digits.
#[derive(Deserialize)]
pub struct CardDetails {
    number: Secret<String>,
    cvc: Secret<String>,
    #[serde(default)]
    holder_name: Option<String>,
}

impl CardDetails {
    pub fn new(number: impl Into<String>, cvc: impl Into<String>) -> Self {
        Self {
            number: Secret::new(number.into()),
            cvc: Secret::new(cvc.into()),
            holder_name: None,
        }
    }

    pub fn with_holder(mut self, holder_name: impl Into<String>) -> Self {
        self.holder_name = Some(holder_name.into());
        self
    }

    pub fn holder_name(&self) -> Option<&str> {
        self.holder_name.as_deref()
    }

    /// Last four digits of the card number, ignoring spaces and dashes.
    pub fn last4(&self) -> Option<String> {
        let digits: Vec<char> = self
            .number
            .expose_secret()
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        if digits.len() < 4 {
            return None;
        }
        Some(digits[digits.len() - 4..].iter().collect())
    }

    fn has_cvc(&self) -> bool {
        !self.cvc.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDetails")
            .field("last4", &self.last4())
            .field("holder_name", &self.holder_name)
            .finish_non_exhaustive()
    }
}

/// A charge to run against the gateway.
#[derive(Debug)]
pub struct ChargeRequest {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub currency: String,
    pub method: String,
    pub card: Option<CardDetails>,
}

impl ChargeRequest {
    pub fn new(
        order_id: AggregateId,
        customer_id: CustomerId,
        amount: Money,
        method: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            customer_id,
            amount,
            currency: DEFAULT_CURRENCY.to_string(),
            method: method.into(),
            card: None,
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_card(mut self, card: Option<CardDetails>) -> Self {
        self.card = card;
        self
    }
}

/// Durable receipt of one charge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub currency: String,
    pub method: String,
    pub status: PaymentStatus,
    pub transaction_id: String,
    pub gateway: String,
    pub card_last4: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }
}

/// How the simulated gateway decides a charge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ApprovalPolicy {
    /// Approve with the given probability.
    Random { approval_rate: f64 },
    AlwaysApprove,
    AlwaysDecline,
}

impl ApprovalPolicy {
    fn approves(&self) -> bool {
        match *self {
            ApprovalPolicy::AlwaysApprove => true,
            ApprovalPolicy::AlwaysDecline => false,
            ApprovalPolicy::Random { approval_rate } => {
                let p = if approval_rate.is_nan() {
                    0.0
                } else {
                    approval_rate.clamp(0.0, 1.0)
                };
                rand::thread_rng().gen_bool(p)
            }
        }
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        ApprovalPolicy::Random {
            approval_rate: DEFAULT_APPROVAL_RATE,
        }
    }
}

/// Payment gateway operations.
///
/// A decline is a normal return value with status `failed`; only
/// infrastructure problems are errors.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Runs one charge attempt. Rejected when the order already has a
    /// completed payment.
    async fn charge(&self, request: ChargeRequest) -> Result<Payment, SagaError>;

    /// Refunds a completed payment.
    async fn refund(&self, payment_id: PaymentId) -> Result<Payment, SagaError>;

    async fn get_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>, SagaError>;

    /// Newest first.
    async fn payments_for_order(&self, order_id: AggregateId) -> Result<Vec<Payment>, SagaError>;

    /// Newest first.
    async fn payments_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<Payment>, SagaError>;
}

/// `txn_<unix-nanos>_<random>`
pub fn generate_transaction_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("txn_{nanos}_{suffix}")
}

type TransactionIdSource = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: Vec<Payment>,
    policy: ApprovalPolicy,
    fail_on_charge: bool,
    fail_on_refund: bool,
    charge_delay: Option<Duration>,
    charge_attempts: usize,
}

impl InMemoryPaymentState {
    fn upsert(&mut self, payment: Payment) {
        match self.payments.iter_mut().find(|p| p.id == payment.id) {
            Some(existing) => *existing = payment,
            None => self.payments.push(payment),
        }
    }

    fn has_transaction(&self, transaction_id: &str) -> bool {
        self.payments
            .iter()
            .any(|p| p.transaction_id == transaction_id)
    }
}

/// Simulated gateway keeping its receipts in memory.
///
/// With a [`Journal`] every receipt is also appended to the event store,
/// one stream per payment: version 1 for the charge, 2 for its refund.
#[derive(Clone)]
pub struct InMemoryPaymentProcessor {
    state: Arc<RwLock<InMemoryPaymentState>>,
    transaction_ids: TransactionIdSource,
    journal: Option<Journal>,
}

impl Default for InMemoryPaymentProcessor {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            transaction_ids: Arc::new(generate_transaction_id),
            journal: None,
        }
    }
}

impl std::fmt::Debug for InMemoryPaymentProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPaymentProcessor")
            .field("state", &self.state)
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}

impl InMemoryPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ApprovalPolicy) -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryPaymentState {
                policy,
                ..Default::default()
            })),
            ..Self::default()
        }
    }

    /// Replaces the transaction id generator.
    pub fn with_transaction_ids(
        mut self,
        source: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.transaction_ids = Arc::new(source);
        self
    }

    /// Loads every journaled receipt and keeps journaling new ones.
    #[tracing::instrument(skip_all)]
    pub async fn restore(mut self, journal: Journal) -> Result<Self, SagaError> {
        {
            let mut state = self.state.write().await;
            for envelope in journal.replay(PAYMENT_RECORDED).await? {
                state.upsert(envelope.decode()?);
            }
            tracing::info!(payments = state.payments.len(), "payment receipts restored");
        }
        self.journal = Some(journal);
        Ok(self)
    }

    async fn record(&self, payment: &Payment, version: Version) -> Result<(), SagaError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        journal
            .record(
                AggregateId::from_uuid(payment.id.as_uuid()),
                PAYMENT_AGGREGATE_TYPE,
                version,
                PAYMENT_RECORDED,
                payment,
            )
            .await
    }

    pub async fn set_policy(&self, policy: ApprovalPolicy) {
        self.state.write().await.policy = policy;
    }

    /// Makes `charge` fail without recording a payment until reset.
    pub async fn set_fail_on_charge(&self, fail: bool) {
        self.state.write().await.fail_on_charge = fail;
    }

    pub async fn set_fail_on_refund(&self, fail: bool) {
        self.state.write().await.fail_on_refund = fail;
    }

    /// Delays every charge before it reaches the gateway.
    pub async fn set_charge_delay(&self, delay: Option<Duration>) {
        self.state.write().await.charge_delay = delay;
    }

    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }

    /// Charge calls received, including rejected ones.
    pub async fn charge_attempts(&self) -> usize {
        self.state.read().await.charge_attempts
    }

    fn unique_transaction_id(&self, state: &InMemoryPaymentState) -> Result<String, SagaError> {
        let mut last = String::new();
        for _ in 0..MAX_TRANSACTION_ID_ATTEMPTS {
            let candidate = (self.transaction_ids)();
            if !state.has_transaction(&candidate) {
                return Ok(candidate);
            }
            tracing::warn!(transaction_id = %candidate, "transaction id collision, regenerating");
            last = candidate;
        }
        Err(SagaError::DuplicateTransactionId(last))
    }
}

#[async_trait]
impl PaymentProcessor for InMemoryPaymentProcessor {
    #[tracing::instrument(
        skip(self, request),
        fields(order_id = %request.order_id, amount = %request.amount)
    )]
    async fn charge(&self, request: ChargeRequest) -> Result<Payment, SagaError> {
        if !request.amount.is_positive() {
            return Err(SagaError::InvalidAmount(request.amount));
        }

        let delay = {
            let mut state = self.state.write().await;
            state.charge_attempts += 1;
            if state.fail_on_charge {
                return Err(SagaError::PaymentService(
                    "payment gateway unavailable".to_string(),
                ));
            }
            state.charge_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        if state
            .payments
            .iter()
            .any(|p| p.order_id == request.order_id && p.is_completed())
        {
            return Err(SagaError::AlreadyPaid(request.order_id));
        }

        let transaction_id = self.unique_transaction_id(&state)?;
        let approved = state.policy.approves();
        let card_last4 = request.card.as_ref().and_then(CardDetails::last4);
        if let Some(card) = &request.card {
            tracing::debug!(has_cvc = card.has_cvc(), "card details supplied");
        }

        let payment = Payment {
            id: PaymentId::new(),
            order_id: request.order_id,
            customer_id: request.customer_id,
            amount: request.amount,
            currency: request.currency,
            method: request.method,
            status: if approved {
                PaymentStatus::Completed
            } else {
                PaymentStatus::Failed
            },
            transaction_id,
            gateway: SIMULATED_GATEWAY.to_string(),
            card_last4,
            error_message: (!approved).then(|| DECLINE_MESSAGE.to_string()),
            created_at: Utc::now(),
            refunded_at: None,
        };
        self.record(&payment, Version::first()).await?;
        state.payments.push(payment.clone());

        metrics::counter!("payments_charged_total", "outcome" => payment.status.as_str())
            .increment(1);
        tracing::info!(
            payment_id = %payment.id,
            transaction_id = %payment.transaction_id,
            status = %payment.status,
            "charge processed"
        );
        Ok(payment)
    }

    #[tracing::instrument(skip(self))]
    async fn refund(&self, payment_id: PaymentId) -> Result<Payment, SagaError> {
        let mut state = self.state.write().await;
        let fail_on_refund = state.fail_on_refund;

        let payment = state
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id)
            .ok_or(SagaError::PaymentNotFound(payment_id))?;

        if !payment.is_completed() {
            return Err(SagaError::PaymentNotRefundable {
                payment_id,
                status: payment.status,
            });
        }
        if fail_on_refund {
            return Err(SagaError::PaymentService(
                "refund rejected by gateway".to_string(),
            ));
        }

        let mut refunded = payment.clone();
        refunded.status = PaymentStatus::Refunded;
        refunded.refunded_at = Some(Utc::now());
        self.record(&refunded, Version::first().next()).await?;

        *payment = refunded.clone();
        tracing::info!(order_id = %refunded.order_id, "payment refunded");
        Ok(refunded)
    }

    async fn get_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>, SagaError> {
        let state = self.state.read().await;
        Ok(state.payments.iter().find(|p| p.id == payment_id).cloned())
    }

    async fn payments_for_order(&self, order_id: AggregateId) -> Result<Vec<Payment>, SagaError> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .rev()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn payments_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<Payment>, SagaError> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .rev()
            .filter(|p| p.customer_id == customer_id)
            .cloned()
            .collect())
    }
}
