//! Saga instance aggregate.

use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId};
use event_store::Version;
use ledger::Aggregate;
use serde::{Deserialize, Serialize};

use crate::error::SagaError;
use crate::events::SagaEvent;
use crate::services::payment::PaymentId;
use crate::state::SagaState;

/// An event-sourced saga instance.
///
/// Tracks one run of a checkout, payment retry or refund: which steps have
/// completed, the payment it produced and how it ended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SagaInstance {
    id: Option<AggregateId>,
    version: Version,
    saga_type: String,
    customer_id: Option<CustomerId>,
    order_id: Option<AggregateId>,
    idempotency_key: Option<String>,
    state: SagaState,
    /// Step started but not yet completed or failed.
    current_step: Option<String>,
    completed_steps: Vec<String>,
    payment_id: Option<PaymentId>,
    transaction_id: Option<String>,
    decline_reason: Option<String>,
    failure_reason: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Aggregate for SagaInstance {
    type Event = SagaEvent;
    type Error = SagaError;

    fn aggregate_type() -> &'static str {
        "FulfillmentSaga"
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
            SagaEvent::SagaStarted(data) => {
                self.id = Some(data.saga_id);
                self.saga_type = data.saga_type;
                self.customer_id = Some(data.customer_id);
                self.order_id = Some(data.order_id);
                self.idempotency_key = data.idempotency_key;
                self.state = SagaState::Running;
                self.started_at = Some(data.started_at);
            }
            SagaEvent::StepStarted(data) => {
                self.current_step = Some(data.step_name);
            }
            SagaEvent::StepCompleted(data) => {
                self.current_step = None;
                self.completed_steps.push(data.step_name);
                if let Some(pid) = data.payment_id {
                    self.payment_id = Some(pid);
                }
                if let Some(txn) = data.transaction_id {
                    self.transaction_id = Some(txn);
                }
            }
            SagaEvent::StepFailed(data) => {
                self.current_step = None;
                self.failure_reason = Some(data.error);
            }
            SagaEvent::PaymentDeclined(data) => {
                self.payment_id = Some(data.payment_id);
                self.decline_reason = Some(data.reason);
            }
            SagaEvent::SagaCompleted(data) => {
                self.state = SagaState::Completed;
                self.current_step = None;
                self.failure_reason = None;
                self.finished_at = Some(data.completed_at);
            }
            SagaEvent::SagaDeclined(data) => {
                self.state = SagaState::Declined;
                self.current_step = None;
                self.decline_reason = Some(data.reason);
                self.finished_at = Some(data.declined_at);
            }
            SagaEvent::SagaFailed(data) => {
                self.state = SagaState::Failed;
                self.current_step = None;
                self.failure_reason = Some(data.reason);
                self.finished_at = Some(data.failed_at);
            }
        }
    }
}

// Query methods
impl SagaInstance {
    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    pub fn has_completed(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }

    pub fn payment_id(&self) -> Option<PaymentId> {
        self.payment_id
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn decline_reason(&self) -> Option<&str> {
        self.decline_reason.as_deref()
    }

    /// Last step error, or the reason the saga failed.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }
}
