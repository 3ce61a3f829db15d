//! Saga domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId};
use ledger::DomainEvent;
use serde::{Deserialize, Serialize};

use crate::services::payment::PaymentId;

/// Events that can occur during saga execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// The order id is allocated up front, so a crashed run can always find
    /// the order it was working on.
    SagaStarted(SagaStartedData),

    StepStarted(StepData),

    StepCompleted(StepCompletedData),

    StepFailed(StepFailedData),

    /// The gateway declined the charge.
    PaymentDeclined(PaymentDeclinedData),

    SagaCompleted(SagaCompletedData),

    SagaDeclined(SagaDeclinedData),

    SagaFailed(SagaFailedData),
}

impl DomainEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::StepStarted(_) => "StepStarted",
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::PaymentDeclined(_) => "PaymentDeclined",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaDeclined(_) => "SagaDeclined",
            SagaEvent::SagaFailed(_) => "SagaFailed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub saga_id: AggregateId,
    /// Checkout, PaymentRetry or OrderRefund.
    pub saga_type: String,
    pub customer_id: CustomerId,
    pub order_id: AggregateId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepData {
    pub step_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedData {
    pub step_name: String,
    /// Set by the charge and refund steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<PaymentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailedData {
    pub step_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDeclinedData {
    pub payment_id: PaymentId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaCompletedData {
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaDeclinedData {
    pub reason: String,
    pub declined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

// Convenience constructors
impl SagaEvent {
    pub fn saga_started(
        saga_id: AggregateId,
        saga_type: impl Into<String>,
        customer_id: CustomerId,
        order_id: AggregateId,
        idempotency_key: Option<String>,
    ) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            saga_id,
            saga_type: saga_type.into(),
            customer_id,
            order_id,
            idempotency_key,
            started_at: Utc::now(),
        })
    }

    pub fn step_started(step_name: impl Into<String>) -> Self {
        SagaEvent::StepStarted(StepData {
            step_name: step_name.into(),
        })
    }

    pub fn step_completed(step_name: impl Into<String>) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step_name: step_name.into(),
            payment_id: None,
            transaction_id: None,
        })
    }

    /// StepCompleted for a step that produced a payment.
    pub fn payment_step_completed(
        step_name: impl Into<String>,
        payment_id: PaymentId,
        transaction_id: impl Into<String>,
    ) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step_name: step_name.into(),
            payment_id: Some(payment_id),
            transaction_id: Some(transaction_id.into()),
        })
    }

    pub fn step_failed(step_name: impl Into<String>, error: impl Into<String>) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step_name: step_name.into(),
            error: error.into(),
        })
    }

    pub fn payment_declined(payment_id: PaymentId, reason: impl Into<String>) -> Self {
        SagaEvent::PaymentDeclined(PaymentDeclinedData {
            payment_id,
            reason: reason.into(),
        })
    }

    pub fn saga_completed() -> Self {
        SagaEvent::SagaCompleted(SagaCompletedData {
            completed_at: Utc::now(),
        })
    }

    pub fn saga_declined(reason: impl Into<String>) -> Self {
        SagaEvent::SagaDeclined(SagaDeclinedData {
            reason: reason.into(),
            declined_at: Utc::now(),
        })
    }

    pub fn saga_failed(reason: impl Into<String>) -> Self {
        SagaEvent::SagaFailed(SagaFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }
}
