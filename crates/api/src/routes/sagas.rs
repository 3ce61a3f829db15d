//! Saga inspection and recovery endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use event_store::EventStore;
use fulfillment::{ReconcileReport, SagaInstance, SagaState};
use serde::Serialize;

use super::parse_aggregate_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct SagaStatusResponse {
    pub saga_id: String,
    pub saga_type: String,
    pub state: SagaState,
    pub customer_id: Option<u64>,
    pub order_id: Option<String>,
    pub current_step: Option<String>,
    pub completed_steps: Vec<String>,
    pub payment_id: Option<String>,
    pub transaction_id: Option<String>,
    pub decline_reason: Option<String>,
    pub failure_reason: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl SagaStatusResponse {
    fn new(saga_id: String, saga: &SagaInstance) -> Self {
        Self {
            saga_id,
            saga_type: saga.saga_type().to_string(),
            state: saga.state(),
            customer_id: saga.customer_id().map(|c| c.as_u64()),
            order_id: saga.order_id().map(|id| id.to_string()),
            current_step: saga.current_step().map(String::from),
            completed_steps: saga.completed_steps().to_vec(),
            payment_id: saga.payment_id().map(|id| id.to_string()),
            transaction_id: saga.transaction_id().map(String::from),
            decline_reason: saga.decline_reason().map(String::from),
            failure_reason: saga.failure_reason().map(String::from),
            started_at: saga.started_at().map(|t| t.to_rfc3339()),
            finished_at: saga.finished_at().map(|t| t.to_rfc3339()),
        }
    }
}

/// GET /sagas/:id
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaStatusResponse>, ApiError> {
    let saga_id = parse_aggregate_id(&id)?;
    let saga = state
        .coordinator
        .get_saga(saga_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga {id} not found")))?;

    Ok(Json(SagaStatusResponse::new(id, &saga)))
}

/// POST /sagas/:id/resume: Finish one interrupted saga. Never charges.
#[tracing::instrument(skip(state))]
pub async fn resume<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaStatusResponse>, ApiError> {
    let saga_id = parse_aggregate_id(&id)?;
    let saga = state.coordinator.resume(saga_id).await?;
    Ok(Json(SagaStatusResponse::new(id, &saga)))
}

/// POST /sagas/reconcile: Resume every non-terminal saga.
#[tracing::instrument(skip(state))]
pub async fn reconcile<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<ReconcileReport>, ApiError> {
    let report = state.coordinator.reconcile().await?;
    Ok(Json(report))
}
