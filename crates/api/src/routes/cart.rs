//! Cart endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::CustomerId;
use event_store::EventStore;
use fulfillment::{Cart, CartLine, CartStore, NewCartItem};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: i64,
}

/// GET /cart/:customer_id: The customer's lines, newest first, with totals.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(customer_id): Path<u64>,
) -> Result<Json<Cart>, ApiError> {
    let cart = state
        .coordinator
        .carts()
        .get_cart(CustomerId::new(customer_id))
        .await?;
    Ok(Json(cart))
}

/// POST /cart/:customer_id/items: Add a product, merging into an existing line.
#[tracing::instrument(skip(state, item), fields(product_id = %item.product_id))]
pub async fn add_item<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(customer_id): Path<u64>,
    Json(item): Json<NewCartItem>,
) -> Result<(StatusCode, Json<CartLine>), ApiError> {
    let line = state
        .coordinator
        .carts()
        .add_item(CustomerId::new(customer_id), item)
        .await?;
    Ok((StatusCode::CREATED, Json(line)))
}

/// PUT /cart/:customer_id/items/:item_id: Set a line's quantity. Zero or
/// less removes the line and answers 204.
#[tracing::instrument(skip(state, req))]
pub async fn update_item<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((customer_id, item_id)): Path<(u64, u64)>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Response, ApiError> {
    let line = state
        .coordinator
        .carts()
        .update_item(CustomerId::new(customer_id), item_id, req.quantity)
        .await?;

    Ok(match line {
        Some(line) => Json(line).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// DELETE /cart/:customer_id/items/:item_id
#[tracing::instrument(skip(state))]
pub async fn remove_item<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((customer_id, item_id)): Path<(u64, u64)>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .carts()
        .remove_item(CustomerId::new(customer_id), item_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /cart/:customer_id
#[tracing::instrument(skip(state))]
pub async fn clear<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(customer_id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .carts()
        .clear(CustomerId::new(customer_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
