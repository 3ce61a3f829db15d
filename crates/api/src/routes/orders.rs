//! Checkout, order and payment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::CustomerId;
use event_store::EventStore;
use fulfillment::{
    CardDetails, CheckoutOutcome, OrderResult, Payment, PaymentId, PaymentProcessor, PlaceOrder,
};
use ledger::{
    Aggregate, Order, OrderLedger, OrderStatus, PaymentStatus, UpdatePaymentStatus,
};
use serde::{Deserialize, Serialize};

use super::parse_aggregate_id;
use crate::AppState;
use crate::error::ApiError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

// -- Request types --

#[derive(Deserialize)]
pub struct PlaceOrderRequest {
    pub customer_id: u64,
    pub shipping_address: String,
    pub payment_method: String,
    #[serde(default)]
    pub card: Option<CardDetails>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Deserialize)]
pub struct RetryPaymentRequest {
    #[serde(default)]
    pub card: Option<CardDetails>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub tracking_number: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdatePaymentStatusRequest {
    pub payment_status: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub customer_id: Option<u64>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub shipping_address: String,
    pub payment_method: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: u64,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub line_total_cents: Option<i64>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        let items = order
            .items()
            .iter()
            .map(|item| OrderItemResponse {
                product_id: item.product_id.as_u64(),
                product_name: item.product_name.clone(),
                quantity: item.quantity,
                unit_price_cents: item.unit_price.cents(),
                line_total_cents: item.line_total().map(|total| total.cents()),
            })
            .collect();

        OrderResponse {
            id: order.id().map(|id| id.to_string()).unwrap_or_default(),
            customer_id: order.customer_id().map(|c| c.as_u64()),
            status: order.status(),
            payment_status: order.payment_status(),
            items,
            total_cents: order.total_amount().cents(),
            shipping_address: order.shipping_address().to_string(),
            payment_method: order.payment_method().to_string(),
            created_at: order.created_at().to_rfc3339(),
            updated_at: order.updated_at().to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub saga_id: String,
    pub order: OrderResponse,
    pub payment: Option<Payment>,
    pub outcome: &'static str,
    pub reason: Option<String>,
    pub cart_cleared: bool,
}

impl From<&OrderResult> for CheckoutResponse {
    fn from(result: &OrderResult) -> Self {
        let (outcome, reason) = match &result.outcome {
            CheckoutOutcome::Confirmed => ("confirmed", None),
            CheckoutOutcome::Declined { reason } => ("declined", Some(reason.clone())),
        };
        CheckoutResponse {
            saga_id: result.saga_id.to_string(),
            order: OrderResponse::from(&result.order),
            payment: result.payment.clone(),
            outcome,
            reason,
            cart_cleared: result.cart_cleared,
        }
    }
}

#[derive(Serialize)]
pub struct RefundResponse {
    pub saga_id: String,
    pub order: OrderResponse,
    pub payment: Payment,
}

fn checkout_response(
    result: OrderResult,
    confirmed: StatusCode,
) -> (StatusCode, Json<CheckoutResponse>) {
    let status = if result.is_confirmed() {
        confirmed
    } else {
        StatusCode::PAYMENT_REQUIRED
    };
    (status, Json(CheckoutResponse::from(&result)))
}

// -- Handlers --

/// POST /orders: Check out the customer's cart.
///
/// 201 when the charge is approved, 402 with the pending order when it is
/// declined. An `Idempotency-Key` header takes precedence over the body field.
#[tracing::instrument(skip(state, headers, req), fields(customer_id = req.customer_id))]
pub async fn place<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let header_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| {
            value
                .to_str()
                .map(str::to_string)
                .map_err(|_| ApiError::BadRequest("Invalid Idempotency-Key header".to_string()))
        })
        .transpose()?;

    let mut cmd = PlaceOrder::new(
        CustomerId::new(req.customer_id),
        req.shipping_address,
        req.payment_method,
    );
    if let Some(card) = req.card {
        cmd = cmd.with_card(card);
    }
    if let Some(key) = header_key.or(req.idempotency_key).filter(|k| !k.is_empty()) {
        cmd = cmd.with_idempotency_key(key);
    }

    let result = state.coordinator.place_order(cmd).await?;
    Ok(checkout_response(result, StatusCode::CREATED))
}

/// GET /orders/:id
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state
        .coordinator
        .ledger()
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(OrderResponse::from(&order)))
}

/// GET /customers/:customer_id/orders: Newest first.
#[tracing::instrument(skip(state))]
pub async fn for_customer<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(customer_id): Path<u64>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state
        .coordinator
        .ledger()
        .orders_for_customer(CustomerId::new(customer_id))
        .await?;

    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// PATCH /orders/:id/status: Shipping or delivering the order notifies the
/// customer.
#[tracing::instrument(skip(state, req), fields(status = %req.status))]
pub async fn update_status<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let status: OrderStatus = req.status.parse()?;

    let order = state
        .coordinator
        .update_status(order_id, status, req.tracking_number)
        .await?;

    Ok(Json(OrderResponse::from(&order)))
}

/// PATCH /orders/:id/payment
#[tracing::instrument(skip(state, req), fields(payment_status = %req.payment_status))]
pub async fn update_payment_status<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<UpdatePaymentStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let payment_status: PaymentStatus = req.payment_status.parse()?;

    let order = state
        .coordinator
        .ledger()
        .update_payment_status(UpdatePaymentStatus::new(order_id, payment_status))
        .await?;

    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/:id/payments: A new charge attempt for an unpaid order.
#[tracing::instrument(skip(state, req))]
pub async fn retry_payment<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<RetryPaymentRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let result = state.coordinator.retry_payment(order_id, req.card).await?;
    Ok(checkout_response(result, StatusCode::OK))
}

/// GET /orders/:id/payments: Every charge attempt, newest first.
#[tracing::instrument(skip(state))]
pub async fn payments<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    if state.coordinator.ledger().get_order(order_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Order {id} not found")));
    }

    let payments = state
        .coordinator
        .payments()
        .payments_for_order(order_id)
        .await?;
    Ok(Json(payments))
}

/// GET /payments/:id
#[tracing::instrument(skip(state))]
pub async fn get_payment<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let payment_id: PaymentId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid payment id: {id}")))?;
    let payment = state
        .coordinator
        .payments()
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Payment {id} not found")))?;

    Ok(Json(payment))
}

/// GET /customers/:customer_id/payments: Newest first.
#[tracing::instrument(skip(state))]
pub async fn payments_for_customer<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(customer_id): Path<u64>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    let payments = state
        .coordinator
        .payments()
        .payments_for_customer(CustomerId::new(customer_id))
        .await?;
    Ok(Json(payments))
}

/// POST /orders/:id/refund
#[tracing::instrument(skip(state))]
pub async fn refund<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<RefundResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let result = state.coordinator.refund_order(order_id).await?;

    Ok(Json(RefundResponse {
        saga_id: result.saga_id.to_string(),
        order: OrderResponse::from(&result.order),
        payment: result.payment,
    }))
}
