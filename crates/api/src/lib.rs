//! HTTP API for carts, checkout, payments and refunds.
//!
//! Every endpoint is a thin mapping onto the [`FulfillmentCoordinator`] or one
//! of the stores it drives, with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post, put};
use event_store::EventStore;
use fulfillment::{
    ApprovalPolicy, CoordinatorConfig, FulfillmentCoordinator, InMemoryCartStore,
    InMemoryPaymentProcessor, Journal, SagaError,
};
use ledger::OrderService;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// The coordinator as wired by the server: carts and gateway receipts held in
/// memory and journaled, with orders and sagas, to the configured event store.
pub type Coordinator<S> =
    FulfillmentCoordinator<S, InMemoryCartStore, OrderService<S>, InMemoryPaymentProcessor>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub coordinator: Coordinator<S>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/cart/{customer_id}",
            get(routes::cart::get::<S>).delete(routes::cart::clear::<S>),
        )
        .route("/cart/{customer_id}/items", post(routes::cart::add_item::<S>))
        .route(
            "/cart/{customer_id}/items/{item_id}",
            put(routes::cart::update_item::<S>).delete(routes::cart::remove_item::<S>),
        )
        .route("/orders", post(routes::orders::place::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/status", patch(routes::orders::update_status::<S>))
        .route(
            "/orders/{id}/payment",
            patch(routes::orders::update_payment_status::<S>),
        )
        .route(
            "/orders/{id}/payments",
            post(routes::orders::retry_payment::<S>).get(routes::orders::payments::<S>),
        )
        .route("/orders/{id}/refund", post(routes::orders::refund::<S>))
        .route(
            "/customers/{customer_id}/orders",
            get(routes::orders::for_customer::<S>),
        )
        .route(
            "/customers/{customer_id}/payments",
            get(routes::orders::payments_for_customer::<S>),
        )
        .route("/payments/{id}", get(routes::orders::get_payment::<S>))
        .route("/sagas/reconcile", post(routes::sagas::reconcile::<S>))
        .route("/sagas/{id}", get(routes::sagas::get::<S>))
        .route("/sagas/{id}/resume", post(routes::sagas::resume::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over `event_store`, with the simulated
/// gateway approving at the configured rate.
pub async fn create_state<S: EventStore + Clone + 'static>(
    event_store: S,
    config: &Config,
) -> Result<Arc<AppState<S>>, SagaError> {
    let payments = InMemoryPaymentProcessor::with_policy(ApprovalPolicy::Random {
        approval_rate: config.payment_approval_rate,
    });
    create_state_with_payments(event_store, payments, config).await
}

/// Like [`create_state`], with a caller-supplied payment processor.
///
/// Carts and payment receipts are restored from `event_store` before the
/// coordinator starts, so a restart keeps them.
pub async fn create_state_with_payments<S: EventStore + Clone + 'static>(
    event_store: S,
    payments: InMemoryPaymentProcessor,
    config: &Config,
) -> Result<Arc<AppState<S>>, SagaError> {
    let journal = Journal::new(event_store.clone());
    let carts = InMemoryCartStore::restore(journal.clone()).await?;
    let payments = payments.restore(journal).await?;

    let ledger = OrderService::new(event_store.clone());
    let coordinator = FulfillmentCoordinator::new(event_store, carts, ledger, payments)
        .with_config(CoordinatorConfig {
            payment_timeout: config.payment_timeout,
            ..CoordinatorConfig::default()
        });

    Ok(Arc::new(AppState { coordinator }))
}
