//! Order fulfillment coordination.
//!
//! A checkout touches three independently owned resources: the customer's
//! cart, the order ledger and the payment gateway. There is no transaction
//! spanning them. The coordinator runs a saga instead:
//!
//! 1. Read the cart and create a pending order from a snapshot of it
//! 2. Charge the order total, bounded by a timeout
//! 3. Record the outcome on the order (approval confirms it)
//! 4. Clear the cart, only if the charge was approved
//!
//! Every step is recorded on an event-sourced [`SagaInstance`], so a run
//! interrupted at any point is finished by `resume` / `reconcile` from the
//! leaves' actual state, without charging again.

pub mod aggregate;
pub mod checkout;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod services;
pub mod state;

pub use aggregate::SagaInstance;
pub use coordinator::{
    CheckoutOutcome, CoordinatorConfig, FulfillmentCoordinator, OrderResult, PlaceOrder,
    ReconcileReport, RefundResult, checkout_saga_id,
};
pub use error::{Result, SagaError};
pub use events::SagaEvent;
pub use services::{
    ApprovalPolicy, CardDetails, Cart, CartLine, CartStore, ChargeRequest, InMemoryCartStore,
    InMemoryNotifier, InMemoryPaymentProcessor, Journal, NewCartItem, Notification, Notifier,
    Payment, PaymentId, PaymentProcessor, TracingNotifier,
};
pub use state::SagaState;
