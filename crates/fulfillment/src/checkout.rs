//! Saga types and step names of the checkout flows.

/// Place order: create the order, charge it, record the outcome, clear the cart.
pub const CHECKOUT: &str = "Checkout";

/// A new charge attempt against an order whose payment is pending or failed.
pub const PAYMENT_RETRY: &str = "PaymentRetry";

/// Refund of an order's completed payment.
pub const ORDER_REFUND: &str = "OrderRefund";

pub const STEP_CREATE_ORDER: &str = "create_order";

pub const STEP_CHARGE_PAYMENT: &str = "charge_payment";

/// Push the charge outcome into the ledger.
pub const STEP_RECORD_PAYMENT: &str = "record_payment";

pub const STEP_CLEAR_CART: &str = "clear_cart";

pub const STEP_REFUND_PAYMENT: &str = "refund_payment";

pub const STEP_RECORD_REFUND: &str = "record_refund";
