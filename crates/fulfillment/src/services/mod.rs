//! The leaf services the coordinator drives, each with an in-memory
//! implementation that can be journaled to the event store.

pub mod cart;
pub mod journal;
pub mod notification;
pub mod payment;

pub use cart::{Cart, CartLine, CartStore, InMemoryCartStore, NewCartItem};
pub use journal::Journal;
pub use notification::{InMemoryNotifier, Notification, Notifier, TracingNotifier};
pub use payment::{
    ApprovalPolicy, CardDetails, ChargeRequest, InMemoryPaymentProcessor, Payment, PaymentId,
    PaymentProcessor,
};
