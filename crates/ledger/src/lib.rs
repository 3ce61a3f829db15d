//! Order ledger.
//!
//! Orders are event-sourced aggregates. An order is placed together with its
//! line items in a single event, and every later change to its fulfillment
//! status or payment status is one more event on the same stream. The
//! [`OrderLedger`] trait is the contract the fulfillment coordinator drives.

pub mod aggregate;
pub mod command;
pub mod error;
pub mod order;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Command, CommandHandler, CommandResult};
pub use error::{LedgerError, Result};
pub use order::{
    CreateOrder, Money, Order, OrderError, OrderEvent, OrderItem, OrderLedger, OrderService,
    OrderStatus, PaymentStatus, UpdateOrderStatus, UpdatePaymentStatus,
};
