//! Identifier and error-classification types shared by every crate in the workspace.

mod error;
mod types;

pub use error::ErrorKind;
pub use types::{AggregateId, CustomerId, ProductId};
