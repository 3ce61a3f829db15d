//! Cart store trait and in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId, ProductId};
use event_store::Version;
use ledger::{Money, OrderItem};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::journal::Journal;
use crate::error::SagaError;

const CART_AGGREGATE_TYPE: &str = "Cart";

const CART_CHANGED: &str = "CartChanged";

/// An item to put in a cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCartItem {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
    pub display_name: String,
    #[serde(default)]
    pub image_ref: Option<String>,
}

impl NewCartItem {
    pub fn new(
        product_id: ProductId,
        quantity: i64,
        unit_price: Money,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
            display_name: display_name.into(),
            image_ref: None,
        }
    }

    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    fn validate(&self) -> Result<u32, SagaError> {
        if self.unit_price.is_negative() {
            return Err(SagaError::InvalidPrice(self.unit_price));
        }
        positive_quantity(self.quantity)
    }
}

fn positive_quantity(quantity: i64) -> Result<u32, SagaError> {
    u32::try_from(quantity)
        .ok()
        .filter(|q| *q >= 1)
        .ok_or(SagaError::InvalidQuantity(quantity))
}

/// One product in a customer's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: u64,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub display_name: String,
    pub image_ref: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl CartLine {
    /// None when quantity × unit_price does not fit in i64 cents.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }

    /// Snapshot of this line for an order.
    pub fn to_order_item(&self) -> OrderItem {
        OrderItem::new(
            self.product_id,
            self.display_name.clone(),
            self.quantity,
            self.unit_price,
        )
    }
}

/// A customer's cart, derived from the live lines at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub customer_id: CustomerId,
    /// Newest first.
    pub items: Vec<CartLine>,
    pub total_items: u64,
    pub total_price: Money,
}

impl Cart {
    pub fn from_lines(
        customer_id: CustomerId,
        mut items: Vec<CartLine>,
    ) -> Result<Self, SagaError> {
        items.sort_by(|a, b| b.added_at.cmp(&a.added_at).then(b.id.cmp(&a.id)));
        let total_items = items.iter().map(|line| u64::from(line.quantity)).sum();
        let total_price = checked_total(&items)?;
        Ok(Self {
            customer_id,
            items,
            total_items,
            total_price,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn order_items(&self) -> Vec<OrderItem> {
        self.items.iter().map(CartLine::to_order_item).collect()
    }
}

fn checked_total<'a>(lines: impl IntoIterator<Item = &'a CartLine>) -> Result<Money, SagaError> {
    lines
        .into_iter()
        .map(CartLine::line_total)
        .collect::<Option<Vec<_>>>()
        .and_then(Money::checked_sum)
        .ok_or(SagaError::AmountOverflow)
}

/// One journaled change to a customer's cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
enum CartChange {
    LineAdded(CartLine),
    QuantitySet { item_id: u64, quantity: u32 },
    LineRemoved { item_id: u64 },
    Cleared,
}

#[derive(Debug, Serialize, Deserialize)]
struct CartChanged {
    customer_id: CustomerId,
    change: CartChange,
}

fn cart_stream(customer_id: CustomerId) -> AggregateId {
    AggregateId::derived(&format!("cart:{customer_id}"))
}

/// Per-customer cart lines. Every write is scoped by customer.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn get_cart(&self, customer_id: CustomerId) -> Result<Cart, SagaError>;

    /// Inserts the item, or adds its quantity to the customer's existing line
    /// for the same product. An existing line keeps its price and name.
    async fn add_item(
        &self,
        customer_id: CustomerId,
        item: NewCartItem,
    ) -> Result<CartLine, SagaError>;

    /// Sets the quantity absolutely. A quantity of zero or less deletes the
    /// line and returns None.
    async fn update_item(
        &self,
        customer_id: CustomerId,
        item_id: u64,
        quantity: i64,
    ) -> Result<Option<CartLine>, SagaError>;

    async fn remove_item(&self, customer_id: CustomerId, item_id: u64) -> Result<(), SagaError>;

    /// Removes every line of the customer. Clearing an empty cart succeeds.
    async fn clear(&self, customer_id: CustomerId) -> Result<(), SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryCartState {
    lines: BTreeMap<u64, CartLine>,
    next_id: u64,
    versions: HashMap<CustomerId, Version>,
    fail_on_read: bool,
    fail_on_clear: bool,
    clear_calls: usize,
}

impl InMemoryCartState {
    fn line_for(
        &mut self,
        customer_id: CustomerId,
        item_id: u64,
    ) -> Result<&mut CartLine, SagaError> {
        self.lines
            .get_mut(&item_id)
            .filter(|line| line.customer_id == customer_id)
            .ok_or(SagaError::CartItemNotFound {
                customer_id,
                item_id,
            })
    }

    /// Rejects `candidate` if it, or the cart with it in place, overflows.
    fn check_totals(&self, candidate: &CartLine) -> Result<(), SagaError> {
        let others = self
            .lines
            .values()
            .filter(|line| line.customer_id == candidate.customer_id && line.id != candidate.id);
        checked_total(others.chain(std::iter::once(candidate)))?;
        Ok(())
    }

    fn apply(&mut self, customer_id: CustomerId, change: CartChange) {
        match change {
            CartChange::LineAdded(line) => {
                self.next_id = self.next_id.max(line.id);
                self.lines.insert(line.id, line);
            }
            CartChange::QuantitySet { item_id, quantity } => {
                if let Some(line) = self.lines.get_mut(&item_id) {
                    line.quantity = quantity;
                }
            }
            CartChange::LineRemoved { item_id } => {
                self.lines.remove(&item_id);
            }
            CartChange::Cleared => {
                self.lines.retain(|_, line| line.customer_id != customer_id);
            }
        }
    }
}

/// In-memory cart store.
///
/// All lines sit behind one lock, so a read concurrent with a clear sees
/// either the whole cart or nothing. With a [`Journal`] every change is
/// appended to the event store before it is applied in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCartStore {
    state: Arc<RwLock<InMemoryCartState>>,
    journal: Option<Journal>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds every cart from the journal and keeps writing to it.
    #[tracing::instrument(skip(journal))]
    pub async fn restore(journal: Journal) -> Result<Self, SagaError> {
        let mut state = InMemoryCartState::default();
        for envelope in journal.replay(CART_CHANGED).await? {
            let changed: CartChanged = envelope.decode()?;
            state.versions.insert(changed.customer_id, envelope.version);
            state.apply(changed.customer_id, changed.change);
        }

        tracing::info!(lines = state.lines.len(), "cart store restored");
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            journal: Some(journal),
        })
    }

    /// Journals `change`, then applies it.
    async fn commit(
        &self,
        state: &mut InMemoryCartState,
        customer_id: CustomerId,
        change: CartChange,
    ) -> Result<(), SagaError> {
        if let Some(journal) = &self.journal {
            let version = state
                .versions
                .get(&customer_id)
                .copied()
                .unwrap_or_default()
                .next();
            let event = CartChanged {
                customer_id,
                change: change.clone(),
            };
            journal
                .record(
                    cart_stream(customer_id),
                    CART_AGGREGATE_TYPE,
                    version,
                    CART_CHANGED,
                    &event,
                )
                .await?;
            state.versions.insert(customer_id, version);
        }
        state.apply(customer_id, change);
        Ok(())
    }

    /// Makes `get_cart` fail until reset.
    pub async fn set_fail_on_read(&self, fail: bool) {
        self.state.write().await.fail_on_read = fail;
    }

    /// Makes `clear` fail until reset.
    pub async fn set_fail_on_clear(&self, fail: bool) {
        self.state.write().await.fail_on_clear = fail;
    }

    /// Number of `clear` calls, including failed ones.
    pub async fn clear_calls(&self) -> usize {
        self.state.read().await.clear_calls
    }

    pub async fn line_count(&self) -> usize {
        self.state.read().await.lines.len()
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn get_cart(&self, customer_id: CustomerId) -> Result<Cart, SagaError> {
        let state = self.state.read().await;
        if state.fail_on_read {
            return Err(SagaError::CartService("cart store unavailable".to_string()));
        }

        let lines = state
            .lines
            .values()
            .filter(|line| line.customer_id == customer_id)
            .cloned()
            .collect();
        Cart::from_lines(customer_id, lines)
    }

    #[tracing::instrument(skip(self, item), fields(product_id = %item.product_id))]
    async fn add_item(
        &self,
        customer_id: CustomerId,
        item: NewCartItem,
    ) -> Result<CartLine, SagaError> {
        let quantity = item.validate()?;
        let mut state = self.state.write().await;

        let existing = state
            .lines
            .values()
            .find(|line| line.customer_id == customer_id && line.product_id == item.product_id)
            .cloned();
        if let Some(mut merged) = existing {
            merged.quantity = merged
                .quantity
                .checked_add(quantity)
                .ok_or(SagaError::AmountOverflow)?;
            state.check_totals(&merged)?;

            let change = CartChange::QuantitySet {
                item_id: merged.id,
                quantity: merged.quantity,
            };
            self.commit(&mut state, customer_id, change).await?;
            return Ok(merged);
        }

        let line = CartLine {
            id: state.next_id + 1,
            customer_id,
            product_id: item.product_id,
            quantity,
            unit_price: item.unit_price,
            display_name: item.display_name,
            image_ref: item.image_ref,
            added_at: Utc::now(),
        };
        state.check_totals(&line)?;
        self.commit(&mut state, customer_id, CartChange::LineAdded(line.clone()))
            .await?;
        Ok(line)
    }

    async fn update_item(
        &self,
        customer_id: CustomerId,
        item_id: u64,
        quantity: i64,
    ) -> Result<Option<CartLine>, SagaError> {
        let mut state = self.state.write().await;
        let mut line = state.line_for(customer_id, item_id)?.clone();

        if quantity <= 0 {
            let change = CartChange::LineRemoved { item_id };
            self.commit(&mut state, customer_id, change).await?;
            return Ok(None);
        }

        line.quantity = positive_quantity(quantity)?;
        state.check_totals(&line)?;
        let change = CartChange::QuantitySet {
            item_id,
            quantity: line.quantity,
        };
        self.commit(&mut state, customer_id, change).await?;
        Ok(Some(line))
    }

    async fn remove_item(&self, customer_id: CustomerId, item_id: u64) -> Result<(), SagaError> {
        let mut state = self.state.write().await;
        state.line_for(customer_id, item_id)?;
        self.commit(&mut state, customer_id, CartChange::LineRemoved { item_id })
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn clear(&self, customer_id: CustomerId) -> Result<(), SagaError> {
        let mut state = self.state.write().await;
        state.clear_calls += 1;
        if state.fail_on_clear {
            return Err(SagaError::CartService("cart store unavailable".to_string()));
        }

        if !state.lines.values().any(|line| line.customer_id == customer_id) {
            return Ok(());
        }
        self.commit(&mut state, customer_id, CartChange::Cleared)
            .await
    }
}
