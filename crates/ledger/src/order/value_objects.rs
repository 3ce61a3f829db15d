//! Value objects for the order domain.

use common::ProductId;
use serde::{Deserialize, Serialize};

/// Money amount in integer minor units (cents). Serialized as a bare integer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    pub fn cents(&self) -> i64 {
        self.cents
    }

    pub fn dollars(&self) -> i64 {
        self.cents / 100
    }

    /// Cents left over after whole dollars, always non-negative.
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// `self × quantity`, or None if the product does not fit in i64 cents.
    pub fn checked_mul(&self, quantity: u32) -> Option<Money> {
        self.cents
            .checked_mul(i64::from(quantity))
            .map(Money::from_cents)
    }

    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.cents.checked_add(other.cents).map(Money::from_cents)
    }

    /// Sum of `amounts`, or None on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(amounts: I) -> Option<Money> {
        amounts
            .into_iter()
            .try_fold(Money::zero(), |acc, m| acc.checked_add(m))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        write!(f, "{sign}${}.{:02}", self.dollars().abs(), self.cents_part())
    }
}

/// A line of an order: a snapshot of the cart line at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,

    pub product_name: String,

    pub quantity: u32,

    pub unit_price: Money,
}

impl OrderItem {
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_price,
        }
    }

    /// quantity × unit_price, or None if it overflows.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_parts() {
        let money = Money::from_cents(1234);
        assert_eq!(money.cents(), 1234);
        assert_eq!(money.dollars(), 12);
        assert_eq!(money.cents_part(), 34);
    }

    #[test]
    fn money_display() {
        assert_eq!(Money::from_cents(2000).to_string(), "$20.00");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-$12.34");
        assert_eq!(Money::from_cents(-5).to_string(), "-$0.05");
    }

    #[test]
    fn money_serializes_as_integer_cents() {
        assert_eq!(serde_json::to_string(&Money::from_cents(999)).unwrap(), "999");
        let back: Money = serde_json::from_str("2000").unwrap();
        assert_eq!(back, Money::from_cents(2000));
    }

    #[test]
    fn money_sum_is_exact() {
        let total = Money::checked_sum([10, 10, 10].map(Money::from_cents)).unwrap();
        assert_eq!(total.cents(), 30);
        assert_eq!(
            Money::from_cents(1999).checked_add(Money::from_cents(1)),
            Some(Money::from_cents(2000))
        );
    }

    #[test]
    fn money_overflow_is_none() {
        let huge = Money::from_cents((1 << 62) + 25);
        assert_eq!(huge.checked_mul(4), None);
        assert_eq!(huge.checked_add(huge), None);
        assert_eq!(Money::checked_sum([huge, huge]), None);
        assert_eq!(huge.checked_mul(1), Some(huge));
    }

    #[test]
    fn line_total_multiplies_quantity() {
        let item = OrderItem::new(ProductId::new(7), "Widget", 2, Money::from_cents(1000));
        assert_eq!(item.line_total(), Some(Money::from_cents(2000)));

        let huge = OrderItem::new(ProductId::new(7), "Widget", 4, Money::from_cents(i64::MAX / 2));
        assert_eq!(huge.line_total(), None);
    }
}
