//! Matching engine types.

use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;

use crate::models::OrderSide;

// ============================================================================
// Price Key
// ============================================================================

const PRICE_SCALE: i64 = 100_000_000;

/// Exact book key: price scaled to 8 decimal places. Two decimal
/// renderings of the same price (100 vs 100.00) map to one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceKey(i64);

impl PriceKey {
    pub fn from_decimal(price: Decimal) -> Self {
        let scaled = (price * Decimal::from(PRICE_SCALE)).trunc();
        let value = scaled.mantissa() / 10i128.pow(scaled.scale());
        PriceKey(value as i64)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(PRICE_SCALE)
    }
}

impl Ord for PriceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for PriceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// Book entries and views
// ============================================================================

/// Live order held in the book: just enough to match. The authoritative
/// row lives in the order store; reconcilement is by id.
#[derive(Debug, Clone)]
pub struct BookOrder {
    pub id: i64,
    pub user_id: i64,
    pub account_id: i64,
    pub side: OrderSide,
    pub price: Decimal,
    pub remaining_qty: Decimal,
}

/// One aggregated price level of a depth view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub qty: Decimal,
    pub cnt: i64,
}

/// Grouped two-sided depth: bids descending, asks ascending.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupedBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

// ============================================================================
// Fills
// ============================================================================

/// Externally observable fill, in emission order.
#[derive(Debug, Clone, Serialize)]
pub struct Fill {
    pub symbol: String,
    pub price: Decimal,
    pub qty: Decimal,
    pub buy_order_id: i64,
    pub sell_order_id: i64,
}

/// One planned cross against a resting maker; `qty` is what the taker
/// takes from it at the maker's price.
#[derive(Debug, Clone)]
pub struct MakerFill {
    pub maker: BookOrder,
    pub qty: Decimal,
}

impl MakerFill {
    pub fn maker_remaining_after(&self) -> Decimal {
        self.maker.remaining_qty - self.qty
    }
}

/// Outcome of the read-only crossing walk, before anything is persisted
/// or applied to the book.
#[derive(Debug, Clone, Default)]
pub struct MatchPlan {
    pub fills: Vec<MakerFill>,
}

impl MatchPlan {
    pub fn filled_qty(&self) -> Decimal {
        self.fills.iter().map(|f| f.qty).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.fills.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_key_round_trips() {
        let price = dec!(97500.12345678);
        let key = PriceKey::from_decimal(price);
        assert_eq!(key.to_decimal(), price);
    }

    #[test]
    fn price_key_ignores_trailing_zeros() {
        assert_eq!(
            PriceKey::from_decimal(dec!(100)),
            PriceKey::from_decimal(dec!(100.000))
        );
    }

    #[test]
    fn price_key_orders_by_value() {
        assert!(PriceKey::from_decimal(dec!(99.5)) < PriceKey::from_decimal(dec!(100)));
    }
}
