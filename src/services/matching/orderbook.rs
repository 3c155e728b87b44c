//! Per-symbol in-memory order book with price-time priority.
//!
//! Bids and asks are price-keyed B-tree maps; each level holds its live
//! orders in arrival order. An id index gives O(1) lookup for cancels.
//! All mutation happens under the owning symbol's processing gate, so the
//! inner locks are only ever contended by read-side snapshots.

use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};

use super::types::{BookLevel, BookOrder, GroupedBook, MakerFill, MatchPlan, PriceKey};
use crate::models::OrderSide;

pub struct OrderBook {
    symbol: String,
    /// Best bid = highest key
    bids: RwLock<BTreeMap<PriceKey, VecDeque<BookOrder>>>,
    /// Best ask = lowest key
    asks: RwLock<BTreeMap<PriceKey, VecDeque<BookOrder>>>,
    /// Order id to (side, level) for cancellation
    index: DashMap<i64, (OrderSide, PriceKey)>,
}

impl OrderBook {
    pub fn new(symbol: String) -> Self {
        Self {
            symbol,
            bids: RwLock::new(BTreeMap::new()),
            asks: RwLock::new(BTreeMap::new()),
            index: DashMap::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    pub fn contains(&self, order_id: i64) -> bool {
        self.index.contains_key(&order_id)
    }

    fn side_map(&self, side: OrderSide) -> &RwLock<BTreeMap<PriceKey, VecDeque<BookOrder>>> {
        match side {
            OrderSide::Buy => &self.bids,
            OrderSide::Sell => &self.asks,
        }
    }

    fn best_key(book: &BTreeMap<PriceKey, VecDeque<BookOrder>>, side: OrderSide) -> Option<PriceKey> {
        match side {
            OrderSide::Buy => book.keys().next_back().copied(),
            OrderSide::Sell => book.keys().next().copied(),
        }
    }

    /// Appends an order at the tail of its price level.
    pub fn push(&self, order: BookOrder) {
        let key = PriceKey::from_decimal(order.price);
        let side = order.side;
        let id = order.id;

        self.side_map(side)
            .write()
            .entry(key)
            .or_default()
            .push_back(order);

        self.index.insert(id, (side, key));
    }

    pub fn best_price(&self, side: OrderSide) -> Option<Decimal> {
        let book = self.side_map(side).read();
        Self::best_key(&book, side).map(PriceKey::to_decimal)
    }

    /// Oldest order at the best price of `side`.
    pub fn peek_best(&self, side: OrderSide) -> Option<BookOrder> {
        let book = self.side_map(side).read();
        let key = Self::best_key(&book, side)?;
        book.get(&key).and_then(|q| q.front()).cloned()
    }

    /// Removes and returns the oldest order at the best price.
    pub fn pop_front(&self, side: OrderSide) -> Option<BookOrder> {
        let mut book = self.side_map(side).write();
        let key = Self::best_key(&book, side)?;
        let queue = book.get_mut(&key)?;
        let order = queue.pop_front();
        if queue.is_empty() {
            book.remove(&key);
        }
        if let Some(ref o) = order {
            self.index.remove(&o.id);
        }
        order
    }

    /// Reduces the front order at the best price by `qty`; removes it iff
    /// nothing remains. Returns the removed order when it was exhausted.
    pub fn decrement_front(&self, side: OrderSide, qty: Decimal) -> Option<BookOrder> {
        let mut book = self.side_map(side).write();
        let key = Self::best_key(&book, side)?;
        let queue = book.get_mut(&key)?;
        let front = queue.front_mut()?;

        front.remaining_qty -= qty;
        if front.remaining_qty > Decimal::ZERO {
            return None;
        }

        let removed = queue.pop_front();
        if queue.is_empty() {
            book.remove(&key);
        }
        if let Some(ref o) = removed {
            self.index.remove(&o.id);
        }
        removed
    }

    /// Removes an order wherever it rests; used by cancellation.
    pub fn remove(&self, order_id: i64) -> Option<BookOrder> {
        let (side, key) = self.index.remove(&order_id)?.1;

        let mut book = self.side_map(side).write();
        let queue = book.get_mut(&key)?;
        let pos = queue.iter().position(|o| o.id == order_id)?;
        let order = queue.remove(pos);
        if queue.is_empty() {
            book.remove(&key);
        }
        order
    }

    /// Read-only crossing walk against the side opposite `taker_side`.
    /// Walks levels best-first and orders front-to-back, stopping at the
    /// limit price (when given) or when `qty` is covered. The book is not
    /// mutated; the plan is applied only after the fills persist.
    pub fn match_plan(
        &self,
        taker_side: OrderSide,
        qty: Decimal,
        limit_price: Option<Decimal>,
    ) -> MatchPlan {
        let mut need = qty;
        let mut fills = Vec::new();

        let book = self.side_map(taker_side.opposite()).read();
        let levels: Box<dyn Iterator<Item = (&PriceKey, &VecDeque<BookOrder>)> + '_> = match taker_side {
            // Buy takes asks lowest-first, sell takes bids highest-first
            OrderSide::Buy => Box::new(book.iter()),
            OrderSide::Sell => Box::new(book.iter().rev()),
        };

        'levels: for (key, queue) in levels {
            let level_price = key.to_decimal();
            if let Some(limit) = limit_price {
                let marketable = match taker_side {
                    OrderSide::Buy => level_price <= limit,
                    OrderSide::Sell => level_price >= limit,
                };
                if !marketable {
                    break;
                }
            }

            for maker in queue {
                if need <= Decimal::ZERO {
                    break 'levels;
                }
                let take = need.min(maker.remaining_qty);
                fills.push(MakerFill {
                    maker: maker.clone(),
                    qty: take,
                });
                need -= take;
            }

            if need <= Decimal::ZERO {
                break;
            }
        }

        MatchPlan { fills }
    }

    /// Applies a committed plan: each fill decrements the opposite front,
    /// popping makers as they exhaust. Must run under the same gate that
    /// produced the plan.
    pub fn apply_plan(&self, taker_side: OrderSide, plan: &MatchPlan) {
        let maker_side = taker_side.opposite();
        for fill in &plan.fills {
            self.decrement_front(maker_side, fill.qty);
        }
    }

    /// Aggregation by (side, price): bids descending, asks ascending.
    pub fn snapshot_grouped(&self) -> GroupedBook {
        fn levels<'a>(
            it: impl Iterator<Item = (&'a PriceKey, &'a VecDeque<BookOrder>)>,
        ) -> Vec<BookLevel> {
            it.map(|(key, queue)| BookLevel {
                price: key.to_decimal(),
                qty: queue.iter().map(|o| o.remaining_qty).sum(),
                cnt: queue.len() as i64,
            })
            .collect()
        }

        let bids = levels(self.bids.read().iter().rev());
        let asks = levels(self.asks.read().iter());
        GroupedBook { bids, asks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(id: i64, side: OrderSide, price: Decimal, qty: Decimal) -> BookOrder {
        BookOrder {
            id,
            user_id: 1,
            account_id: 1,
            side,
            price,
            remaining_qty: qty,
        }
    }

    #[test]
    fn best_is_highest_bid_and_lowest_ask() {
        let book = OrderBook::new("SOLUSDT".into());
        book.push(order(1, OrderSide::Buy, dec!(100), dec!(1)));
        book.push(order(2, OrderSide::Buy, dec!(101), dec!(1)));
        book.push(order(3, OrderSide::Sell, dec!(103), dec!(1)));
        book.push(order(4, OrderSide::Sell, dec!(102), dec!(1)));

        assert_eq!(book.best_price(OrderSide::Buy), Some(dec!(101)));
        assert_eq!(book.best_price(OrderSide::Sell), Some(dec!(102)));
        assert_eq!(book.order_count(), 4);
    }

    #[test]
    fn fifo_within_a_price_level() {
        let book = OrderBook::new("SOLUSDT".into());
        book.push(order(10, OrderSide::Sell, dec!(100), dec!(3)));
        book.push(order(11, OrderSide::Sell, dec!(100), dec!(3)));

        assert_eq!(book.peek_best(OrderSide::Sell).unwrap().id, 10);
        let popped = book.pop_front(OrderSide::Sell).unwrap();
        assert_eq!(popped.id, 10);
        assert_eq!(book.peek_best(OrderSide::Sell).unwrap().id, 11);
    }

    #[test]
    fn decrement_front_removes_only_when_exhausted() {
        let book = OrderBook::new("SOLUSDT".into());
        book.push(order(1, OrderSide::Sell, dec!(100), dec!(5)));

        assert!(book.decrement_front(OrderSide::Sell, dec!(2)).is_none());
        assert_eq!(
            book.peek_best(OrderSide::Sell).unwrap().remaining_qty,
            dec!(3)
        );

        let removed = book.decrement_front(OrderSide::Sell, dec!(3)).unwrap();
        assert_eq!(removed.id, 1);
        assert!(book.peek_best(OrderSide::Sell).is_none());
        assert_eq!(book.order_count(), 0);
    }

    #[test]
    fn remove_clears_empty_levels() {
        let book = OrderBook::new("SOLUSDT".into());
        book.push(order(1, OrderSide::Buy, dec!(99), dec!(1)));
        book.push(order(2, OrderSide::Buy, dec!(100), dec!(1)));

        assert!(book.remove(2).is_some());
        assert!(!book.contains(2));
        assert_eq!(book.best_price(OrderSide::Buy), Some(dec!(99)));
        assert!(book.remove(2).is_none());
    }

    #[test]
    fn plan_walks_levels_in_price_order() {
        let book = OrderBook::new("SOLUSDT".into());
        book.push(order(1, OrderSide::Sell, dec!(100), dec!(5)));
        book.push(order(2, OrderSide::Sell, dec!(101), dec!(5)));

        let plan = book.match_plan(OrderSide::Buy, dec!(8), Some(dec!(101)));
        assert_eq!(plan.fills.len(), 2);
        assert_eq!(plan.fills[0].maker.id, 1);
        assert_eq!(plan.fills[0].qty, dec!(5));
        assert_eq!(plan.fills[1].maker.id, 2);
        assert_eq!(plan.fills[1].qty, dec!(3));
        assert_eq!(plan.filled_qty(), dec!(8));
    }

    #[test]
    fn plan_respects_the_limit_price() {
        let book = OrderBook::new("SOLUSDT".into());
        book.push(order(1, OrderSide::Sell, dec!(100), dec!(5)));
        book.push(order(2, OrderSide::Sell, dec!(105), dec!(5)));

        let plan = book.match_plan(OrderSide::Buy, dec!(10), Some(dec!(102)));
        assert_eq!(plan.fills.len(), 1);
        assert_eq!(plan.filled_qty(), dec!(5));

        // Not marketable at all: below the best ask
        let plan = book.match_plan(OrderSide::Buy, dec!(10), Some(dec!(99)));
        assert!(plan.is_empty());
    }

    #[test]
    fn plan_for_sell_walks_bids_highest_first() {
        let book = OrderBook::new("SOLUSDT".into());
        book.push(order(1, OrderSide::Buy, dec!(99), dec!(4)));
        book.push(order(2, OrderSide::Buy, dec!(100), dec!(4)));

        let plan = book.match_plan(OrderSide::Sell, dec!(6), Some(dec!(99)));
        assert_eq!(plan.fills.len(), 2);
        assert_eq!(plan.fills[0].maker.id, 2);
        assert_eq!(plan.fills[1].maker.id, 1);
        assert_eq!(plan.fills[1].qty, dec!(2));
    }

    #[test]
    fn market_plan_ignores_price_and_stops_at_liquidity() {
        let book = OrderBook::new("SOLUSDT".into());
        book.push(order(1, OrderSide::Sell, dec!(100), dec!(5)));

        let plan = book.match_plan(OrderSide::Buy, dec!(10), None);
        assert_eq!(plan.fills.len(), 1);
        assert_eq!(plan.filled_qty(), dec!(5));
    }

    #[test]
    fn apply_plan_mirrors_the_planned_fills() {
        let book = OrderBook::new("SOLUSDT".into());
        book.push(order(1, OrderSide::Sell, dec!(100), dec!(3)));
        book.push(order(2, OrderSide::Sell, dec!(100), dec!(3)));

        let plan = book.match_plan(OrderSide::Buy, dec!(4), Some(dec!(100)));
        book.apply_plan(OrderSide::Buy, &plan);

        // First maker gone, second reduced to 2
        assert!(!book.contains(1));
        let front = book.peek_best(OrderSide::Sell).unwrap();
        assert_eq!(front.id, 2);
        assert_eq!(front.remaining_qty, dec!(2));
    }

    #[test]
    fn grouped_snapshot_orders_and_aggregates() {
        let book = OrderBook::new("SOLUSDT".into());
        book.push(order(1, OrderSide::Buy, dec!(100), dec!(1)));
        book.push(order(2, OrderSide::Buy, dec!(100), dec!(2)));
        book.push(order(3, OrderSide::Buy, dec!(99), dec!(1)));
        book.push(order(4, OrderSide::Sell, dec!(102), dec!(1.5)));

        let snap = book.snapshot_grouped();
        assert_eq!(snap.bids.len(), 2);
        assert_eq!(snap.bids[0].price, dec!(100));
        assert_eq!(snap.bids[0].qty, dec!(3));
        assert_eq!(snap.bids[0].cnt, 2);
        assert_eq!(snap.bids[1].price, dec!(99));
        assert_eq!(snap.asks[0].qty, dec!(1.5));
    }
}
