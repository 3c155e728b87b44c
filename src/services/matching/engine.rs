//! Continuous matcher.
//!
//! One processing gate per symbol serializes everything that can mutate a
//! book or touch the stores for that symbol. An incoming order is handled
//! in three steps:
//!
//! 1. plan — a read-only crossing walk produces the fill plan;
//! 2. persist — one transaction commits every row of the plan (trade
//!    inserts, both order rows, both sides' settlement);
//! 3. apply — only after commit are the book mutations performed and the
//!    residual rested.
//!
//! A failed or timed-out transaction therefore leaves the book exactly as
//! the plan found it; the incoming order is marked CANCELLED and the error
//! surfaces to the caller. Fills committed for earlier orders are never
//! affected.

use dashmap::DashMap;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::models::{Order, OrderSide, OrderStatus};
use crate::services::settlement::{Settlement, SettlementError, SettlementFill};
use crate::store::{Deadline, OrderStore, StoreError, TradeStore};

use super::orderbook::OrderBook;
use super::types::{BookOrder, Fill, GroupedBook, MakerFill, MatchPlan};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

struct SymbolBook {
    gate: Mutex<()>,
    book: OrderBook,
}

impl SymbolBook {
    fn new(symbol: &str) -> Self {
        Self {
            gate: Mutex::new(()),
            book: OrderBook::new(symbol.to_string()),
        }
    }
}

pub struct MatchingEngine {
    pool: PgPool,
    orders: OrderStore,
    books: DashMap<String, Arc<SymbolBook>>,
    op_timeout: Duration,
}

impl MatchingEngine {
    pub fn new(pool: PgPool, op_timeout: Duration) -> Self {
        Self {
            orders: OrderStore::new(pool.clone()),
            pool,
            books: DashMap::new(),
            op_timeout,
        }
    }

    fn symbol_book(&self, symbol: &str) -> Arc<SymbolBook> {
        self.books
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(SymbolBook::new(symbol)))
            .clone()
    }

    /// Reloads all live orders into the books, in arrival order.
    pub async fn recover(&self, deadline: Deadline) -> Result<usize, StoreError> {
        let rows = self.orders.live_orders(deadline).await?;
        let count = rows.len();

        for row in rows {
            let sym = self.symbol_book(&row.symbol);
            let _gate = sym.gate.lock().await;
            sym.book.push(book_order(&row, row.remaining_qty));
        }

        Ok(count)
    }

    /// Crosses a limit order while marketable, rests the residual.
    pub async fn process_limit(
        &self,
        order: Order,
        deadline: Deadline,
    ) -> Result<Vec<Fill>, EngineError> {
        self.process(order, false, deadline).await
    }

    /// Crosses a market order against whatever liquidity exists; any
    /// residual is cancelled, never rested.
    pub async fn process_market(
        &self,
        order: Order,
        deadline: Deadline,
    ) -> Result<Vec<Fill>, EngineError> {
        self.process(order, true, deadline).await
    }

    async fn process(
        &self,
        order: Order,
        is_market: bool,
        deadline: Deadline,
    ) -> Result<Vec<Fill>, EngineError> {
        let started = Instant::now();
        let sym = self.symbol_book(&order.symbol);
        let _gate = sym.gate.lock().await;

        let limit_price = (!is_market).then_some(order.price);
        let plan = sym
            .book
            .match_plan(order.side, order.remaining_qty, limit_price);

        if let Err(err) = self.persist(&order, is_market, &plan, deadline).await {
            error!(
                order_id = order.id,
                symbol = %order.symbol,
                error = %err,
                "order processing aborted, rolling back"
            );
            self.abort_order(order.id).await;
            return Err(err);
        }

        sym.book.apply_plan(order.side, &plan);

        let residual = order.remaining_qty - plan.filled_qty();
        if !is_market && residual > Decimal::ZERO {
            sym.book.push(book_order(&order, residual));
        }

        let fills: Vec<Fill> = plan.fills.iter().map(|mf| fill_from(&order, mf)).collect();
        for fill in &fills {
            crate::metrics::record_trade(&fill.symbol, fill.price * fill.qty);
        }
        crate::metrics::record_match_duration(started.elapsed().as_secs_f64());

        debug!(
            order_id = order.id,
            symbol = %order.symbol,
            fills = fills.len(),
            residual = %residual,
            "order processed"
        );
        Ok(fills)
    }

    /// Commits the whole plan in one transaction: per fill, the trade row,
    /// both order rows and the settlement of both sides.
    async fn persist(
        &self,
        order: &Order,
        is_market: bool,
        plan: &MatchPlan,
        deadline: Deadline,
    ) -> Result<(), EngineError> {
        if plan.is_empty() {
            // A limit order with no fills rests WORKING, as inserted.
            if is_market {
                self.orders
                    .update_remaining(
                        order.id,
                        Decimal::ZERO,
                        Some(OrderStatus::Cancelled),
                        deadline,
                    )
                    .await?;
            }
            return Ok(());
        }

        let mut tx = within(deadline, self.pool.begin()).await?;
        let mut taker_remaining = order.remaining_qty;

        for mf in &plan.fills {
            let price = mf.maker.price;
            let qty = mf.qty;

            let (buy, sell) = match order.side {
                OrderSide::Buy => (party(order), maker_party(&mf.maker)),
                OrderSide::Sell => (maker_party(&mf.maker), party(order)),
            };

            within(
                deadline,
                TradeStore::insert_tx(
                    &mut tx,
                    buy.order_id,
                    sell.order_id,
                    &order.symbol,
                    price,
                    qty,
                    chrono::Utc::now(),
                ),
            )
            .await?;

            taker_remaining -= qty;
            within(
                deadline,
                OrderStore::update_remaining_tx(
                    &mut tx,
                    order.id,
                    taker_remaining.max(Decimal::ZERO),
                    status_for(taker_remaining),
                ),
            )
            .await?;

            let maker_remaining = mf.maker_remaining_after();
            within(
                deadline,
                OrderStore::update_remaining_tx(
                    &mut tx,
                    mf.maker.id,
                    maker_remaining.max(Decimal::ZERO),
                    status_for(maker_remaining),
                ),
            )
            .await?;

            let settle = SettlementFill {
                symbol: order.symbol.clone(),
                price,
                qty,
                buy_account_id: buy.account_id,
                sell_account_id: sell.account_id,
            };
            match tokio::time::timeout(
                deadline.remaining().map_err(EngineError::Store)?,
                Settlement::apply_fill(&mut tx, &settle),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => return Err(StoreError::Timeout.into()),
            }
        }

        if is_market && taker_remaining > Decimal::ZERO {
            within(
                deadline,
                OrderStore::update_remaining_tx(
                    &mut tx,
                    order.id,
                    Decimal::ZERO,
                    OrderStatus::Cancelled,
                ),
            )
            .await?;
        }

        within(deadline, tx.commit()).await?;
        Ok(())
    }

    /// Best-effort terminalization of an aborted order; the fill
    /// transaction has already rolled back at this point.
    async fn abort_order(&self, order_id: i64) {
        let deadline = Deadline::after(self.op_timeout);
        if let Err(err) = self
            .orders
            .update_remaining(order_id, Decimal::ZERO, Some(OrderStatus::Cancelled), deadline)
            .await
        {
            error!(order_id, error = %err, "failed to cancel aborted order");
        }
    }

    /// Cancels resting orders of one symbol: store transition first, then
    /// book removal, all under the symbol gate so a concurrent match
    /// cannot interleave.
    pub async fn cancel_resting(
        &self,
        symbol: &str,
        ids: &[i64],
        deadline: Deadline,
    ) -> Result<u64, StoreError> {
        let sym = self.symbol_book(symbol);
        let _gate = sym.gate.lock().await;

        let affected = self.orders.cancel_many(ids, deadline).await?;
        for id in ids {
            sym.book.remove(*id);
        }

        crate::metrics::record_orders_cancelled(affected);
        Ok(affected)
    }

    /// In-memory grouped depth for a symbol; empty when no book exists.
    pub fn grouped_snapshot(&self, symbol: &str) -> GroupedBook {
        self.books
            .get(symbol)
            .map(|sym| sym.book.snapshot_grouped())
            .unwrap_or_default()
    }
}

/// Taker or maker identity for one side of a fill.
#[derive(Debug, Clone, Copy)]
struct Party {
    order_id: i64,
    account_id: i64,
}

fn party(order: &Order) -> Party {
    Party {
        order_id: order.id,
        account_id: order.account_id,
    }
}

fn maker_party(maker: &BookOrder) -> Party {
    Party {
        order_id: maker.id,
        account_id: maker.account_id,
    }
}

fn status_for(remaining: Decimal) -> OrderStatus {
    if remaining <= Decimal::ZERO {
        OrderStatus::Filled
    } else {
        OrderStatus::Partial
    }
}

fn book_order(order: &Order, remaining: Decimal) -> BookOrder {
    BookOrder {
        id: order.id,
        user_id: order.user_id,
        account_id: order.account_id,
        side: order.side,
        price: order.price,
        remaining_qty: remaining,
    }
}

fn fill_from(order: &Order, mf: &MakerFill) -> Fill {
    let (buy_order_id, sell_order_id) = match order.side {
        OrderSide::Buy => (order.id, mf.maker.id),
        OrderSide::Sell => (mf.maker.id, order.id),
    };
    Fill {
        symbol: order.symbol.clone(),
        // Maker price rule: the resting order sets the trade price
        price: mf.maker.price,
        qty: mf.qty,
        buy_order_id,
        sell_order_id,
    }
}

async fn within<T, F>(deadline: Deadline, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(deadline.remaining()?, fut).await {
        Ok(result) => result.map_err(StoreError::Database),
        Err(_) => Err(StoreError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(id: i64, side: OrderSide, price: Decimal, qty: Decimal) -> Order {
        Order {
            id,
            user_id: 7,
            account_id: 70,
            symbol: "SOLUSDT".into(),
            side,
            price,
            quantity: qty,
            remaining_qty: qty,
            status: OrderStatus::Working,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn maker(id: i64, side: OrderSide, price: Decimal, qty: Decimal) -> BookOrder {
        BookOrder {
            id,
            user_id: 8,
            account_id: 80,
            side,
            price,
            remaining_qty: qty,
        }
    }

    #[test]
    fn fill_assigns_buy_and_sell_ids_by_taker_side() {
        let taker = order(1, OrderSide::Buy, dec!(101), dec!(2));
        let mf = MakerFill {
            maker: maker(2, OrderSide::Sell, dec!(100), dec!(5)),
            qty: dec!(2),
        };
        let fill = fill_from(&taker, &mf);
        assert_eq!(fill.buy_order_id, 1);
        assert_eq!(fill.sell_order_id, 2);
        // Maker price rule
        assert_eq!(fill.price, dec!(100));

        let taker = order(3, OrderSide::Sell, dec!(99), dec!(2));
        let mf = MakerFill {
            maker: maker(4, OrderSide::Buy, dec!(100), dec!(5)),
            qty: dec!(2),
        };
        let fill = fill_from(&taker, &mf);
        assert_eq!(fill.buy_order_id, 4);
        assert_eq!(fill.sell_order_id, 3);
        assert_eq!(fill.price, dec!(100));
    }

    #[test]
    fn status_tracks_remaining() {
        assert_eq!(status_for(dec!(0)), OrderStatus::Filled);
        assert_eq!(status_for(dec!(-1)), OrderStatus::Filled);
        assert_eq!(status_for(dec!(0.5)), OrderStatus::Partial);
    }
}
