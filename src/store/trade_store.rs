//! Append-only trade log.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::TradeHistoryRow;

use super::{with_retry, Deadline, StoreError};

#[derive(Clone)]
pub struct TradeStore {
    pool: PgPool,
}

impl TradeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a trade inside the caller's fill transaction and returns
    /// the assigned id.
    pub async fn insert_tx(
        tx: &mut Transaction<'_, Postgres>,
        buy_order_id: i64,
        sell_order_id: i64,
        symbol: &str,
        price: Decimal,
        qty: Decimal,
        trade_time: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO trades
                (buy_order_id, sell_order_id, symbol, price, quantity, trade_time)
            VALUES
                ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(buy_order_id)
        .bind(sell_order_id)
        .bind(symbol)
        .bind(price)
        .bind(qty)
        .bind(trade_time)
        .fetch_one(&mut **tx)
        .await
    }

    /// Trade history for a user; the side column reports which side of
    /// each trade the user's order was on.
    pub async fn trades_for_user(
        &self,
        user_id: i64,
        limit: i64,
        deadline: Deadline,
    ) -> Result<Vec<TradeHistoryRow>, StoreError> {
        with_retry(deadline, || async move {
            sqlx::query_as::<_, TradeHistoryRow>(
                r#"
                SELECT a.account_no AS account_no,
                       t.symbol     AS symbol,
                       CASE
                           WHEN ob.user_id = $1 THEN 'BUY'
                           WHEN os.user_id = $1 THEN 'SELL'
                           ELSE 'N/A'
                       END          AS side,
                       t.price      AS price,
                       t.quantity   AS quantity,
                       t.trade_time AS trade_time
                FROM trades t
                JOIN orders ob ON t.buy_order_id  = ob.id
                JOIN orders os ON t.sell_order_id = os.id
                JOIN accounts a ON (
                       (ob.user_id = $1 AND ob.account_id = a.id)
                    OR (os.user_id = $1 AND os.account_id = a.id)
                )
                WHERE ob.user_id = $1 OR os.user_id = $1
                ORDER BY t.trade_time DESC
                LIMIT $2
                "#,
            )
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        })
        .await
    }
}
