//! Order table access.
//!
//! The matcher mutates rows only through the guarded update paths here:
//! terminal rows (FILLED/CANCELLED) are frozen and silently skipped, which
//! is what resolves the cancel-vs-match race.

use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::{NewOrder, Order, OrderSide, OrderStatus, WorkingOrder};

use super::{with_retry, Deadline, StoreError};

/// One (side, price) bucket of live orders for a symbol.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GroupedLevel {
    #[sqlx(try_from = "String")]
    pub side: OrderSide,
    pub price: Decimal,
    pub qty: Decimal,
    pub cnt: i64,
}

/// Minimal reference used to group a cancel batch by symbol.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OwnedOrderRef {
    pub id: i64,
    pub symbol: String,
}

#[derive(Clone)]
pub struct OrderStore {
    pool: PgPool,
}

impl OrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a fresh WORKING row with remaining_qty = quantity and
    /// returns the assigned id. Rejects non-positive quantities.
    pub async fn insert(&self, order: &NewOrder, deadline: Deadline) -> Result<i64, StoreError> {
        if order.quantity <= Decimal::ZERO {
            return Err(StoreError::Rejected("order quantity must be positive"));
        }

        with_retry(deadline, || async move {
            sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO orders
                    (user_id, account_id, symbol, side, price, quantity, remaining_qty, status, created_at, updated_at)
                VALUES
                    ($1, $2, $3, $4, $5, $6, $6, $7, now(), now())
                RETURNING id
                "#,
            )
            .bind(order.user_id)
            .bind(order.account_id)
            .bind(&order.symbol)
            .bind(order.side.as_str())
            .bind(order.price)
            .bind(order.quantity)
            .bind(OrderStatus::Working.as_str())
            .fetch_one(&self.pool)
            .await
        })
        .await
    }

    pub async fn get(&self, id: i64, deadline: Deadline) -> Result<Option<Order>, StoreError> {
        with_retry(deadline, || async move {
            sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
        })
        .await
    }

    /// Sets remaining quantity (and optionally status) unless the row is
    /// already terminal.
    pub async fn update_remaining(
        &self,
        id: i64,
        remaining: Decimal,
        status: Option<OrderStatus>,
        deadline: Deadline,
    ) -> Result<(), StoreError> {
        with_retry(deadline, || async move {
            sqlx::query(
                r#"
                UPDATE orders
                SET remaining_qty = $2,
                    status        = COALESCE($3, status),
                    updated_at    = now()
                WHERE id = $1
                  AND status IN ('WORKING', 'PARTIAL')
                "#,
            )
            .bind(id)
            .bind(remaining)
            .bind(status.map(|s| s.as_str()))
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    /// Moves WORKING/PARTIAL rows to CANCELLED with remaining 0; terminal
    /// rows are untouched. Returns how many rows transitioned.
    pub async fn cancel_many(&self, ids: &[i64], deadline: Deadline) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        with_retry(deadline, || async move {
            sqlx::query(
                r#"
                UPDATE orders
                SET status = 'CANCELLED', remaining_qty = 0, updated_at = now()
                WHERE id = ANY($1)
                  AND status IN ('WORKING', 'PARTIAL')
                "#,
            )
            .bind(ids)
            .execute(&self.pool)
            .await
            .map(|done| done.rows_affected())
        })
        .await
    }

    /// Aggregates live rows (WORKING/PARTIAL, remaining > 0) by side and
    /// price for the local depth view.
    pub async fn grouped_orderbook(
        &self,
        symbol: &str,
        deadline: Deadline,
    ) -> Result<Vec<GroupedLevel>, StoreError> {
        with_retry(deadline, || async move {
            sqlx::query_as::<_, GroupedLevel>(
                r#"
                SELECT side,
                       price,
                       SUM(remaining_qty) AS qty,
                       COUNT(*)           AS cnt
                FROM orders
                WHERE symbol = $1
                  AND status IN ('WORKING', 'PARTIAL')
                  AND remaining_qty > 0
                GROUP BY side, price
                "#,
            )
            .bind(symbol)
            .fetch_all(&self.pool)
            .await
        })
        .await
    }

    /// Time-descending list of a user's open orders.
    pub async fn working_for_user(
        &self,
        user_id: i64,
        limit: i64,
        deadline: Deadline,
    ) -> Result<Vec<WorkingOrder>, StoreError> {
        with_retry(deadline, || async move {
            sqlx::query_as::<_, WorkingOrder>(
                r#"
                SELECT id, symbol, side, price, quantity, remaining_qty, created_at
                FROM orders
                WHERE user_id = $1
                  AND status IN ('WORKING', 'PARTIAL')
                ORDER BY created_at DESC
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

    /// All live rows across symbols in arrival order; feeds book recovery
    /// at startup.
    pub async fn live_orders(&self, deadline: Deadline) -> Result<Vec<Order>, StoreError> {
        with_retry(deadline, || async move {
            sqlx::query_as::<_, Order>(
                r#"
                SELECT *
                FROM orders
                WHERE status IN ('WORKING', 'PARTIAL')
                  AND remaining_qty > 0
                ORDER BY created_at ASC, id ASC
                "#,
            )
            .fetch_all(&self.pool)
            .await
        })
        .await
    }

    /// Live order ids of `ids` that belong to `user_id`, with their
    /// symbols. Ownership filter for the cancel path.
    pub async fn owned_live_orders(
        &self,
        user_id: i64,
        ids: &[i64],
        deadline: Deadline,
    ) -> Result<Vec<OwnedOrderRef>, StoreError> {
        with_retry(deadline, || async move {
            sqlx::query_as::<_, OwnedOrderRef>(
                r#"
                SELECT id, symbol
                FROM orders
                WHERE id = ANY($1)
                  AND user_id = $2
                  AND status IN ('WORKING', 'PARTIAL')
                "#,
            )
            .bind(ids)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
        })
        .await
    }

    /// Transaction-scoped remaining/status update for the fill path.
    /// Returns rows affected; 0 means the row was already terminal.
    pub async fn update_remaining_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        remaining: Decimal,
        status: OrderStatus,
    ) -> Result<u64, sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE orders
            SET remaining_qty = $2,
                status        = $3,
                updated_at    = now()
            WHERE id = $1
              AND status IN ('WORKING', 'PARTIAL')
            "#,
        )
        .bind(id)
        .bind(remaining)
        .bind(status.as_str())
        .execute(&mut **tx)
        .await
        .map(|done| done.rows_affected())
    }
}
