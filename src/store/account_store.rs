//! Accounts (cash balance) and per-symbol positions.

use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::{AccountRow, AccountSummary, Position, PositionView};

use super::{with_retry, Deadline, StoreError};

#[derive(Clone)]
pub struct AccountStore {
    pool: PgPool,
}

impl AccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn owner_of(
        &self,
        account_id: i64,
        deadline: Deadline,
    ) -> Result<Option<i64>, StoreError> {
        with_retry(deadline, || async move {
            sqlx::query_scalar::<_, i64>("SELECT user_id FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await
        })
        .await
    }

    pub async fn balance(
        &self,
        account_id: i64,
        deadline: Deadline,
    ) -> Result<Option<Decimal>, StoreError> {
        with_retry(deadline, || async move {
            sqlx::query_scalar::<_, Decimal>("SELECT balance FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await
        })
        .await
    }

    /// Balance plus positions ordered by symbol; `None` if the account
    /// does not exist.
    pub async fn summary(
        &self,
        account_id: i64,
        deadline: Deadline,
    ) -> Result<Option<AccountSummary>, StoreError> {
        let Some(balance) = self.balance(account_id, deadline).await? else {
            return Ok(None);
        };

        let positions = with_retry(deadline, || async move {
            sqlx::query_as::<_, PositionView>(
                r#"
                SELECT symbol, qty, avg_price, updated_at
                FROM positions
                WHERE account_id = $1
                ORDER BY symbol
                "#,
            )
            .bind(account_id)
            .fetch_all(&self.pool)
            .await
        })
        .await?;

        Ok(Some(AccountSummary { balance, positions }))
    }

    pub async fn accounts_for_user(
        &self,
        user_id: i64,
        deadline: Deadline,
    ) -> Result<Vec<AccountRow>, StoreError> {
        with_retry(deadline, || async move {
            sqlx::query_as::<_, AccountRow>(
                r#"
                SELECT id, account_no, balance
                FROM accounts
                WHERE user_id = $1
                ORDER BY id
                "#,
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
        })
        .await
    }

    pub async fn position(
        &self,
        account_id: i64,
        symbol: &str,
        deadline: Deadline,
    ) -> Result<Option<Position>, StoreError> {
        with_retry(deadline, || async move {
            sqlx::query_as::<_, Position>(
                r#"
                SELECT account_id, symbol, qty, avg_price, updated_at
                FROM positions
                WHERE account_id = $1 AND symbol = $2
                "#,
            )
            .bind(account_id)
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await
        })
        .await
    }

    // ------------------------------------------------------------------
    // Transaction-scoped operations for the fill-settlement sequence
    // ------------------------------------------------------------------

    /// Row-locks both accounts in ascending id order so concurrent fills
    /// touching the same accounts from different symbols cannot deadlock.
    pub async fn lock_accounts_tx(
        tx: &mut Transaction<'_, Postgres>,
        first: i64,
        second: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            SELECT id FROM accounts
            WHERE id IN ($1, $2)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(first.min(second))
        .bind(first.max(second))
        .fetch_all(&mut **tx)
        .await
        .map(|_| ())
    }

    /// Debits the account only if the balance stays non-negative.
    /// Returns false when the guard rejects the debit.
    pub async fn debit_balance_tx(
        tx: &mut Transaction<'_, Postgres>,
        account_id: i64,
        amount: Decimal,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance - $2
            WHERE id = $1
              AND balance >= $2
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .execute(&mut **tx)
        .await
        .map(|done| done.rows_affected() == 1)
    }

    pub async fn credit_balance_tx(
        tx: &mut Transaction<'_, Postgres>,
        account_id: i64,
        amount: Decimal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET balance = balance + $2 WHERE id = $1")
            .bind(account_id)
            .bind(amount)
            .execute(&mut **tx)
            .await
            .map(|_| ())
    }

    pub async fn position_tx(
        tx: &mut Transaction<'_, Postgres>,
        account_id: i64,
        symbol: &str,
    ) -> Result<Option<(Decimal, Decimal)>, sqlx::Error> {
        sqlx::query_as::<_, (Decimal, Decimal)>(
            r#"
            SELECT qty, avg_price
            FROM positions
            WHERE account_id = $1 AND symbol = $2
            FOR UPDATE
            "#,
        )
        .bind(account_id)
        .bind(symbol)
        .fetch_optional(&mut **tx)
        .await
    }

    pub async fn insert_position_tx(
        tx: &mut Transaction<'_, Postgres>,
        account_id: i64,
        symbol: &str,
        qty: Decimal,
        avg_price: Decimal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO positions (account_id, symbol, qty, avg_price, updated_at)
            VALUES ($1, $2, $3, $4, now())
            "#,
        )
        .bind(account_id)
        .bind(symbol)
        .bind(qty)
        .bind(avg_price)
        .execute(&mut **tx)
        .await
        .map(|_| ())
    }

    pub async fn update_position_tx(
        tx: &mut Transaction<'_, Postgres>,
        account_id: i64,
        symbol: &str,
        qty: Decimal,
        avg_price: Decimal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE positions
            SET qty = $3, avg_price = $4, updated_at = now()
            WHERE account_id = $1 AND symbol = $2
            "#,
        )
        .bind(account_id)
        .bind(symbol)
        .bind(qty)
        .bind(avg_price)
        .execute(&mut **tx)
        .await
        .map(|_| ())
    }

    pub async fn delete_position_tx(
        tx: &mut Transaction<'_, Postgres>,
        account_id: i64,
        symbol: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM positions WHERE account_id = $1 AND symbol = $2")
            .bind(account_id)
            .bind(symbol)
            .execute(&mut **tx)
            .await
            .map(|_| ())
    }
}
