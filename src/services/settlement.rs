//! Fill settlement: cash and position updates for both sides of a trade.
//!
//! Runs entirely inside the matcher's fill transaction. Both account rows
//! are locked in ascending id order before any update, so settlements for
//! the same accounts arriving through different symbols serialize instead
//! of deadlocking.

use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use tracing::warn;

use crate::store::AccountStore;

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("insufficient balance on account {0}")]
    InsufficientBalance(i64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One fill as seen by settlement.
#[derive(Debug, Clone)]
pub struct SettlementFill {
    pub symbol: String,
    pub price: Decimal,
    pub qty: Decimal,
    pub buy_account_id: i64,
    pub sell_account_id: i64,
}

impl SettlementFill {
    pub fn notional(&self) -> Decimal {
        self.price * self.qty
    }
}

/// Buy-side position after a fill: quantity grows, cost basis is the
/// volume-weighted average of all buy fills.
pub fn position_after_buy(
    existing: Option<(Decimal, Decimal)>,
    qty: Decimal,
    price: Decimal,
) -> (Decimal, Decimal) {
    match existing {
        None => (qty, price),
        Some((old_qty, old_avg)) => {
            let new_qty = old_qty + qty;
            let new_avg = (old_qty * old_avg + qty * price) / new_qty;
            (new_qty, new_avg)
        }
    }
}

/// Sell-side position after a fill: quantity shrinks, avg_price is
/// untouched. `None` means the position closed out and the row goes away.
pub fn position_after_sell(old_qty: Decimal, qty: Decimal) -> Option<Decimal> {
    let new_qty = old_qty - qty;
    (new_qty > Decimal::ZERO).then_some(new_qty)
}

pub struct Settlement;

impl Settlement {
    /// Applies one fill to both sides: buyer pays the notional and gains
    /// quantity at VWAP cost; seller receives the notional and sheds
    /// quantity. Rejects the fill if the buyer's balance would go
    /// negative, which aborts the caller's transaction.
    pub async fn apply_fill(
        tx: &mut Transaction<'_, Postgres>,
        fill: &SettlementFill,
    ) -> Result<(), SettlementError> {
        let notional = fill.notional();

        AccountStore::lock_accounts_tx(tx, fill.buy_account_id, fill.sell_account_id).await?;

        if !AccountStore::debit_balance_tx(tx, fill.buy_account_id, notional).await? {
            return Err(SettlementError::InsufficientBalance(fill.buy_account_id));
        }
        AccountStore::credit_balance_tx(tx, fill.sell_account_id, notional).await?;

        // Buyer position: create or fold into the VWAP cost basis
        let existing = AccountStore::position_tx(tx, fill.buy_account_id, &fill.symbol).await?;
        let (new_qty, new_avg) = position_after_buy(existing, fill.qty, fill.price);
        if existing.is_some() {
            AccountStore::update_position_tx(tx, fill.buy_account_id, &fill.symbol, new_qty, new_avg)
                .await?;
        } else {
            AccountStore::insert_position_tx(tx, fill.buy_account_id, &fill.symbol, new_qty, new_avg)
                .await?;
        }

        // Seller position: shrink, delete on close-out. An absent row
        // cannot happen through the order facade (short selling is
        // rejected up front); tolerate it as a no-op.
        match AccountStore::position_tx(tx, fill.sell_account_id, &fill.symbol).await? {
            None => {
                warn!(
                    account_id = fill.sell_account_id,
                    symbol = %fill.symbol,
                    "sell fill with no position, skipping position update"
                );
            }
            Some((old_qty, old_avg)) => match position_after_sell(old_qty, fill.qty) {
                Some(remaining) => {
                    AccountStore::update_position_tx(
                        tx,
                        fill.sell_account_id,
                        &fill.symbol,
                        remaining,
                        old_avg,
                    )
                    .await?;
                }
                None => {
                    AccountStore::delete_position_tx(tx, fill.sell_account_id, &fill.symbol)
                        .await?;
                }
            },
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn first_buy_opens_at_fill_price() {
        assert_eq!(
            position_after_buy(None, dec!(4), dec!(100)),
            (dec!(4), dec!(100))
        );
    }

    #[test]
    fn buys_fold_into_the_vwap() {
        let (qty, avg) = position_after_buy(Some((dec!(10), dec!(100))), dec!(10), dec!(110));
        assert_eq!(qty, dec!(20));
        assert_eq!(avg, dec!(105));

        // Weighted, not arithmetic: small add barely moves the basis
        let (qty, avg) = position_after_buy(Some((dec!(9), dec!(100))), dec!(1), dec!(200));
        assert_eq!(qty, dec!(10));
        assert_eq!(avg, dec!(110));
    }

    #[test]
    fn vwap_matches_the_sum_of_fills() {
        let fills = [(dec!(2), dec!(100)), (dec!(3), dec!(101)), (dec!(5), dec!(99.5))];
        let mut pos = None;
        for (qty, price) in fills {
            pos = Some(position_after_buy(pos, qty, price));
        }
        let (qty, avg) = pos.unwrap();

        let total_qty: Decimal = fills.iter().map(|(q, _)| *q).sum();
        let total_cost: Decimal = fills.iter().map(|(q, p)| *q * *p).sum();
        assert_eq!(qty, total_qty);
        assert_eq!(avg, total_cost / total_qty);
    }

    #[test]
    fn sell_shrinks_and_closes_out() {
        assert_eq!(position_after_sell(dec!(10), dec!(4)), Some(dec!(6)));
        assert_eq!(position_after_sell(dec!(10), dec!(10)), None);
        // Over-sell collapses to close-out rather than a negative row
        assert_eq!(position_after_sell(dec!(10), dec!(12)), None);
    }

    #[test]
    fn notional_moves_cash_symmetrically() {
        let fill = SettlementFill {
            symbol: "SOLUSDT".into(),
            price: dec!(100.5),
            qty: dec!(3),
            buy_account_id: 1,
            sell_account_id: 2,
        };
        // Buyer delta + seller delta = 0 by construction
        let buyer_delta = -fill.notional();
        let seller_delta = fill.notional();
        assert_eq!(buyer_delta + seller_delta, Decimal::ZERO);
        assert_eq!(fill.notional(), dec!(301.5));
    }
}
