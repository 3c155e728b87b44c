//! Public order facade: validation, persistence, dispatch to the matcher.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::models::{
    CancelOrdersRequest, LimitOrderRequest, MarketOrderRequest, NewOrder, OrderSide, WorkingOrder,
};
use crate::services::matching::{EngineError, Fill, MatchingEngine};
use crate::store::{AccountStore, Deadline, OrderStore, StoreError};

const DEFAULT_WORKING_LIMIT: i64 = 100;
const MAX_WORKING_LIMIT: i64 = 500;

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    /// Bad request shape; nothing was written.
    #[error("{0}")]
    Validation(String),

    /// Insufficient position or balance; rejected before any store write.
    #[error("{0}")]
    Precondition(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Serialize)]
pub struct PlaceOrderResult {
    pub order_id: i64,
    pub fills: Vec<Fill>,
}

#[derive(Clone)]
pub struct OrderService {
    orders: OrderStore,
    accounts: AccountStore,
    engine: Arc<MatchingEngine>,
    op_timeout: Duration,
}

impl OrderService {
    pub fn new(
        orders: OrderStore,
        accounts: AccountStore,
        engine: Arc<MatchingEngine>,
        op_timeout: Duration,
    ) -> Self {
        Self {
            orders,
            accounts,
            engine,
            op_timeout,
        }
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.op_timeout)
    }

    pub async fn place_limit(&self, req: LimitOrderRequest) -> Result<PlaceOrderResult, OrderError> {
        let symbol = normalize_symbol(&req.symbol)?;
        ensure_positive_qty(req.qty)?;
        if req.price <= Decimal::ZERO {
            return Err(OrderError::Validation(
                "limit price must be positive".into(),
            ));
        }

        let deadline = self.deadline();
        self.check_ownership(req.user_id, req.account_id, deadline)
            .await?;
        match req.side {
            OrderSide::Sell => {
                self.check_position(req.account_id, &symbol, req.qty, deadline)
                    .await?
            }
            OrderSide::Buy => {
                self.check_balance(req.account_id, req.price * req.qty, deadline)
                    .await?
            }
        }

        let order_id = self
            .orders
            .insert(
                &NewOrder {
                    user_id: req.user_id,
                    account_id: req.account_id,
                    symbol,
                    side: req.side,
                    price: req.price,
                    quantity: req.qty,
                },
                deadline,
            )
            .await?;

        // The matcher works from the durable row, reconciled by id
        let Some(order) = self.orders.get(order_id, deadline).await? else {
            return Ok(PlaceOrderResult {
                order_id,
                fills: Vec::new(),
            });
        };

        crate::metrics::record_order_submitted(&order.symbol, order.side.as_str());
        info!(order_id, symbol = %order.symbol, side = %order.side, "limit order accepted");

        let fills = self.engine.process_limit(order, deadline).await?;
        Ok(PlaceOrderResult { order_id, fills })
    }

    pub async fn place_market(
        &self,
        req: MarketOrderRequest,
    ) -> Result<PlaceOrderResult, OrderError> {
        let symbol = normalize_symbol(&req.symbol)?;
        ensure_positive_qty(req.qty)?;

        let deadline = self.deadline();
        self.check_ownership(req.user_id, req.account_id, deadline)
            .await?;
        if req.side == OrderSide::Sell {
            // A market buy has no bounded notional up front; the
            // settlement balance guard rejects it fill by fill.
            self.check_position(req.account_id, &symbol, req.qty, deadline)
                .await?;
        }

        let order_id = self
            .orders
            .insert(
                &NewOrder {
                    user_id: req.user_id,
                    account_id: req.account_id,
                    symbol,
                    side: req.side,
                    // Market orders persist with price 0
                    price: Decimal::ZERO,
                    quantity: req.qty,
                },
                deadline,
            )
            .await?;

        let Some(order) = self.orders.get(order_id, deadline).await? else {
            return Ok(PlaceOrderResult {
                order_id,
                fills: Vec::new(),
            });
        };

        crate::metrics::record_order_submitted(&order.symbol, order.side.as_str());
        info!(order_id, symbol = %order.symbol, side = %order.side, "market order accepted");

        let fills = self.engine.process_market(order, deadline).await?;
        Ok(PlaceOrderResult { order_id, fills })
    }

    /// Cancels the caller's orders among `order_ids`; ids belonging to
    /// someone else or already terminal are skipped. Returns how many
    /// orders transitioned to CANCELLED.
    pub async fn cancel(&self, req: CancelOrdersRequest) -> Result<u64, OrderError> {
        if req.order_ids.is_empty() {
            return Ok(0);
        }

        let deadline = self.deadline();
        let owned = self
            .orders
            .owned_live_orders(req.user_id, &req.order_ids, deadline)
            .await?;

        let mut by_symbol: HashMap<String, Vec<i64>> = HashMap::new();
        for row in owned {
            by_symbol.entry(row.symbol).or_default().push(row.id);
        }

        let mut affected = 0;
        for (symbol, ids) in by_symbol {
            affected += self.engine.cancel_resting(&symbol, &ids, deadline).await?;
        }

        info!(user_id = req.user_id, affected, "orders cancelled");
        Ok(affected)
    }

    pub async fn working_orders(
        &self,
        user_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<WorkingOrder>, OrderError> {
        let limit = clamp_limit(limit, DEFAULT_WORKING_LIMIT, MAX_WORKING_LIMIT);
        Ok(self
            .orders
            .working_for_user(user_id, limit, self.deadline())
            .await?)
    }

    async fn check_ownership(
        &self,
        user_id: i64,
        account_id: i64,
        deadline: Deadline,
    ) -> Result<(), OrderError> {
        match self.accounts.owner_of(account_id, deadline).await? {
            Some(owner) if owner == user_id => Ok(()),
            Some(_) => Err(OrderError::Validation(format!(
                "account {account_id} does not belong to user {user_id}"
            ))),
            None => Err(OrderError::Validation(format!(
                "account {account_id} not found"
            ))),
        }
    }

    async fn check_position(
        &self,
        account_id: i64,
        symbol: &str,
        qty: Decimal,
        deadline: Deadline,
    ) -> Result<(), OrderError> {
        let held = self
            .accounts
            .position(account_id, symbol, deadline)
            .await?
            .map(|p| p.qty)
            .unwrap_or(Decimal::ZERO);
        if held < qty {
            return Err(OrderError::Precondition(format!(
                "insufficient position: holding {held} {symbol}, selling {qty}"
            )));
        }
        Ok(())
    }

    async fn check_balance(
        &self,
        account_id: i64,
        notional: Decimal,
        deadline: Deadline,
    ) -> Result<(), OrderError> {
        let balance = self
            .accounts
            .balance(account_id, deadline)
            .await?
            .unwrap_or(Decimal::ZERO);
        if balance < notional {
            return Err(OrderError::Precondition(format!(
                "insufficient balance: {balance} available, {notional} required"
            )));
        }
        Ok(())
    }
}

fn normalize_symbol(raw: &str) -> Result<String, OrderError> {
    let symbol = raw.trim().to_ascii_uppercase();
    if symbol.is_empty() || !symbol.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(OrderError::Validation(format!("invalid symbol: {raw:?}")));
    }
    Ok(symbol)
}

fn ensure_positive_qty(qty: Decimal) -> Result<(), OrderError> {
    if qty <= Decimal::ZERO {
        return Err(OrderError::Validation(
            "order quantity must be positive".into(),
        ));
    }
    Ok(())
}

fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn symbols_normalize_to_uppercase() {
        assert_eq!(normalize_symbol(" solusdt ").unwrap(), "SOLUSDT");
        assert_eq!(normalize_symbol("BTCUSDT").unwrap(), "BTCUSDT");
        assert!(normalize_symbol("").is_err());
        assert!(normalize_symbol("   ").is_err());
        assert!(normalize_symbol("BTC/USDT").is_err());
    }

    #[test]
    fn quantity_must_be_positive() {
        assert!(ensure_positive_qty(dec!(0.0001)).is_ok());
        assert!(ensure_positive_qty(dec!(0)).is_err());
        assert!(ensure_positive_qty(dec!(-3)).is_err());
    }

    #[test]
    fn listing_limit_is_clamped() {
        assert_eq!(clamp_limit(None, 100, 500), 100);
        assert_eq!(clamp_limit(Some(10), 100, 500), 10);
        assert_eq!(clamp_limit(Some(0), 100, 500), 1);
        assert_eq!(clamp_limit(Some(9999), 100, 500), 500);
    }
}
