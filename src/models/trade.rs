use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

use super::order::datetime_as_millis;

/// Per-user trade history row. `side` is the caller's side of the trade,
/// resolved by joining both referenced orders.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TradeHistoryRow {
    pub account_no: String,
    pub symbol: String,
    pub side: String,
    pub price: Decimal,
    pub quantity: Decimal,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub trade_time: DateTime<Utc>,
}
