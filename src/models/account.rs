use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

use super::order::datetime_as_millis;

/// (account_id, symbol) is the composite key; a row exists only while
/// qty > 0.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Position {
    pub account_id: i64,
    pub symbol: String,
    pub qty: Decimal,
    pub avg_price: Decimal,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PositionView {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_price: Decimal,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub balance: Decimal,
    pub positions: Vec<PositionView>,
}

/// Listing row for a user's accounts.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AccountRow {
    pub id: i64,
    pub account_no: String,
    pub balance: Decimal,
}
