use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

// Helper module to serialize DateTime as milliseconds timestamp
pub(crate) mod datetime_as_millis {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(dt.timestamp_millis())
    }
}

/// Raised when a stored side/status string is not a known variant.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ParseEnumError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(ParseEnumError(format!("unknown order side: {other}"))),
        }
    }
}

impl TryFrom<String> for OrderSide {
    type Error = ParseEnumError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Status values match the `orders.status` column verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Resting with no fills yet
    Working,
    /// At least one fill, residual quantity remains
    Partial,
    /// Fully filled; terminal
    Filled,
    /// Cancelled (explicit or market-order residual); terminal
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Working => "WORKING",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WORKING" => Ok(OrderStatus::Working),
            "PARTIAL" => Ok(OrderStatus::Partial),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(ParseEnumError(format!("unknown order status: {other}"))),
        }
    }
}

impl TryFrom<String> for OrderStatus {
    type Error = ParseEnumError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Durable order row. Market orders persist with price 0.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub account_id: i64,
    pub symbol: String,
    #[sqlx(try_from = "String")]
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub remaining_qty: Decimal,
    #[sqlx(try_from = "String")]
    pub status: OrderStatus,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub updated_at: DateTime<Utc>,
}

/// Fields for a fresh order row; always inserted WORKING with
/// remaining_qty = quantity.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: i64,
    pub account_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Open-order row returned by the working-orders listing.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct WorkingOrder {
    pub id: i64,
    pub symbol: String,
    #[sqlx(try_from = "String")]
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub remaining_qty: Decimal,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct LimitOrderRequest {
    pub user_id: i64,
    pub account_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub qty: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct MarketOrderRequest {
    pub user_id: i64,
    pub account_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct CancelOrdersRequest {
    pub user_id: i64,
    pub order_ids: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_round_trips_through_strings() {
        assert_eq!("BUY".parse::<OrderSide>().unwrap(), OrderSide::Buy);
        assert_eq!("sell".parse::<OrderSide>().unwrap(), OrderSide::Sell);
        assert_eq!(OrderSide::Buy.as_str(), "BUY");
        assert!("HOLD".parse::<OrderSide>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Working.is_terminal());
        assert!(!OrderStatus::Partial.is_terminal());
    }

    #[test]
    fn status_parses_db_values() {
        for s in ["WORKING", "PARTIAL", "FILLED", "CANCELLED"] {
            assert_eq!(s.parse::<OrderStatus>().unwrap().as_str(), s);
        }
    }
}
