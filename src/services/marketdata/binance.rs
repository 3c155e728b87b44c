//! External venue depth snapshots.
//!
//! The venue returns prices and quantities as strings; they are parsed as
//! decimals so nothing downstream touches binary floats. Any request
//! failure or malformed payload degrades to an empty snapshot rather than
//! an error: market data is best effort.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct RawDepth {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepthLevel {
    pub price: Decimal,
    pub qty: Decimal,
}

/// Venue depth: bids descending, asks ascending, mid between the tops.
#[derive(Debug, Clone, Serialize)]
pub struct DepthSnapshot {
    pub symbol: String,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
    pub mid: Decimal,
}

impl DepthSnapshot {
    pub fn empty(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            bids: Vec::new(),
            asks: Vec::new(),
            mid: Decimal::ZERO,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DepthFetchError {
    #[error("depth request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed depth payload")]
    Malformed,
}

#[derive(Clone)]
pub struct BinanceDepthClient {
    http: reqwest::Client,
    base_url: String,
    limit: u32,
}

impl BinanceDepthClient {
    pub fn new(base_url: impl Into<String>, limit: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            limit,
        }
    }

    /// Fetches the depth snapshot for `symbol`; on any failure returns an
    /// empty snapshot instead of erroring.
    pub async fn depth(&self, symbol: &str) -> DepthSnapshot {
        let symbol = symbol.to_ascii_uppercase();
        match self.fetch(&symbol).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(symbol = %symbol, error = %err, "depth fetch failed, serving empty snapshot");
                crate::metrics::record_depth_fetch_failure();
                DepthSnapshot::empty(&symbol)
            }
        }
    }

    async fn fetch(&self, symbol: &str) -> Result<DepthSnapshot, DepthFetchError> {
        let url = format!("{}/api/v3/depth", self.base_url);
        let limit = self.limit.to_string();
        let raw: RawDepth = self
            .http
            .get(&url)
            .query(&[("symbol", symbol), ("limit", limit.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let bids = parse_levels(&raw.bids)?;
        let asks = parse_levels(&raw.asks)?;
        let mid = mid_price(&bids, &asks);

        Ok(DepthSnapshot {
            symbol: symbol.to_string(),
            bids,
            asks,
            mid,
        })
    }
}

fn parse_levels(raw: &[[String; 2]]) -> Result<Vec<DepthLevel>, DepthFetchError> {
    raw.iter()
        .map(|level| {
            let price =
                Decimal::from_str(&level[0]).map_err(|_| DepthFetchError::Malformed)?;
            let qty = Decimal::from_str(&level[1]).map_err(|_| DepthFetchError::Malformed)?;
            Ok(DepthLevel { price, qty })
        })
        .collect()
}

fn mid_price(bids: &[DepthLevel], asks: &[DepthLevel]) -> Decimal {
    match (bids.first(), asks.first()) {
        (Some(bid), Some(ask)) => (bid.price + ask.price) / Decimal::TWO,
        _ => Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, qty: Decimal) -> DepthLevel {
        DepthLevel { price, qty }
    }

    #[test]
    fn mid_is_between_the_tops() {
        let bids = vec![level(dec!(99), dec!(1)), level(dec!(98), dec!(1))];
        let asks = vec![level(dec!(101), dec!(1))];
        assert_eq!(mid_price(&bids, &asks), dec!(100));
    }

    #[test]
    fn mid_is_zero_when_a_side_is_empty() {
        let bids = vec![level(dec!(99), dec!(1))];
        assert_eq!(mid_price(&bids, &[]), Decimal::ZERO);
        assert_eq!(mid_price(&[], &[]), Decimal::ZERO);
    }

    #[test]
    fn levels_parse_string_decimals_exactly() {
        let raw = vec![["97500.12345678".to_string(), "0.50".to_string()]];
        let parsed = parse_levels(&raw).unwrap();
        assert_eq!(parsed[0].price, dec!(97500.12345678));
        assert_eq!(parsed[0].qty, dec!(0.50));
    }

    #[test]
    fn malformed_levels_are_rejected() {
        let raw = vec![["not-a-price".to_string(), "1".to_string()]];
        assert!(parse_levels(&raw).is_err());
    }
}
