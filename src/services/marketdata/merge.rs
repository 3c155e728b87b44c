//! Merged depth: local liquidity aligned to the external price grid.
//!
//! The merged view's price levels are exactly those of the venue snapshot;
//! each carries the local grouped book's quantity and order count at the
//! same price (zero when absent). Venue quantities are never altered and
//! local-only levels never appear.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use crate::models::OrderSide;
use crate::services::matching::PriceKey;
use crate::store::{Deadline, GroupedLevel, OrderStore, StoreError};

use super::binance::{BinanceDepthClient, DepthLevel, DepthSnapshot};

/// One external price level annotated with local liquidity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedLevel {
    pub price: Decimal,
    pub qty: Decimal,
    pub cnt: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergedBook {
    pub symbol: String,
    pub bids: Vec<MergedLevel>,
    pub asks: Vec<MergedLevel>,
    pub mid: Decimal,
}

/// Aligns the local grouped book onto the snapshot's price grid.
pub fn merge_depth(snapshot: &DepthSnapshot, local: &[GroupedLevel]) -> MergedBook {
    let mut local_bids = HashMap::new();
    let mut local_asks = HashMap::new();
    for row in local {
        let entry = (row.qty, row.cnt);
        match row.side {
            OrderSide::Buy => local_bids.insert(PriceKey::from_decimal(row.price), entry),
            OrderSide::Sell => local_asks.insert(PriceKey::from_decimal(row.price), entry),
        };
    }

    MergedBook {
        symbol: snapshot.symbol.clone(),
        bids: align(&snapshot.bids, &local_bids),
        asks: align(&snapshot.asks, &local_asks),
        mid: snapshot.mid,
    }
}

fn align(
    grid: &[DepthLevel],
    local: &HashMap<PriceKey, (Decimal, i64)>,
) -> Vec<MergedLevel> {
    grid.iter()
        .map(|level| {
            let (qty, cnt) = local
                .get(&PriceKey::from_decimal(level.price))
                .copied()
                .unwrap_or((Decimal::ZERO, 0));
            MergedLevel {
                price: level.price,
                qty,
                cnt,
            }
        })
        .collect()
}

/// Fetches the venue snapshot and merges the local grouped book onto it.
pub struct DepthMerger {
    client: BinanceDepthClient,
    orders: OrderStore,
}

impl DepthMerger {
    pub fn new(client: BinanceDepthClient, orders: OrderStore) -> Self {
        Self { client, orders }
    }

    pub async fn merged(
        &self,
        symbol: &str,
        deadline: Deadline,
    ) -> Result<MergedBook, StoreError> {
        let symbol = symbol.to_ascii_uppercase();
        let snapshot = self.client.depth(&symbol).await;
        let local = self.orders.grouped_orderbook(&symbol, deadline).await?;
        Ok(merge_depth(&snapshot, &local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot() -> DepthSnapshot {
        DepthSnapshot {
            symbol: "SOLUSDT".into(),
            bids: vec![
                DepthLevel { price: dec!(100), qty: dec!(7) },
                DepthLevel { price: dec!(99.5), qty: dec!(3) },
            ],
            asks: vec![
                DepthLevel { price: dec!(100.5), qty: dec!(2) },
                DepthLevel { price: dec!(101), qty: dec!(4) },
            ],
            mid: dec!(100.25),
        }
    }

    fn grouped(side: OrderSide, price: Decimal, qty: Decimal, cnt: i64) -> GroupedLevel {
        GroupedLevel { side, price, qty, cnt }
    }

    #[test]
    fn merged_levels_are_exactly_the_snapshot_grid() {
        let local = vec![
            grouped(OrderSide::Buy, dec!(100), dec!(5), 2),
            // Local-only level must not leak into the merged view
            grouped(OrderSide::Buy, dec!(98), dec!(9), 1),
            grouped(OrderSide::Sell, dec!(101), dec!(1.5), 1),
        ];

        let merged = merge_depth(&snapshot(), &local);

        let bid_prices: Vec<Decimal> = merged.bids.iter().map(|l| l.price).collect();
        assert_eq!(bid_prices, vec![dec!(100), dec!(99.5)]);
        let ask_prices: Vec<Decimal> = merged.asks.iter().map(|l| l.price).collect();
        assert_eq!(ask_prices, vec![dec!(100.5), dec!(101)]);

        assert_eq!(merged.bids[0], MergedLevel { price: dec!(100), qty: dec!(5), cnt: 2 });
        assert_eq!(merged.bids[1], MergedLevel { price: dec!(99.5), qty: dec!(0), cnt: 0 });
        assert_eq!(merged.asks[0], MergedLevel { price: dec!(100.5), qty: dec!(0), cnt: 0 });
        assert_eq!(merged.asks[1], MergedLevel { price: dec!(101), qty: dec!(1.5), cnt: 1 });
        assert_eq!(merged.mid, dec!(100.25));
    }

    #[test]
    fn price_alignment_survives_decimal_renderings() {
        let mut snap = snapshot();
        snap.bids[0].price = dec!(100.00);
        let local = vec![grouped(OrderSide::Buy, dec!(100), dec!(5), 2)];

        let merged = merge_depth(&snap, &local);
        assert_eq!(merged.bids[0].qty, dec!(5));
        assert_eq!(merged.bids[0].cnt, 2);
    }

    #[test]
    fn empty_snapshot_yields_empty_merged_view() {
        let local = vec![grouped(OrderSide::Buy, dec!(100), dec!(5), 2)];
        let merged = merge_depth(&DepthSnapshot::empty("SOLUSDT"), &local);
        assert!(merged.bids.is_empty());
        assert!(merged.asks.is_empty());
        assert_eq!(merged.mid, Decimal::ZERO);
    }
}
