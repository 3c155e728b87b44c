//! Depth views: engine memory, store aggregation, venue passthrough and
//! the merged overlay.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::OrderSide;
use crate::services::marketdata::{DepthSnapshot, MergedBook};
use crate::services::matching::{BookLevel, GroupedBook};
use crate::store::Deadline;
use crate::utils::response::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SymbolQuery {
    pub symbol: String,
}

/// GET /orderbook — the matcher's in-memory book, grouped by price.
pub async fn engine_orderbook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SymbolQuery>,
) -> Json<GroupedBook> {
    let symbol = query.symbol.to_ascii_uppercase();
    Json(state.engine.grouped_snapshot(&symbol))
}

/// GET /orderbook/local — aggregation over the durable order rows.
pub async fn local_orderbook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<GroupedBook>, AppError> {
    let symbol = query.symbol.to_ascii_uppercase();
    let deadline = Deadline::after(state.config.store_timeout());
    let rows = state.order_store.grouped_orderbook(&symbol, deadline).await?;

    let mut book = GroupedBook::default();
    for row in rows {
        let level = BookLevel {
            price: row.price,
            qty: row.qty,
            cnt: row.cnt,
        };
        match row.side {
            OrderSide::Buy => book.bids.push(level),
            OrderSide::Sell => book.asks.push(level),
        }
    }
    book.bids.sort_by(|a, b| b.price.cmp(&a.price));
    book.asks.sort_by(|a, b| a.price.cmp(&b.price));

    Ok(Json(book))
}

/// GET /orderbook/binance — venue snapshot passthrough.
pub async fn binance_orderbook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SymbolQuery>,
) -> Json<DepthSnapshot> {
    Json(state.depth.depth(&query.symbol).await)
}

/// GET /orderbook/merged — venue price grid with local qty/cnt.
pub async fn merged_orderbook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<MergedBook>, AppError> {
    let deadline = Deadline::after(state.config.store_timeout());
    let merged = state.merger.merged(&query.symbol, deadline).await?;
    Ok(Json(merged))
}
