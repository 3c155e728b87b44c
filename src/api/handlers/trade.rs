//! Trade history.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::TradeHistoryRow;
use crate::store::Deadline;
use crate::utils::response::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct MyTradesQuery {
    pub user_id: i64,
    pub limit: Option<i64>,
}

/// GET /trades/my
pub async fn my_trades(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MyTradesQuery>,
) -> Result<Json<Vec<TradeHistoryRow>>, AppError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let deadline = Deadline::after(state.config.store_timeout());
    let trades = state
        .trade_store
        .trades_for_user(query.user_id, limit, deadline)
        .await?;
    Ok(Json(trades))
}
