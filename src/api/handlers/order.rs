//! Order API handlers: placement, cancellation, open-order listing.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{CancelOrdersRequest, LimitOrderRequest, MarketOrderRequest, WorkingOrder};
use crate::services::order_service::PlaceOrderResult;
use crate::utils::response::AppError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub affected: u64,
}

#[derive(Debug, Deserialize)]
pub struct WorkingOrdersQuery {
    pub user_id: i64,
    pub limit: Option<i64>,
}

/// POST /orders/limit
pub async fn place_limit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LimitOrderRequest>,
) -> Result<Json<PlaceOrderResult>, AppError> {
    let result = state.order_service.place_limit(req).await?;
    Ok(Json(result))
}

/// POST /orders/market
pub async fn place_market(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MarketOrderRequest>,
) -> Result<Json<PlaceOrderResult>, AppError> {
    let result = state.order_service.place_market(req).await?;
    Ok(Json(result))
}

/// POST /orders/cancel
pub async fn cancel_orders(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CancelOrdersRequest>,
) -> Result<Json<CancelResponse>, AppError> {
    let affected = state.order_service.cancel(req).await?;
    Ok(Json(CancelResponse { affected }))
}

/// GET /orders/working
pub async fn working_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WorkingOrdersQuery>,
) -> Result<Json<Vec<WorkingOrder>>, AppError> {
    let orders = state
        .order_service
        .working_orders(query.user_id, query.limit)
        .await?;
    Ok(Json(orders))
}
