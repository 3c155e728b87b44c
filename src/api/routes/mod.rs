use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::AppState;

pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        // Orders
        .route("/orders/limit", post(handlers::order::place_limit))
        .route("/orders/market", post(handlers::order::place_market))
        .route("/orders/cancel", post(handlers::order::cancel_orders))
        .route("/orders/working", get(handlers::order::working_orders))
        // Depth views
        .route("/orderbook", get(handlers::orderbook::engine_orderbook))
        .route("/orderbook/local", get(handlers::orderbook::local_orderbook))
        .route("/orderbook/binance", get(handlers::orderbook::binance_orderbook))
        .route("/orderbook/merged", get(handlers::orderbook::merged_orderbook))
        // Trades
        .route("/trades/my", get(handlers::trade::my_trades))
        // Accounts
        .route("/account/summary", get(handlers::account::account_summary))
        .route("/account/list", get(handlers::account::account_list))
}
