use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod db;
mod metrics;
mod models;
mod services;
mod store;
mod utils;

use crate::config::AppConfig;
use crate::db::Database;
use crate::services::marketdata::{BinanceDepthClient, DepthMerger};
use crate::services::matching::MatchingEngine;
use crate::services::order_service::OrderService;
use crate::store::{AccountStore, Deadline, OrderStore, TradeStore};

pub struct AppState {
    pub config: AppConfig,
    pub engine: Arc<MatchingEngine>,
    pub order_service: OrderService,
    pub order_store: OrderStore,
    pub trade_store: TradeStore,
    pub account_store: AccountStore,
    pub depth: BinanceDepthClient,
    pub merger: DepthMerger,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spot_trading_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("Starting spot trading backend v{}", env!("CARGO_PKG_VERSION"));

    // Initialize database
    let db = Database::connect(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database connected");

    let order_store = OrderStore::new(db.pool.clone());
    let trade_store = TradeStore::new(db.pool.clone());
    let account_store = AccountStore::new(db.pool.clone());

    // Matching engine: reload resting orders into the in-memory books
    let engine = Arc::new(MatchingEngine::new(db.pool.clone(), config.store_timeout()));
    match engine.recover(Deadline::after(config.store_timeout())).await {
        Ok(0) => tracing::info!("No open orders to recover"),
        Ok(count) => tracing::info!("Recovered {count} open orders into the books"),
        Err(err) => {
            tracing::error!("Failed to recover orders from database: {err}");
            tracing::warn!("Starting with empty books");
        }
    }

    let order_service = OrderService::new(
        order_store.clone(),
        account_store.clone(),
        engine.clone(),
        config.store_timeout(),
    );

    // External venue depth + merged view
    let depth = BinanceDepthClient::new(config.binance_base_url.clone(), config.depth_limit);
    let merger = DepthMerger::new(depth.clone(), order_store.clone());

    // Prometheus recorder for /metrics
    let prometheus = metrics::init_recorder()?;

    let state = Arc::new(AppState {
        config: config.clone(),
        engine,
        order_service,
        order_store,
        trade_store,
        account_store,
        depth,
        merger,
    });

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/metrics",
            get(move || {
                let handle = prometheus.clone();
                async move { handle.render() }
            }),
        )
        .merge(api::routes::create_router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
