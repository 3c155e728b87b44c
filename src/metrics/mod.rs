//! Prometheus metrics for the matching core.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Metric names as constants for consistency
pub mod names {
    pub const ORDERS_SUBMITTED_TOTAL: &str = "orders_submitted_total";
    pub const ORDERS_CANCELLED_TOTAL: &str = "orders_cancelled_total";
    pub const TRADES_EXECUTED_TOTAL: &str = "trades_executed_total";
    pub const TRADE_NOTIONAL: &str = "trade_notional";
    pub const ORDER_MATCH_DURATION_SECONDS: &str = "order_match_duration_seconds";
    pub const DEPTH_FETCH_FAILURES_TOTAL: &str = "depth_fetch_failures_total";
}

/// Installs the global Prometheus recorder; the handle renders /metrics.
pub fn init_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub fn record_order_submitted(symbol: &str, side: &str) {
    counter!(
        names::ORDERS_SUBMITTED_TOTAL,
        "symbol" => symbol.to_string(),
        "side" => side.to_string()
    )
    .increment(1);
}

pub fn record_orders_cancelled(count: u64) {
    counter!(names::ORDERS_CANCELLED_TOTAL).increment(count);
}

pub fn record_trade(symbol: &str, notional: Decimal) {
    counter!(names::TRADES_EXECUTED_TOTAL, "symbol" => symbol.to_string()).increment(1);
    histogram!(names::TRADE_NOTIONAL, "symbol" => symbol.to_string())
        .record(notional.to_f64().unwrap_or(0.0));
}

pub fn record_match_duration(seconds: f64) {
    histogram!(names::ORDER_MATCH_DURATION_SECONDS).record(seconds);
}

pub fn record_depth_fetch_failure() {
    counter!(names::DEPTH_FETCH_FAILURES_TOTAL).increment(1);
}
