//! Order matching.
//!
//! ```text
//! OrderService
//!   └→ MatchingEngine (per-symbol gate, plan → persist → apply)
//!        ├→ OrderBook (in-memory, price-time priority)
//!        └→ Settlement + stores (one transaction per incoming order)
//! ```

mod engine;
mod orderbook;
mod types;

pub use engine::{EngineError, MatchingEngine};
pub use orderbook::OrderBook;
pub use types::{BookLevel, BookOrder, Fill, GroupedBook, MakerFill, MatchPlan, PriceKey};
