//! Market data: external venue depth and the merged local overlay.

mod binance;
mod merge;

pub use binance::{BinanceDepthClient, DepthLevel, DepthSnapshot};
pub use merge::{merge_depth, DepthMerger, MergedBook, MergedLevel};
