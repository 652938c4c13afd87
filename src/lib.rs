//! LP Hedge: Uniswap LP impermanent-loss backtester with a delta-hedge overlay
//!
//! This is the root crate that provides benchmark and integration-test access
//! to the internal modules. For actual functionality, use the individual
//! crates directly:
//!
//! - `amm-core`: Core types, exchange and subgraph clients, configuration
//! - `backtester`: Alignment, valuation, hedge simulation, portfolio aggregation
//! - `backtest-cli`: The `lp-backtest` command-line runner

// Re-export for benchmarks
pub use amm_core as core;
pub use backtester as backtest;
