//! Backtester
//!
//! Historical simulation of a constant-product LP position against a passive
//! hold baseline, with a threshold-triggered delta-hedge overlay.
//!
//! # Pipeline
//!
//! - **Aligner**: as-of merge of the price series onto the pool-event timeline
//! - **Valuation**: LP value, hold value, and impermanent loss per row
//! - **Hedge Engine**: stateful short hedge with flat-fee execution and
//!   mark-to-market PnL
//! - **Portfolio Aggregator**: investor portfolio and normalized series
//!
//! # Example
//!
//! ```ignore
//! use backtester::{run_pipeline, BacktestSimulator};
//! use amm_core::config::StrategyConfig;
//!
//! let output = run_pipeline(prices, events, &StrategyConfig::default())?;
//! println!("Final portfolio: {:.4}", output.summary.final_investor_norm);
//! ```

pub mod aligner;
pub mod data_store;
pub mod error;
pub mod hedge;
pub mod portfolio;
pub mod simulator;
pub mod valuation;

// Re-exports
pub use aligner::{align, align_with_stats, AlignmentStats, TimelineRow};
pub use data_store::{CsvStore, PoolEventSource, PriceSource};
pub use error::BacktestError;
pub use hedge::{HedgeEngine, HedgeState, HedgeStep};
pub use portfolio::{BacktestSummary, PortfolioAggregator, PortfolioRow};
pub use simulator::{run_pipeline, BacktestOutput, BacktestSimulator};
pub use valuation::{valuation, Valuation, ValuationRow};
