//! Terminal failures of a backtest run.

use thiserror::Error;

/// A run either yields a complete result table or fails with one of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BacktestError {
    #[error("Missing reference data: {reason}")]
    MissingReferenceData { reason: String },

    #[error("Degenerate valuation at price {price}: {reason}")]
    DegenerateValuation { price: f64, reason: String },

    #[error("Empty timeline: no pool events to process")]
    EmptyTimeline,
}

pub type Result<T> = std::result::Result<T, BacktestError>;
