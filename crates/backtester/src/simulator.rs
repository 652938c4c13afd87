//! Backtest pipeline: align, value, hedge, aggregate.

use amm_core::config::StrategyConfig;
use amm_core::types::{PoolEvent, PricePoint, TimeWindow};
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::aligner::{align_with_stats, AlignmentStats};
use crate::data_store::{PoolEventSource, PriceSource};
use crate::error::BacktestError;
use crate::hedge::HedgeEngine;
use crate::portfolio::{BacktestSummary, PortfolioAggregator, PortfolioRow};
use crate::valuation::{valuation, ValuationRow};

/// Complete result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestOutput {
    pub rows: Vec<PortfolioRow>,
    pub summary: BacktestSummary,
    pub stats: AlignmentStats,
}

/// Run the core pipeline over in-memory series.
///
/// A single forward pass carries the hedge state from row to row; any failure
/// aborts the run and no partial table is returned.
pub fn run_pipeline(
    prices: Vec<PricePoint>,
    events: Vec<PoolEvent>,
    config: &StrategyConfig,
) -> std::result::Result<BacktestOutput, BacktestError> {
    let (timeline, stats) = align_with_stats(prices, events, config.leading_price_policy)?;

    let mut engine = HedgeEngine::new(config);
    let mut aggregator = PortfolioAggregator::with_capacity(timeline.len());

    for row in timeline {
        let value = valuation(row.price, config.k, &config.initial_holding)?;
        let step = engine.step(row.price, value.il_pct);
        aggregator.push(ValuationRow::new(row, value), step);
    }

    let (rows, summary) = aggregator.finish(engine.trades())?;
    Ok(BacktestOutput {
        rows,
        summary,
        stats,
    })
}

/// Fetches both input series for a window and runs the pipeline on them.
pub struct BacktestSimulator<P, E> {
    config: StrategyConfig,
    prices: P,
    events: E,
}

impl<P: PriceSource, E: PoolEventSource> BacktestSimulator<P, E> {
    pub fn new(config: StrategyConfig, prices: P, events: E) -> Self {
        Self {
            config,
            prices,
            events,
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub async fn run(&self, window: &TimeWindow) -> Result<BacktestOutput> {
        info!(
            start = %window.start,
            end = %window.end,
            k = self.config.k,
            threshold = self.config.il_threshold_pct,
            alpha = self.config.hedge_fraction,
            "Starting backtest"
        );

        let (prices, events) = tokio::try_join!(
            async {
                self.prices
                    .fetch_prices(window)
                    .await
                    .context("Failed to fetch reference prices")
            },
            async {
                self.events
                    .fetch_events(window)
                    .await
                    .context("Failed to fetch pool events")
            },
        )?;

        info!(prices = prices.len(), events = events.len(), "Fetched input series");

        let output = run_pipeline(prices, events, &self.config)
            .context("Backtest pipeline failed")?;

        info!(
            run_id = %output.summary.run_id,
            rows = output.summary.rows,
            dropped = output.stats.dropped,
            backfilled = output.stats.backfilled,
            final_lp = output.summary.final_lp_norm,
            final_hold = output.summary.final_hold_norm,
            final_investor = output.summary.final_investor_norm,
            trades = output.summary.hedge_trades,
            "Backtest completed"
        );

        Ok(output)
    }
}
