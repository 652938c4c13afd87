//! Investor portfolio aggregation and normalization.

use amm_core::types::PoolEventKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{BacktestError, Result};
use crate::hedge::HedgeStep;
use crate::valuation::ValuationRow;

/// Terminal output row of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioRow {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub event: PoolEventKind,
    pub lp_value: f64,
    pub hold_value: f64,
    pub il_pct: f64,
    pub hedge_desired: f64,
    pub hedge_position: f64,
    pub hedge_cost: f64,
    pub cumulative_hedge_cost: f64,
    pub cumulative_hedge_pnl: f64,
    /// `lp_value + cumulative_hedge_pnl - cumulative_hedge_cost`.
    pub investor_portfolio: f64,
    pub lp_value_norm: f64,
    pub hold_value_norm: f64,
    pub investor_portfolio_norm: f64,
}

/// Headline numbers for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestSummary {
    pub run_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub rows: usize,
    /// Normalization divisor (first row's hold value).
    pub initial_hold_value: f64,
    pub final_lp_norm: f64,
    pub final_hold_norm: f64,
    pub final_investor_norm: f64,
    pub max_il_pct: f64,
    /// Steps that changed the hedge position.
    pub hedge_trades: usize,
    pub total_hedge_cost: f64,
    pub total_hedge_pnl: f64,
    /// Largest peak-to-trough fall of the investor portfolio, as a fraction.
    pub max_drawdown: f64,
}

impl BacktestSummary {
    /// The hedged LP ended ahead of the unhedged LP.
    pub fn hedge_helped(&self) -> bool {
        self.final_investor_norm > self.final_lp_norm
    }

    /// The hedged LP ended ahead of simply holding.
    pub fn beat_hold(&self) -> bool {
        self.final_investor_norm > self.final_hold_norm
    }
}

/// Folds valuation and hedge outputs into [`PortfolioRow`]s.
///
/// The normalization divisor is the first pushed row's hold value, so rows
/// can be emitted in the same forward pass that drives the hedge engine.
#[derive(Debug, Default)]
pub struct PortfolioAggregator {
    rows: Vec<PortfolioRow>,
    initial_hold: Option<f64>,
    peak: f64,
    max_drawdown: f64,
    max_il_pct: f64,
}

impl PortfolioAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub fn push(&mut self, row: ValuationRow, hedge: HedgeStep) -> &PortfolioRow {
        // Valuation guarantees a non-zero hold value.
        let initial_hold = *self.initial_hold.get_or_insert(row.hold_value);
        let investor_portfolio =
            row.lp_value + hedge.cumulative_hedge_pnl - hedge.cumulative_hedge_cost;

        if self.rows.is_empty() {
            self.peak = investor_portfolio;
            self.max_il_pct = row.il_pct;
        }
        if investor_portfolio > self.peak {
            self.peak = investor_portfolio;
        }
        if self.peak > 0.0 {
            let drawdown = (self.peak - investor_portfolio) / self.peak;
            self.max_drawdown = self.max_drawdown.max(drawdown);
        }
        self.max_il_pct = self.max_il_pct.max(row.il_pct);

        self.rows.push(PortfolioRow {
            timestamp: row.timestamp,
            price: row.price,
            event: row.event,
            lp_value: row.lp_value,
            hold_value: row.hold_value,
            il_pct: row.il_pct,
            hedge_desired: hedge.hedge_desired,
            hedge_position: hedge.hedge_position,
            hedge_cost: hedge.hedge_cost,
            cumulative_hedge_cost: hedge.cumulative_hedge_cost,
            cumulative_hedge_pnl: hedge.cumulative_hedge_pnl,
            investor_portfolio,
            lp_value_norm: row.lp_value / initial_hold,
            hold_value_norm: row.hold_value / initial_hold,
            investor_portfolio_norm: investor_portfolio / initial_hold,
        });

        &self.rows[self.rows.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Close the run. Fails with `EmptyTimeline` when nothing was pushed.
    pub fn finish(self, hedge_trades: usize) -> Result<(Vec<PortfolioRow>, BacktestSummary)> {
        let (Some(first), Some(last)) = (self.rows.first(), self.rows.last()) else {
            return Err(BacktestError::EmptyTimeline);
        };
        let initial_hold_value = self.initial_hold.unwrap_or(first.hold_value);

        let summary = BacktestSummary {
            run_id: Uuid::new_v4(),
            start: first.timestamp,
            end: last.timestamp,
            rows: self.rows.len(),
            initial_hold_value,
            final_lp_norm: last.lp_value_norm,
            final_hold_norm: last.hold_value_norm,
            final_investor_norm: last.investor_portfolio_norm,
            max_il_pct: self.max_il_pct,
            hedge_trades,
            total_hedge_cost: last.cumulative_hedge_cost,
            total_hedge_pnl: last.cumulative_hedge_pnl,
            max_drawdown: self.max_drawdown,
        };

        Ok((self.rows, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amm_core::types::Reserves;

    fn valuation_row(secs: i64, price: f64, lp: f64, hold: f64) -> ValuationRow {
        ValuationRow {
            timestamp: DateTime::from_timestamp(secs, 0).unwrap(),
            price,
            event: PoolEventKind::Reserves(Reserves {
                base_reserve: 1.0,
                quote_reserve: price,
            }),
            lp_value: lp,
            hold_value: hold,
            il_pct: (hold - lp) / hold * 100.0,
        }
    }

    fn hedge(cost: f64, pnl: f64) -> HedgeStep {
        HedgeStep {
            hedge_desired: 0.0,
            hedge_position: 0.0,
            hedge_cost: 0.0,
            cumulative_hedge_cost: cost,
            cumulative_hedge_pnl: pnl,
        }
    }

    #[test]
    fn test_investor_portfolio_and_normalization() {
        let mut agg = PortfolioAggregator::new();
        agg.push(valuation_row(0, 1000.0, 14_000.0, 15_000.0), hedge(5.0, 0.0));
        let row = agg
            .push(valuation_row(60, 1100.0, 14_500.0, 16_000.0), hedge(5.0, 120.0))
            .clone();

        assert_eq!(row.investor_portfolio, 14_500.0 + 120.0 - 5.0);
        assert_eq!(row.hold_value_norm, 16_000.0 / 15_000.0);
        assert_eq!(row.lp_value_norm, 14_500.0 / 15_000.0);
        assert_eq!(row.investor_portfolio_norm, 14_615.0 / 15_000.0);

        let (rows, summary) = agg.finish(1).unwrap();
        assert_eq!(rows[0].hold_value_norm, 1.0);
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.initial_hold_value, 15_000.0);
        assert_eq!(summary.total_hedge_pnl, 120.0);
        assert_eq!(summary.total_hedge_cost, 5.0);
        assert_eq!(summary.hedge_trades, 1);
    }

    #[test]
    fn test_empty_aggregator_fails() {
        let agg = PortfolioAggregator::new();
        assert!(agg.is_empty());
        assert_eq!(agg.finish(0).unwrap_err(), BacktestError::EmptyTimeline);
    }

    #[test]
    fn test_max_drawdown_and_max_il() {
        let mut agg = PortfolioAggregator::with_capacity(3);
        agg.push(valuation_row(0, 1.0, 100.0, 110.0), hedge(0.0, 0.0));
        agg.push(valuation_row(1, 1.0, 80.0, 120.0), hedge(0.0, 0.0));
        agg.push(valuation_row(2, 1.0, 120.0, 121.0), hedge(0.0, 0.0));
        assert_eq!(agg.len(), 3);

        let (_, summary) = agg.finish(0).unwrap();
        assert!((summary.max_drawdown - 0.2).abs() < 1e-12);
        assert!((summary.max_il_pct - (40.0 / 120.0 * 100.0)).abs() < 1e-9);
        assert!(!summary.beat_hold());
        assert!(!summary.hedge_helped());
    }
}
