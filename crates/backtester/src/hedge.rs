//! Threshold-triggered short hedge with flat-fee execution.
//!
//! The engine is stepped once per timeline row, in timestamp order. Each step
//! first marks the position carried from the previous row to the new price,
//! then moves the position straight to the desired exposure and charges the
//! fee on the traded notional.

use amm_core::config::StrategyConfig;
use serde::Serialize;

use crate::valuation::lp_base_exposure;

/// Live hedge accumulators for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HedgeState {
    /// Signed base-asset exposure; negative is short.
    pub current_position: f64,
    /// Fees paid so far, in quote currency. Never decreases.
    pub cumulative_cost: f64,
    /// Mark-to-market PnL of the hedge so far, in quote currency.
    pub cumulative_pnl: f64,
}

/// Hedge outputs recorded for one timeline row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HedgeStep {
    pub hedge_desired: f64,
    pub hedge_position: f64,
    pub hedge_cost: f64,
    pub cumulative_hedge_cost: f64,
    pub cumulative_hedge_pnl: f64,
}

/// Stateful hedge simulator.
#[derive(Debug, Clone)]
pub struct HedgeEngine {
    k: f64,
    hedge_fraction: f64,
    il_threshold_pct: f64,
    fee_rate: f64,
    state: HedgeState,
    last_price: Option<f64>,
    trades: usize,
}

impl HedgeEngine {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            k: config.k,
            hedge_fraction: config.hedge_fraction,
            il_threshold_pct: config.il_threshold_pct,
            fee_rate: config.fee_rate,
            state: HedgeState::default(),
            last_price: None,
            trades: 0,
        }
    }

    /// Short `alpha` of the pool's base exposure while IL is above threshold.
    pub fn desired_exposure(&self, price: f64, il_pct: f64) -> f64 {
        if il_pct > self.il_threshold_pct {
            -self.hedge_fraction * lp_base_exposure(price, self.k)
        } else {
            0.0
        }
    }

    /// Advance one row. `price` must already have passed valuation.
    pub fn step(&mut self, price: f64, il_pct: f64) -> HedgeStep {
        // Short convention: a price drop profits a negative position.
        if let Some(prev) = self.last_price {
            self.state.cumulative_pnl += -self.state.current_position * (prev - price);
        }

        let desired = self.desired_exposure(price, il_pct);
        let delta = desired - self.state.current_position;
        let cost = self.fee_rate * delta.abs() * price;
        if delta != 0.0 {
            self.trades += 1;
        }

        self.state.cumulative_cost += cost;
        self.state.current_position = desired;
        self.last_price = Some(price);

        HedgeStep {
            hedge_desired: desired,
            hedge_position: self.state.current_position,
            hedge_cost: cost,
            cumulative_hedge_cost: self.state.cumulative_cost,
            cumulative_hedge_pnl: self.state.cumulative_pnl,
        }
    }

    pub fn state(&self) -> &HedgeState {
        &self.state
    }

    /// Number of steps that changed the position.
    pub fn trades(&self) -> usize {
        self.trades
    }
}
