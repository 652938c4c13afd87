//! Constant-product LP valuation against the hold baseline.
//!
//! All functions here are pure: the same inputs always give bit-identical
//! outputs, in any order.

use amm_core::config::InitialHolding;
use amm_core::types::PoolEventKind;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aligner::TimelineRow;
use crate::error::{BacktestError, Result};

/// LP value, hold value, and impermanent loss at one price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Valuation {
    pub lp_value: f64,
    pub hold_value: f64,
    /// `(hold - lp) / hold * 100`. Positive means the LP trails holding.
    pub il_pct: f64,
}

/// A timeline row with its valuation attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuationRow {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub event: PoolEventKind,
    pub lp_value: f64,
    pub hold_value: f64,
    pub il_pct: f64,
}

impl ValuationRow {
    pub fn new(row: TimelineRow, valuation: Valuation) -> Self {
        Self {
            timestamp: row.timestamp,
            price: row.price,
            event: row.event,
            lp_value: valuation.lp_value,
            hold_value: valuation.hold_value,
            il_pct: valuation.il_pct,
        }
    }
}

/// Value the pool position and the hold baseline at `price`.
///
/// `lp_value = 2 * sqrt(k * price)` is the value of both reserves at the
/// no-arbitrage price, where each side is worth `sqrt(k * price)`.
pub fn valuation(price: f64, k: f64, holding: &InitialHolding) -> Result<Valuation> {
    if !price.is_finite() || price <= 0.0 {
        return Err(degenerate(price, "price must be positive and finite"));
    }
    let product = k * price;
    if !product.is_finite() || product <= 0.0 {
        return Err(degenerate(price, format!("k * price = {} is not positive", product)));
    }

    let lp_value = 2.0 * product.sqrt();
    let hold_value = hold_value(price, holding);
    if hold_value == 0.0 || !hold_value.is_finite() {
        return Err(degenerate(price, format!("hold value is {}", hold_value)));
    }

    Ok(Valuation {
        lp_value,
        hold_value,
        il_pct: (hold_value - lp_value) / hold_value * 100.0,
    })
}

/// Value of the unpooled holding `x0 * price + y0`.
pub fn hold_value(price: f64, holding: &InitialHolding) -> f64 {
    holding.base * price + holding.quote
}

/// Base-asset units held by the pool at `price`: `sqrt(k / price)`.
pub fn lp_base_exposure(price: f64, k: f64) -> f64 {
    (k / price).sqrt()
}

/// Lowest price at which holding and providing liquidity are worth the same.
///
/// Solves `x0 * p + y0 = 2 * sqrt(k * p)` for `p`. Returns `None` when the
/// curves never meet (`k < x0 * y0`) or the holding has no base asset. With
/// `k == x0 * y0` the curves touch at `p = y0 / x0` and IL is non-negative at
/// every other price.
pub fn il_free_price(k: f64, holding: &InitialHolding) -> Option<f64> {
    let (x0, y0) = (holding.base, holding.quote);
    if x0 <= 0.0 || k <= 0.0 {
        return None;
    }
    let discriminant = k - x0 * y0;
    if discriminant < 0.0 {
        return None;
    }
    let root = (k.sqrt() - discriminant.sqrt()) / x0;
    Some(root * root)
}

fn degenerate(price: f64, reason: impl Into<String>) -> BacktestError {
    BacktestError::DegenerateValuation {
        price,
        reason: reason.into(),
    }
}
