//! Pool-side records from the Uniswap subgraph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A time-stamped pool record. The backtest timeline runs on these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: PoolEventKind,
}

/// Raw pool fields. The simulation never interprets them; they are carried
/// through to the result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEventKind {
    Swap(Swap),
    Reserves(Reserves),
}

/// A single swap against the pair. Token 0 is the quote asset (USDC) and
/// token 1 the base asset (WETH) for the default pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swap {
    pub id: String,
    pub amount0_in: f64,
    pub amount1_in: f64,
    pub amount0_out: f64,
    pub amount1_out: f64,
}

/// Hourly reserve snapshot of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reserves {
    pub base_reserve: f64,
    pub quote_reserve: f64,
}

impl PoolEvent {
    pub fn swap(timestamp: DateTime<Utc>, swap: Swap) -> Self {
        Self {
            timestamp,
            kind: PoolEventKind::Swap(swap),
        }
    }

    pub fn reserves(timestamp: DateTime<Utc>, reserves: Reserves) -> Self {
        Self {
            timestamp,
            kind: PoolEventKind::Reserves(reserves),
        }
    }
}
