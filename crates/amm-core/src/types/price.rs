//! Spot-price types from the centralized exchange feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV kline as returned by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A time-stamped reference price (the kline close).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl PricePoint {
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self { timestamp, price }
    }
}

impl From<&Candle> for PricePoint {
    fn from(candle: &Candle) -> Self {
        Self {
            timestamp: candle.open_time,
            price: candle.close,
        }
    }
}
