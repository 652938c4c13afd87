//! Backtest time window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inclusive `[start, end]` interval a backtest covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Exchange APIs page by epoch milliseconds.
    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_millis(&self) -> i64 {
        self.end.timestamp_millis()
    }

    /// The subgraph filters on epoch seconds.
    pub fn start_secs(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_secs(&self) -> i64 {
        self.end.timestamp()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

impl Default for TimeWindow {
    /// Calendar year 2024.
    fn default() -> Self {
        Self {
            start: DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default(),
            end: DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default(),
        }
    }
}
