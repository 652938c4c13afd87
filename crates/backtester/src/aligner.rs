//! As-of alignment of the reference price series onto the pool-event timeline.

use amm_core::config::LeadingPricePolicy;
use amm_core::types::{PoolEvent, PoolEventKind, PricePoint};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::{BacktestError, Result};

/// One pool event with the reference price known at its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineRow {
    pub timestamp: DateTime<Utc>,
    /// Last price with `timestamp <= self.timestamp`.
    pub price: f64,
    pub event: PoolEventKind,
}

/// Counters describing one alignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlignmentStats {
    pub events: usize,
    pub prices: usize,
    /// Leading events skipped under [`LeadingPricePolicy::Drop`].
    pub dropped: usize,
    /// Leading events bound to the first price under [`LeadingPricePolicy::Backfill`].
    pub backfilled: usize,
}

/// Align `prices` onto `events`, one row per retained event.
pub fn align(
    prices: Vec<PricePoint>,
    events: Vec<PoolEvent>,
    policy: LeadingPricePolicy,
) -> Result<Vec<TimelineRow>> {
    align_with_stats(prices, events, policy).map(|(rows, _)| rows)
}

/// Backward as-of merge followed by forward fill.
///
/// Both inputs are stable-sorted by timestamp, then walked with two cursors:
/// every price at or before an event's timestamp is consumed, and the last one
/// consumed is bound to the event. Duplicate timestamps keep input order, so
/// the later of two same-time prices wins.
pub fn align_with_stats(
    mut prices: Vec<PricePoint>,
    mut events: Vec<PoolEvent>,
    policy: LeadingPricePolicy,
) -> Result<(Vec<TimelineRow>, AlignmentStats)> {
    let mut stats = AlignmentStats {
        events: events.len(),
        prices: prices.len(),
        ..Default::default()
    };

    if events.is_empty() {
        return Ok((Vec::new(), stats));
    }
    if prices.is_empty() {
        return Err(BacktestError::MissingReferenceData {
            reason: format!(
                "price series is empty but {} pool events need a price",
                events.len()
            ),
        });
    }

    prices.sort_by_key(|p| p.timestamp);
    events.sort_by_key(|e| e.timestamp);

    let first_price = prices[0];
    let unresolved = events.partition_point(|e| e.timestamp < first_price.timestamp);
    if unresolved > 0 {
        match policy {
            LeadingPricePolicy::Reject => {
                return Err(BacktestError::MissingReferenceData {
                    reason: format!(
                        "{} pool events precede the first price at {} (first event at {})",
                        unresolved, first_price.timestamp, events[0].timestamp
                    ),
                });
            }
            LeadingPricePolicy::Drop => {
                warn!(
                    dropped = unresolved,
                    first_price_at = %first_price.timestamp,
                    "Dropping pool events without a reference price"
                );
                stats.dropped = unresolved;
            }
            LeadingPricePolicy::Backfill => {
                warn!(
                    backfilled = unresolved,
                    price = first_price.price,
                    "Backfilling leading pool events with the first price"
                );
                stats.backfilled = unresolved;
            }
        }
    }

    let mut rows = Vec::with_capacity(events.len() - stats.dropped);
    let mut cursor = 0;
    let mut last_price = first_price.price;

    for event in events.into_iter().skip(stats.dropped) {
        while cursor < prices.len() && prices[cursor].timestamp <= event.timestamp {
            last_price = prices[cursor].price;
            cursor += 1;
        }
        rows.push(TimelineRow {
            timestamp: event.timestamp,
            price: last_price,
            event: event.kind,
        });
    }

    Ok((rows, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use amm_core::types::Reserves;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn event(secs: i64, tag: f64) -> PoolEvent {
        PoolEvent::reserves(
            ts(secs),
            Reserves {
                base_reserve: tag,
                quote_reserve: 0.0,
            },
        )
    }

    fn tag(row: &TimelineRow) -> f64 {
        match &row.event {
            PoolEventKind::Reserves(r) => r.base_reserve,
            PoolEventKind::Swap(_) => f64::NAN,
        }
    }

    #[test]
    fn test_backward_join_and_forward_fill() {
        let prices = vec![
            PricePoint::new(ts(0), 100.0),
            PricePoint::new(ts(10), 110.0),
            PricePoint::new(ts(20), 120.0),
        ];
        let events = vec![event(0, 1.0), event(5, 2.0), event(10, 3.0), event(35, 4.0)];

        let rows = align(prices, events, LeadingPricePolicy::Reject).unwrap();
        let got: Vec<f64> = rows.iter().map(|r| r.price).collect();
        // Exact match at t=0 and t=10, as-of at t=5, held value at t=35.
        assert_eq!(got, vec![100.0, 100.0, 110.0, 120.0]);
    }

    #[test]
    fn test_unsorted_inputs_are_sorted() {
        let prices = vec![PricePoint::new(ts(10), 110.0), PricePoint::new(ts(0), 100.0)];
        let events = vec![event(12, 2.0), event(3, 1.0)];

        let rows = align(prices, events, LeadingPricePolicy::Reject).unwrap();
        assert_eq!(rows[0].timestamp, ts(3));
        assert_eq!(rows[0].price, 100.0);
        assert_eq!(rows[1].timestamp, ts(12));
        assert_eq!(rows[1].price, 110.0);
    }

    #[test]
    fn test_duplicate_timestamps_keep_input_order() {
        let prices = vec![PricePoint::new(ts(0), 100.0), PricePoint::new(ts(0), 101.0)];
        let events = vec![event(0, 1.0), event(0, 2.0)];

        let rows = align(prices, events, LeadingPricePolicy::Reject).unwrap();
        // The later of the same-time prices is the most recent one.
        assert!(rows.iter().all(|r| r.price == 101.0));
        assert_eq!(tag(&rows[0]), 1.0);
        assert_eq!(tag(&rows[1]), 2.0);
    }

    #[test]
    fn test_empty_pool_series_yields_empty_timeline() {
        let (rows, stats) = align_with_stats(vec![], vec![], LeadingPricePolicy::Reject).unwrap();
        assert!(rows.is_empty());
        assert_eq!(stats.events, 0);

        let rows = align(
            vec![PricePoint::new(ts(0), 1.0)],
            vec![],
            LeadingPricePolicy::Reject,
        )
        .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_empty_price_series_is_missing_reference_data() {
        let result = align(vec![], vec![event(0, 1.0)], LeadingPricePolicy::Backfill);
        assert!(matches!(
            result,
            Err(BacktestError::MissingReferenceData { .. })
        ));
    }

    #[test]
    fn test_leading_events_rejected_by_default() {
        let prices = vec![PricePoint::new(ts(10), 100.0)];
        let events = vec![event(5, 1.0), event(10, 2.0)];

        let result = align(prices, events, LeadingPricePolicy::default());
        assert!(matches!(
            result,
            Err(BacktestError::MissingReferenceData { .. })
        ));
    }

    #[test]
    fn test_leading_events_dropped() {
        let prices = vec![PricePoint::new(ts(10), 100.0), PricePoint::new(ts(20), 105.0)];
        let events = vec![event(1, 1.0), event(5, 2.0), event(10, 3.0), event(25, 4.0)];

        let (rows, stats) = align_with_stats(prices, events, LeadingPricePolicy::Drop).unwrap();
        assert_eq!(stats.dropped, 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(tag(&rows[0]), 3.0);
        assert_eq!(rows[0].price, 100.0);
        assert_eq!(rows[1].price, 105.0);
    }

    #[test]
    fn test_all_events_dropped_leaves_empty_timeline() {
        let prices = vec![PricePoint::new(ts(100), 100.0)];
        let events = vec![event(1, 1.0), event(2, 2.0)];

        let rows = align(prices, events, LeadingPricePolicy::Drop).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_leading_events_backfilled() {
        let prices = vec![PricePoint::new(ts(10), 100.0), PricePoint::new(ts(20), 105.0)];
        let events = vec![event(5, 1.0), event(15, 2.0)];

        let (rows, stats) = align_with_stats(prices, events, LeadingPricePolicy::Backfill).unwrap();
        assert_eq!(stats.backfilled, 1);
        assert_eq!(rows[0].price, 100.0);
        assert_eq!(rows[1].price, 100.0);
    }
}
