//! Uniswap v2 subgraph client (The Graph).
//!
//! Swaps are paged with a timestamp cursor, hourly reserves with `skip`.

use super::{build_http_client, send_with_retry, CursorStep, RetryPolicy};
use crate::config::SubgraphConfig;
use crate::types::{PoolEvent, PoolEventKind, Reserves, Swap, TimeWindow};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration as StdDuration;
use tracing::{debug, error, info, warn};

/// GraphQL client for pool history.
pub struct SubgraphClient {
    endpoint: String,
    http_client: reqwest::Client,
    retry: RetryPolicy,
    page_delay: StdDuration,
}

impl SubgraphClient {
    /// Entities per GraphQL page.
    pub const PAGE_LIMIT: usize = 1000;
    /// Pause between swap pages to stay under gateway rate limits.
    const PAGE_DELAY: StdDuration = StdDuration::from_millis(200);

    pub fn new(config: &SubgraphConfig) -> Result<Self> {
        Ok(Self::with_endpoint(config.endpoint(), build_http_client()?))
    }

    pub fn with_endpoint(endpoint: String, http_client: reqwest::Client) -> Self {
        Self {
            endpoint,
            http_client,
            retry: RetryPolicy::default(),
            page_delay: Self::PAGE_DELAY,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_page_delay(mut self, page_delay: StdDuration) -> Self {
        self.page_delay = page_delay;
        self
    }

    /// Fetch every swap on `pool_address` inside `window`, oldest first.
    ///
    /// Pages restart at the last timestamp seen, so a second split across two
    /// pages is read in full; swaps already collected are skipped by id.
    pub async fn fetch_swaps(&self, pool_address: &str, window: &TimeWindow) -> Result<Vec<PoolEvent>> {
        let pool = pool_address.to_lowercase();
        let end = window.end_secs();
        let mut cursor = window.start_secs();
        let mut events = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut iteration = 0u32;

        loop {
            iteration += 1;
            let query = format!(
                r#"{{
  swaps(first: {limit}, orderBy: timestamp, orderDirection: asc, where: {{
    pair: "{pool}", timestamp_gte: {cursor}, timestamp_lte: {end}
  }}) {{
    id
    timestamp
    amount0In
    amount1In
    amount0Out
    amount1Out
  }}
}}"#,
                limit = Self::PAGE_LIMIT,
            );

            let page: SwapsData = self.query(&query).await?;
            if page.swaps.is_empty() {
                info!(iteration, "No new swaps, ending pagination");
                break;
            }

            let page_len = page.swaps.len();
            let parsed = page
                .swaps
                .into_iter()
                .map(RawSwap::into_event)
                .collect::<Result<Vec<_>>>()?;
            let last = parsed
                .last()
                .map(|e| e.timestamp.timestamp())
                .unwrap_or(cursor);

            let mut fresh = 0usize;
            for event in parsed {
                if let PoolEventKind::Swap(swap) = &event.kind {
                    if !seen.insert(swap.id.clone()) {
                        continue;
                    }
                }
                fresh += 1;
                events.push(event);
            }
            debug!(iteration, count = page_len, fresh, last, "Fetched swap page");

            let progress = PageProgress {
                cursor,
                last,
                end,
                fresh,
                full: page_len >= Self::PAGE_LIMIT,
            };
            match next_cursor(progress) {
                CursorStep::Next(next) => cursor = next,
                CursorStep::Done => {
                    info!(iteration, "Reached end of swap history");
                    break;
                }
                CursorStep::Stalled => {
                    warn!(iteration, cursor, last, "No forward progress in swap pagination");
                    break;
                }
            }

            tokio::time::sleep(self.page_delay).await;
        }

        info!(pool = %pool, total = events.len(), pages = iteration, "Fetched swaps from subgraph");
        Ok(events)
    }

    /// Fetch hourly reserve snapshots for `pool_address` inside `window`.
    pub async fn fetch_hourly_reserves(
        &self,
        pool_address: &str,
        window: &TimeWindow,
    ) -> Result<Vec<PoolEvent>> {
        let pool = pool_address.to_lowercase();
        let (start, end) = (window.start_secs(), window.end_secs());
        let mut events = Vec::new();
        let mut skip = 0usize;

        loop {
            let query = format!(
                r#"{{
  pairHourDatas(first: {limit}, skip: {skip}, where: {{
    pair: "{pool}", hourStartUnix_gte: {start}, hourStartUnix_lte: {end}
  }}) {{
    hourStartUnix
    reserve0
    reserve1
  }}
}}"#,
                limit = Self::PAGE_LIMIT,
            );

            let page: PairHourData = self.query(&query).await?;
            if page.pair_hour_datas.is_empty() {
                break;
            }
            let count = page.pair_hour_datas.len();
            for raw in page.pair_hour_datas {
                events.push(raw.into_event()?);
            }
            debug!(skip, count, "Fetched pair hour page");
            skip += Self::PAGE_LIMIT;
        }

        info!(pool = %pool, total = events.len(), "Fetched hourly reserves from subgraph");
        Ok(events)
    }

    async fn query<T: DeserializeOwned>(&self, query: &str) -> Result<T> {
        let request = self
            .http_client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "query": query }));
        let response = send_with_retry(request, &self.retry).await?;
        let body: GraphResponse<T> = response.json().await?;
        body.into_data()
    }
}

/// State of the swap cursor after one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageProgress {
    pub cursor: i64,
    /// Timestamp of the page's last swap.
    pub last: i64,
    pub end: i64,
    /// Swaps on the page not collected before.
    pub fresh: usize,
    /// The page hit the entity limit, so more rows may follow.
    pub full: bool,
}

/// Decide where the next swap page starts.
pub fn next_cursor(page: PageProgress) -> CursorStep {
    if page.last < page.cursor {
        CursorStep::Stalled
    } else if page.last >= page.end || !page.full {
        CursorStep::Done
    } else if page.fresh == 0 {
        // A full page inside one already-collected second.
        CursorStep::Stalled
    } else {
        CursorStep::Next(page.last)
    }
}

#[derive(Debug, Deserialize)]
struct GraphResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphError>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
}

impl<T> GraphResponse<T> {
    fn into_data(self) -> Result<T> {
        if !self.errors.is_empty() {
            let message = self
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            error!(%message, "Subgraph returned errors");
            return Err(Error::Api {
                message,
                status: None,
            });
        }
        self.data.ok_or_else(|| Error::Api {
            message: "Unexpected result structure: missing data".to_string(),
            status: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SwapsData {
    swaps: Vec<RawSwap>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSwap {
    id: String,
    timestamp: Value,
    amount0_in: Value,
    amount1_in: Value,
    amount0_out: Value,
    amount1_out: Value,
}

impl RawSwap {
    fn into_event(self) -> Result<PoolEvent> {
        let timestamp = unix_seconds(&self.timestamp, "swap timestamp")?;
        Ok(PoolEvent::swap(
            timestamp,
            Swap {
                id: self.id,
                amount0_in: scalar_f64(&self.amount0_in, "amount0In")?,
                amount1_in: scalar_f64(&self.amount1_in, "amount1In")?,
                amount0_out: scalar_f64(&self.amount0_out, "amount0Out")?,
                amount1_out: scalar_f64(&self.amount1_out, "amount1Out")?,
            },
        ))
    }
}

#[derive(Debug, Deserialize)]
struct PairHourData {
    #[serde(rename = "pairHourDatas")]
    pair_hour_datas: Vec<RawPairHour>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPairHour {
    hour_start_unix: Value,
    reserve0: Value,
    reserve1: Value,
}

impl RawPairHour {
    /// Token 0 is the quote asset, token 1 the base asset.
    fn into_event(self) -> Result<PoolEvent> {
        let timestamp = unix_seconds(&self.hour_start_unix, "hourStartUnix")?;
        Ok(PoolEvent::reserves(
            timestamp,
            Reserves {
                base_reserve: scalar_f64(&self.reserve1, "reserve1")?,
                quote_reserve: scalar_f64(&self.reserve0, "reserve0")?,
            },
        ))
    }
}

/// The subgraph encodes BigInt/BigDecimal as strings and Int as numbers.
fn scalar_f64(value: &Value, field: &'static str) -> Result<f64> {
    match value {
        Value::String(s) => s.parse().map_err(|_| Error::parse(field, s.clone())),
        Value::Number(n) => n.as_f64().ok_or_else(|| Error::parse(field, n.to_string())),
        other => Err(Error::parse(field, other.to_string())),
    }
}

fn unix_seconds(value: &Value, field: &'static str) -> Result<DateTime<Utc>> {
    let secs = match value {
        Value::String(s) => s.parse::<i64>().map_err(|_| Error::parse(field, s.clone()))?,
        Value::Number(n) => n.as_i64().ok_or_else(|| Error::parse(field, n.to_string()))?,
        other => return Err(Error::parse(field, other.to_string())),
    };
    DateTime::from_timestamp(secs, 0).ok_or_else(|| Error::parse(field, secs.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_server;
    use serde_json::json;

    fn progress(cursor: i64, last: i64, fresh: usize, full: bool) -> PageProgress {
        PageProgress {
            cursor,
            last,
            end: 1_000,
            fresh,
            full,
        }
    }

    #[test]
    fn test_next_cursor() {
        // Full page: restart at the last second to pick up its remaining swaps.
        assert_eq!(next_cursor(progress(100, 250, 1000, true)), CursorStep::Next(250));
        assert_eq!(next_cursor(progress(100, 1_000, 1000, true)), CursorStep::Done);
        assert_eq!(next_cursor(progress(100, 1_500, 1000, true)), CursorStep::Done);
        // A short page is the tail of the history.
        assert_eq!(next_cursor(progress(100, 250, 12, false)), CursorStep::Done);
        // A page whose last record sits before the cursor would loop forever.
        assert_eq!(next_cursor(progress(300, 250, 1000, true)), CursorStep::Stalled);
        // Re-reading one busy second with nothing new would loop forever too.
        assert_eq!(next_cursor(progress(300, 300, 0, true)), CursorStep::Stalled);
        assert_eq!(next_cursor(progress(300, 300, 400, true)), CursorStep::Next(300));
    }

    #[test]
    fn test_parse_swaps_response() {
        let body = r#"{
            "data": {
                "swaps": [
                    {
                        "id": "0xabc-0",
                        "timestamp": "1704067211",
                        "amount0In": "0",
                        "amount1In": "1.25",
                        "amount0Out": "2851.337",
                        "amount1Out": "0"
                    }
                ]
            }
        }"#;
        let response: GraphResponse<SwapsData> = serde_json::from_str(body).unwrap();
        let data = response.into_data().unwrap();
        let event = data.swaps.into_iter().next().unwrap().into_event().unwrap();

        assert_eq!(event.timestamp.timestamp(), 1_704_067_211);
        match event.kind {
            PoolEventKind::Swap(swap) => {
                assert_eq!(swap.id, "0xabc-0");
                assert_eq!(swap.amount1_in, 1.25);
                assert_eq!(swap.amount0_out, 2851.337);
            }
            other => panic!("expected swap, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_pair_hour_response_maps_reserves() {
        let body = r#"{
            "data": {
                "pairHourDatas": [
                    { "hourStartUnix": 1704067200, "reserve0": "41000000.5", "reserve1": "17900.25" }
                ]
            }
        }"#;
        let response: GraphResponse<PairHourData> = serde_json::from_str(body).unwrap();
        let raw = response.into_data().unwrap().pair_hour_datas.into_iter().next().unwrap();
        let event = raw.into_event().unwrap();

        assert_eq!(event.timestamp.timestamp(), 1_704_067_200);
        assert_eq!(
            event.kind,
            PoolEventKind::Reserves(Reserves {
                base_reserve: 17900.25,
                quote_reserve: 41000000.5,
            })
        );
    }

    #[test]
    fn test_graph_errors_surface_as_api_error() {
        let body = r#"{ "errors": [ { "message": "indexer unavailable" } ] }"#;
        let response: GraphResponse<SwapsData> = serde_json::from_str(body).unwrap();
        match response.into_data() {
            Err(Error::Api { message, .. }) => assert_eq!(message, "indexer unavailable"),
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_data_is_an_error() {
        let response: GraphResponse<SwapsData> = serde_json::from_str("{}").unwrap();
        assert!(response.into_data().is_err());
    }

    fn raw_swap(n: usize, ts: i64) -> Value {
        json!({
            "id": format!("0xs-{}", n),
            "timestamp": ts.to_string(),
            "amount0In": "0",
            "amount1In": "1",
            "amount0Out": "2000",
            "amount1Out": "0"
        })
    }

    fn swaps_body(swaps: Vec<Value>) -> String {
        json!({ "data": { "swaps": swaps } }).to_string()
    }

    fn client_for(url: String) -> SubgraphClient {
        SubgraphClient::with_endpoint(url, build_http_client().unwrap())
            .with_retry(RetryPolicy {
                max_attempts: 2,
                backoff: StdDuration::from_millis(1),
                rate_limit_backoff: StdDuration::from_millis(1),
            })
            .with_page_delay(StdDuration::ZERO)
    }

    fn window() -> TimeWindow {
        TimeWindow::new(
            DateTime::from_timestamp(0, 0).unwrap(),
            DateTime::from_timestamp(10_000, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_fetch_swaps_keeps_swaps_split_across_pages() {
        // A full page whose last two swaps share second 500 with later ones.
        let mut first: Vec<Value> = (0..998).map(|n| raw_swap(n, 100 + n as i64 / 10)).collect();
        first.push(raw_swap(998, 500));
        first.push(raw_swap(999, 500));
        let second = vec![
            raw_swap(998, 500),
            raw_swap(999, 500),
            raw_swap(1000, 500),
            raw_swap(1001, 600),
        ];
        let (url, log) = test_server::serve(vec![
            (200, swaps_body(first)),
            (200, swaps_body(second)),
        ])
        .await;

        let events = client_for(url)
            .fetch_swaps("0xB4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc", &window())
            .await
            .unwrap();

        assert_eq!(events.len(), 1002);
        let ids: HashSet<String> = events
            .iter()
            .filter_map(|e| match &e.kind {
                PoolEventKind::Swap(swap) => Some(swap.id.clone()),
                PoolEventKind::Reserves(_) => None,
            })
            .collect();
        assert_eq!(ids.len(), 1002);

        let requests = log.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains("0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc"));
        assert!(requests[1].contains("timestamp_gte: 500"));
    }

    #[tokio::test]
    async fn test_fetch_swaps_stops_on_empty_page() {
        let (url, log) = test_server::serve(vec![(200, swaps_body(vec![]))]).await;

        let events = client_for(url).fetch_swaps("0xpool", &window()).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_swaps_surfaces_graph_errors() {
        let body = r#"{ "errors": [ { "message": "bad indexers" } ] }"#.to_string();
        let (url, _log) = test_server::serve(vec![(200, body)]).await;

        let err = client_for(url).fetch_swaps("0xpool", &window()).await.unwrap_err();
        assert!(matches!(err, Error::Api { status: None, .. }));
    }

    #[tokio::test]
    async fn test_fetch_hourly_reserves_pages_with_skip() {
        let page = json!({
            "data": {
                "pairHourDatas": [
                    { "hourStartUnix": 3600, "reserve0": "40000000", "reserve1": "20000" },
                    { "hourStartUnix": 7200, "reserve0": "39000000", "reserve1": "20500" }
                ]
            }
        })
        .to_string();
        let empty = json!({ "data": { "pairHourDatas": [] } }).to_string();
        let (url, log) = test_server::serve(vec![(200, page), (200, empty)]).await;

        let events = client_for(url)
            .fetch_hourly_reserves("0xpool", &window())
            .await
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].timestamp.timestamp(), 7200);
        let requests = log.lock().unwrap().clone();
        assert!(requests[0].contains("skip: 0"));
        assert!(requests[1].contains("skip: 1000"));
    }
}
