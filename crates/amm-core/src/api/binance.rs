//! Binance spot klines client.

use super::{build_http_client, send_with_retry, CursorStep, RetryPolicy};
use crate::config::BinanceConfig;
use crate::types::{Candle, TimeWindow};
use crate::{Error, Result};
use chrono::DateTime;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Binance REST client for historical candles.
pub struct BinanceClient {
    base_url: String,
    symbol: String,
    interval: String,
    http_client: reqwest::Client,
    retry: RetryPolicy,
}

impl BinanceClient {
    /// Maximum klines per request accepted by the exchange.
    pub const PAGE_LIMIT: usize = 1000;

    pub fn new(config: &BinanceConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            symbol: normalize_symbol(&config.symbol),
            interval: config.interval.clone(),
            http_client: build_http_client()?,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Fetch every candle opening inside `window`, paging forward by open time.
    pub async fn fetch_candles(&self, window: &TimeWindow) -> Result<Vec<Candle>> {
        let end = window.end_millis();
        let mut since = window.start_millis();
        let mut candles: Vec<Candle> = Vec::new();
        let mut pages = 0u32;

        loop {
            let page = self.fetch_page(since, end).await?;
            pages += 1;
            let Some(last) = page.last() else {
                break;
            };
            let last_ts = last.open_time.timestamp_millis();
            debug!(page = pages, count = page.len(), last_ts, "Fetched kline page");
            candles.extend(page);

            match next_since(since, last_ts, end) {
                CursorStep::Next(next) => since = next,
                CursorStep::Done => break,
                CursorStep::Stalled => {
                    warn!(page = pages, since, last_ts, "No forward progress in kline pagination");
                    break;
                }
            }
        }

        candles.retain(|c| c.open_time.timestamp_millis() <= end);

        info!(
            symbol = %self.symbol,
            interval = %self.interval,
            total = candles.len(),
            pages,
            "Fetched candles from Binance"
        );
        Ok(candles)
    }

    async fn fetch_page(&self, since: i64, end: i64) -> Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let limit = Self::PAGE_LIMIT.to_string();
        let since = since.to_string();
        let end = end.to_string();
        let request = self.http_client.get(&url).query(&[
            ("symbol", self.symbol.as_str()),
            ("interval", self.interval.as_str()),
            ("startTime", since.as_str()),
            ("endTime", end.as_str()),
            ("limit", limit.as_str()),
        ]);

        let response = send_with_retry(request, &self.retry).await?;
        let rows: Vec<Vec<Value>> = response.json().await?;
        rows.iter().map(|row| parse_kline(row)).collect()
    }
}

/// `ETH/USDC` and `ETHUSDC` both map to the exchange's `ETHUSDC`.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.replace(['/', '-'], "").to_ascii_uppercase()
}

/// Cursor for the next page. A page ending on the cursor itself is the tail
/// of the series; one ending before it would move the cursor backwards.
fn next_since(since: i64, last_ts: i64, end: i64) -> CursorStep {
    if last_ts < since {
        CursorStep::Stalled
    } else if last_ts >= end || last_ts == since {
        CursorStep::Done
    } else {
        CursorStep::Next(last_ts + 1)
    }
}

/// Parse one kline row: `[open_time, open, high, low, close, volume, ...]`.
/// Prices arrive as decimal strings.
fn parse_kline(row: &[Value]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(Error::parse("kline", Value::Array(row.to_vec()).to_string()));
    }

    let open_ms = row[0]
        .as_i64()
        .ok_or_else(|| Error::parse("kline open time", row[0].to_string()))?;
    let open_time = DateTime::from_timestamp_millis(open_ms)
        .ok_or_else(|| Error::parse("kline open time", open_ms.to_string()))?;

    Ok(Candle {
        open_time,
        open: number_field(&row[1], "kline open")?,
        high: number_field(&row[2], "kline high")?,
        low: number_field(&row[3], "kline low")?,
        close: number_field(&row[4], "kline close")?,
        volume: number_field(&row[5], "kline volume")?,
    })
}

fn number_field(value: &Value, field: &'static str) -> Result<f64> {
    match value {
        Value::String(s) => s.parse().map_err(|_| Error::parse(field, s.clone())),
        Value::Number(n) => n.as_f64().ok_or_else(|| Error::parse(field, n.to_string())),
        other => Err(Error::parse(field, other.to_string())),
    }
}
