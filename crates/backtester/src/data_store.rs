//! Input sources for the backtest and CSV persistence of inputs and results.

use amm_core::api::{BinanceClient, SubgraphClient};
use amm_core::config::PoolSeriesKind;
use amm_core::types::{
    Candle, PoolEvent, PoolEventKind, PricePoint, Reserves, Swap, TimeWindow,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::portfolio::PortfolioRow;

/// Provider of the reference price series.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_prices(&self, window: &TimeWindow) -> Result<Vec<PricePoint>>;
}

/// Provider of the pool-event series that defines the timeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PoolEventSource: Send + Sync {
    async fn fetch_events(&self, window: &TimeWindow) -> Result<Vec<PoolEvent>>;
}

#[async_trait]
impl PriceSource for BinanceClient {
    async fn fetch_prices(&self, window: &TimeWindow) -> Result<Vec<PricePoint>> {
        let candles = self
            .fetch_candles(window)
            .await
            .with_context(|| format!("fetching {} candles", self.symbol()))?;
        Ok(candles.iter().map(PricePoint::from).collect())
    }
}

/// Subgraph-backed pool events for one pair.
pub struct SubgraphPoolSource {
    client: SubgraphClient,
    pool_address: String,
    series: PoolSeriesKind,
}

impl SubgraphPoolSource {
    pub fn new(client: SubgraphClient, pool_address: impl Into<String>, series: PoolSeriesKind) -> Self {
        Self {
            client,
            pool_address: pool_address.into(),
            series,
        }
    }
}

#[async_trait]
impl PoolEventSource for SubgraphPoolSource {
    async fn fetch_events(&self, window: &TimeWindow) -> Result<Vec<PoolEvent>> {
        let events = match self.series {
            PoolSeriesKind::Swaps => self.client.fetch_swaps(&self.pool_address, window).await,
            PoolSeriesKind::HourlyReserves => {
                self.client
                    .fetch_hourly_reserves(&self.pool_address, window)
                    .await
            }
        };
        events.with_context(|| format!("fetching pool events for {}", self.pool_address))
    }
}

/// Flat CSV form of a pool event.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PoolEventRecord {
    timestamp: DateTime<Utc>,
    event_type: String,
    swap_id: Option<String>,
    amount0_in: Option<f64>,
    amount1_in: Option<f64>,
    amount0_out: Option<f64>,
    amount1_out: Option<f64>,
    base_reserve: Option<f64>,
    quote_reserve: Option<f64>,
}

const SWAP: &str = "swap";
const RESERVES: &str = "reserves";

impl PoolEventRecord {
    fn new(timestamp: DateTime<Utc>, kind: &PoolEventKind) -> Self {
        let mut record = Self {
            timestamp,
            event_type: String::new(),
            swap_id: None,
            amount0_in: None,
            amount1_in: None,
            amount0_out: None,
            amount1_out: None,
            base_reserve: None,
            quote_reserve: None,
        };
        match kind {
            PoolEventKind::Swap(swap) => {
                record.event_type = SWAP.to_string();
                record.swap_id = Some(swap.id.clone());
                record.amount0_in = Some(swap.amount0_in);
                record.amount1_in = Some(swap.amount1_in);
                record.amount0_out = Some(swap.amount0_out);
                record.amount1_out = Some(swap.amount1_out);
            }
            PoolEventKind::Reserves(reserves) => {
                record.event_type = RESERVES.to_string();
                record.base_reserve = Some(reserves.base_reserve);
                record.quote_reserve = Some(reserves.quote_reserve);
            }
        }
        record
    }

    fn into_event(self) -> Result<PoolEvent> {
        let missing = |field: &str| anyhow!("{} row at {} has no {}", self.event_type, self.timestamp, field);
        let kind = match self.event_type.as_str() {
            SWAP => PoolEventKind::Swap(Swap {
                id: self.swap_id.clone().unwrap_or_default(),
                amount0_in: self.amount0_in.ok_or_else(|| missing("amount0_in"))?,
                amount1_in: self.amount1_in.ok_or_else(|| missing("amount1_in"))?,
                amount0_out: self.amount0_out.ok_or_else(|| missing("amount0_out"))?,
                amount1_out: self.amount1_out.ok_or_else(|| missing("amount1_out"))?,
            }),
            RESERVES => PoolEventKind::Reserves(Reserves {
                base_reserve: self.base_reserve.ok_or_else(|| missing("base_reserve"))?,
                quote_reserve: self.quote_reserve.ok_or_else(|| missing("quote_reserve"))?,
            }),
            other => return Err(anyhow!("unknown pool event type {:?}", other)),
        };
        Ok(PoolEvent {
            timestamp: self.timestamp,
            kind,
        })
    }
}

/// Flat CSV form of a result row.
#[derive(Debug, Clone, Serialize)]
struct ResultRecord {
    timestamp: DateTime<Utc>,
    eth_price: f64,
    event_type: String,
    swap_id: Option<String>,
    amount0_in: Option<f64>,
    amount1_in: Option<f64>,
    amount0_out: Option<f64>,
    amount1_out: Option<f64>,
    base_reserve: Option<f64>,
    quote_reserve: Option<f64>,
    lp_value: f64,
    hold_value: f64,
    il_pct: f64,
    hedge_desired: f64,
    hedge_position: f64,
    hedge_cost: f64,
    cumulative_hedge_cost: f64,
    cumulative_hedge_pnl: f64,
    investor_portfolio: f64,
    lp_value_norm: f64,
    hold_value_norm: f64,
    investor_portfolio_norm: f64,
}

impl From<&PortfolioRow> for ResultRecord {
    fn from(row: &PortfolioRow) -> Self {
        let event = PoolEventRecord::new(row.timestamp, &row.event);
        Self {
            timestamp: row.timestamp,
            eth_price: row.price,
            event_type: event.event_type,
            swap_id: event.swap_id,
            amount0_in: event.amount0_in,
            amount1_in: event.amount1_in,
            amount0_out: event.amount0_out,
            amount1_out: event.amount1_out,
            base_reserve: event.base_reserve,
            quote_reserve: event.quote_reserve,
            lp_value: row.lp_value,
            hold_value: row.hold_value,
            il_pct: row.il_pct,
            hedge_desired: row.hedge_desired,
            hedge_position: row.hedge_position,
            hedge_cost: row.hedge_cost,
            cumulative_hedge_cost: row.cumulative_hedge_cost,
            cumulative_hedge_pnl: row.cumulative_hedge_pnl,
            investor_portfolio: row.investor_portfolio,
            lp_value_norm: row.lp_value_norm,
            hold_value_norm: row.hold_value_norm,
            investor_portfolio_norm: row.investor_portfolio_norm,
        }
    }
}

/// CSV files for fetched inputs and backtest results, under one directory.
///
/// Also serves as an offline [`PriceSource`] / [`PoolEventSource`] replaying
/// previously saved inputs.
#[derive(Debug, Clone)]
pub struct CsvStore {
    dir: PathBuf,
}

impl CsvStore {
    pub const CANDLES_FILE: &'static str = "eth_candles.csv";
    pub const POOL_FILE: &'static str = "uniswap_pool_data.csv";
    pub const RESULTS_FILE: &'static str = "backtest_results.csv";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn save_candles(&self, candles: &[Candle]) -> Result<PathBuf> {
        let path = self.create(Self::CANDLES_FILE)?;
        write_candles(File::create(&path)?, candles)?;
        info!(path = %path.display(), count = candles.len(), "Saved candles");
        Ok(path)
    }

    pub fn save_pool_events(&self, events: &[PoolEvent]) -> Result<PathBuf> {
        let path = self.create(Self::POOL_FILE)?;
        write_pool_events(File::create(&path)?, events)?;
        info!(path = %path.display(), count = events.len(), "Saved pool events");
        Ok(path)
    }

    pub fn save_results(&self, rows: &[PortfolioRow]) -> Result<PathBuf> {
        let path = self.create(Self::RESULTS_FILE)?;
        write_results(File::create(&path)?, rows)?;
        info!(path = %path.display(), count = rows.len(), "Saved backtest results");
        Ok(path)
    }

    pub fn load_candles(&self) -> Result<Vec<Candle>> {
        let path = self.path(Self::CANDLES_FILE);
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        read_candles(file).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn load_pool_events(&self) -> Result<Vec<PoolEvent>> {
        let path = self.path(Self::POOL_FILE);
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        read_pool_events(file).with_context(|| format!("parsing {}", path.display()))
    }

    fn create(&self, file: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        Ok(self.path(file))
    }
}

#[async_trait]
impl PriceSource for CsvStore {
    async fn fetch_prices(&self, window: &TimeWindow) -> Result<Vec<PricePoint>> {
        let prices: Vec<PricePoint> = self
            .load_candles()?
            .iter()
            .filter(|c| window.contains(c.open_time))
            .map(PricePoint::from)
            .collect();
        debug!(count = prices.len(), "Loaded prices from CSV");
        Ok(prices)
    }
}

#[async_trait]
impl PoolEventSource for CsvStore {
    async fn fetch_events(&self, window: &TimeWindow) -> Result<Vec<PoolEvent>> {
        let mut events = self.load_pool_events()?;
        events.retain(|e| window.contains(e.timestamp));
        debug!(count = events.len(), "Loaded pool events from CSV");
        Ok(events)
    }
}

pub fn write_candles<W: Write>(writer: W, candles: &[Candle]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for candle in candles {
        csv.serialize(candle)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn read_candles<R: Read>(reader: R) -> Result<Vec<Candle>> {
    let mut csv = csv::Reader::from_reader(reader);
    let candles = csv
        .deserialize::<Candle>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(candles)
}

pub fn write_pool_events<W: Write>(writer: W, events: &[PoolEvent]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for event in events {
        csv.serialize(PoolEventRecord::new(event.timestamp, &event.kind))?;
    }
    csv.flush()?;
    Ok(())
}

pub fn read_pool_events<R: Read>(reader: R) -> Result<Vec<PoolEvent>> {
    let mut csv = csv::Reader::from_reader(reader);
    csv.deserialize::<PoolEventRecord>()
        .map(|record| record?.into_event())
        .collect()
}

pub fn write_results<W: Write>(writer: W, rows: &[PortfolioRow]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in rows {
        csv.serialize(ResultRecord::from(row))?;
    }
    csv.flush()?;
    Ok(())
}
