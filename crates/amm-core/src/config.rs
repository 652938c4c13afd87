//! Configuration management for the LP hedge backtester.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `LP_HEDGE_*` environment variables (nested keys separated by `__`, e.g.
//! `LP_HEDGE_STRATEGY__FEE_RATE=0.0005`).

use crate::types::TimeWindow;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "LP_HEDGE";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub binance: BinanceConfig,
    pub subgraph: SubgraphConfig,
    pub window: TimeWindow,
    pub strategy: StrategyConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinanceConfig {
    pub base_url: String,
    /// Pair symbol, either `ETH/USDC` or `ETHUSDC`.
    pub symbol: String,
    pub interval: String,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            symbol: "ETH/USDC".to_string(),
            interval: "15m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubgraphConfig {
    pub gateway_url: String,
    /// The Graph gateway key. Requests go to the bare gateway URL without it.
    pub api_key: Option<String>,
    pub subgraph_id: String,
    pub pool_address: String,
    pub series: PoolSeriesKind,
}

impl SubgraphConfig {
    /// Full GraphQL endpoint for the configured subgraph.
    pub fn endpoint(&self) -> String {
        let gateway = self.gateway_url.trim_end_matches('/');
        match self.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => format!("{}/{}/subgraphs/id/{}", gateway, key, self.subgraph_id),
            None => format!("{}/subgraphs/id/{}", gateway, self.subgraph_id),
        }
    }
}

impl Default for SubgraphConfig {
    fn default() -> Self {
        Self {
            gateway_url: "https://gateway.thegraph.com/api".to_string(),
            api_key: None,
            subgraph_id: "A3Np3RQbaBA6oKJgiwDJeo5T3zrYfGHPWFYayMwtNDum".to_string(),
            pool_address: "0xB4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc".to_string(),
            series: PoolSeriesKind::Swaps,
        }
    }
}

/// Which pool records define the backtest timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolSeriesKind {
    /// Every swap against the pair.
    Swaps,
    /// One reserve snapshot per hour.
    HourlyReserves,
}

/// Hedge strategy and pool-model parameters. One immutable instance is passed
/// into the simulation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Constant product `x * y` of the modeled position.
    pub k: f64,
    /// Unpooled baseline the LP position is compared against.
    pub initial_holding: InitialHolding,
    /// Impermanent loss (percent) above which the hedge is switched on.
    pub il_threshold_pct: f64,
    /// Fraction of the pool's base exposure to short. Conventionally in
    /// `[0, 1]`, not enforced.
    pub hedge_fraction: f64,
    /// Flat fee charged on the notional of every hedge adjustment.
    pub fee_rate: f64,
    /// What to do with pool events that precede the first price point.
    pub leading_price_policy: LeadingPricePolicy,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            k: 50_000.0,
            initial_holding: InitialHolding::default(),
            il_threshold_pct: 3.0,
            hedge_fraction: 0.5,
            fee_rate: 0.001,
            leading_price_policy: LeadingPricePolicy::default(),
        }
    }
}

/// Initial unpooled holding `(x0, y0)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialHolding {
    /// Base asset units (ETH).
    pub base: f64,
    /// Quote asset units (USDC).
    pub quote: f64,
}

impl Default for InitialHolding {
    fn default() -> Self {
        Self {
            base: 5.0,
            quote: 10_000.0,
        }
    }
}

/// Handling of pool events that occur before any reference price is known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadingPricePolicy {
    /// Fail the run with `MissingReferenceData`.
    #[default]
    Reject,
    /// Skip the unresolved events.
    Drop,
    /// Bind them to the first available price.
    Backfill,
}

impl std::str::FromStr for LeadingPricePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "drop" => Ok(Self::Drop),
            "backfill" => Ok(Self::Backfill),
            other => Err(Error::Config {
                message: format!("unknown leading price policy: {}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file and the environment.
    #[allow(clippy::result_large_err)]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the simulation cannot run with.
    pub fn validate(&self) -> Result<()> {
        let strategy = &self.strategy;
        if !(strategy.k.is_finite() && strategy.k > 0.0) {
            return Err(config_error(format!("strategy.k must be positive, got {}", strategy.k)));
        }
        if !(strategy.fee_rate.is_finite() && strategy.fee_rate >= 0.0) {
            return Err(config_error(format!(
                "strategy.fee_rate must be non-negative, got {}",
                strategy.fee_rate
            )));
        }
        if !strategy.il_threshold_pct.is_finite() {
            return Err(config_error("strategy.il_threshold_pct must be finite"));
        }
        if self.window.end <= self.window.start {
            return Err(config_error(format!(
                "window.end ({}) must be after window.start ({})",
                self.window.end, self.window.start
            )));
        }
        if self.subgraph.pool_address.trim().is_empty() {
            return Err(config_error("subgraph.pool_address is empty"));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> Error {
    Error::Config {
        message: message.into(),
    }
}
