//! LP Backtest
//!
//! Fetches ETH/USDC reference prices and Uniswap pool events, runs the
//! impermanent-loss hedge backtest, and writes the result table as CSV.
//!
//! Subcommands:
//!   - `fetch` downloads both input series into the CSV store
//!   - `run` backtests live sources, or the CSV store with `--offline`

use std::path::PathBuf;

use amm_core::api::{BinanceClient, SubgraphClient};
use amm_core::config::{Config, LeadingPricePolicy};
use amm_core::types::TimeWindow;
use anyhow::{Context, Result};
use backtester::data_store::SubgraphPoolSource;
use backtester::{BacktestOutput, BacktestSimulator, CsvStore, PoolEventSource};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "lp-backtest",
    version,
    about = "Backtest a constant-product LP position with a threshold delta hedge"
)]
struct Cli {
    /// TOML configuration file; LP_HEDGE_* environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Window start (RFC3339), overrides the configured window
    #[arg(long, global = true)]
    start: Option<DateTime<Utc>>,

    /// Window end (RFC3339), overrides the configured window
    #[arg(long, global = true)]
    end: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download prices and pool events into the CSV store
    Fetch,
    /// Run the backtest and write the result table
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Replay inputs previously saved by `fetch` instead of calling the APIs
    #[arg(long, default_value_t = false)]
    offline: bool,

    /// Handling of pool events older than the first price: reject, drop or backfill
    #[arg(long, value_parser = parse_policy)]
    policy: Option<LeadingPricePolicy>,
}

fn parse_policy(s: &str) -> std::result::Result<LeadingPricePolicy, String> {
    s.parse().map_err(|e: amm_core::Error| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lp_backtest=info,backtester=info,amm_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(start) = cli.start {
        config.window.start = start;
    }
    if let Some(end) = cli.end {
        config.window.end = end;
    }
    if let Command::Run(RunArgs {
        policy: Some(policy),
        ..
    }) = &cli.command
    {
        config.strategy.leading_price_policy = *policy;
    }
    config.validate().context("Invalid configuration")?;

    let store = CsvStore::new(&config.output.dir);
    let window = config.window;

    match cli.command {
        Command::Fetch => fetch(&config, &store, &window).await,
        Command::Run(args) => {
            let output = if args.offline {
                info!(dir = %store.dir().display(), "Replaying saved inputs");
                BacktestSimulator::new(config.strategy.clone(), store.clone(), store.clone())
                    .run(&window)
                    .await?
            } else {
                let (prices, events) = live_sources(&config)?;
                BacktestSimulator::new(config.strategy.clone(), prices, events)
                    .run(&window)
                    .await?
            };
            report(&store, &output)
        }
    }
}

fn live_sources(config: &Config) -> Result<(BinanceClient, SubgraphPoolSource)> {
    let binance = BinanceClient::new(&config.binance).context("Failed to build exchange client")?;
    let subgraph = SubgraphClient::new(&config.subgraph).context("Failed to build subgraph client")?;
    let pool = SubgraphPoolSource::new(
        subgraph,
        config.subgraph.pool_address.clone(),
        config.subgraph.series,
    );
    Ok((binance, pool))
}

async fn fetch(config: &Config, store: &CsvStore, window: &TimeWindow) -> Result<()> {
    let (binance, pool) = live_sources(config)?;

    info!(
        symbol = binance.symbol(),
        pool = %config.subgraph.pool_address,
        start = %window.start,
        end = %window.end,
        "Fetching input series"
    );

    let (candles, events) = tokio::try_join!(
        async {
            binance
                .fetch_candles(window)
                .await
                .context("Failed to fetch candles")
        },
        pool.fetch_events(window),
    )?;

    store.save_candles(&candles)?;
    store.save_pool_events(&events)?;
    Ok(())
}

fn report(store: &CsvStore, output: &BacktestOutput) -> Result<()> {
    let path = store.save_results(&output.rows)?;
    let summary = &output.summary;

    info!(
        path = %path.display(),
        max_il_pct = summary.max_il_pct,
        total_hedge_cost = summary.total_hedge_cost,
        total_hedge_pnl = summary.total_hedge_pnl,
        max_drawdown = summary.max_drawdown,
        hedge_helped = summary.hedge_helped(),
        beat_hold = summary.beat_hold(),
        "Results written"
    );

    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
