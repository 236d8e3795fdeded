//! Whale Sentinel
//!
//! Whale transfer flow monitoring and sentiment scoring daemon.

use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use whale_sentinel::{
    aggregator::WindowAggregator,
    alerts::CooldownStore,
    classifier,
    config::Config,
    scheduler::Scheduler,
    scorer::SentimentScorer,
    store::{EventSource, HttpMarketData, MarketDataSource, SentinelStore, SnapshotSink},
    types::{SymbolFilter, Timeframe},
};

#[derive(Parser)]
#[command(name = "whale-sentinel")]
#[command(about = "Whale transfer flow monitoring and sentiment alerts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the evaluation loop
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Show current window aggregates from the store
    Windows {
        /// Timeframe (1h, 4h, 8h, 12h, 1d)
        #[arg(short, long, default_value = "1h")]
        timeframe: String,
        /// Restrict to one symbol instead of the combined window
        #[arg(short, long)]
        symbol: Option<String>,
    },
    /// Compute a one-off sentiment score
    Score {
        /// Timeframe (1h, 4h, 8h, 12h, 1d)
        #[arg(short, long, default_value = "1h")]
        timeframe: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = if Path::new(&cli.config).exists() {
        Config::load(&cli.config)?
    } else {
        tracing::warn!("{} not found, using built-in defaults", cli.config);
        Config::default()
    };

    match cli.command {
        Commands::Run { once } => run(config, once).await,
        Commands::Windows { timeframe, symbol } => {
            show_windows(config, &timeframe, symbol.as_deref()).await
        }
        Commands::Score { timeframe } => show_score(config, &timeframe).await,
    }
}

async fn run(config: Config, once: bool) -> anyhow::Result<()> {
    let store = Arc::new(SentinelStore::connect(&config.database.path).await?);
    let market = Arc::new(HttpMarketData::new(&config.market.base_url));

    let scheduler = Scheduler::new(
        &config,
        store.clone() as Arc<dyn EventSource>,
        market as Arc<dyn MarketDataSource>,
        store.clone() as Arc<dyn SnapshotSink>,
        store as Arc<dyn CooldownStore>,
    );

    if once {
        let report = scheduler.run_cycle().await?;
        println!(
            "cycle complete: {} fetched, {} dropped, {} windows, {} snapshots, {} alerts",
            report.fetched,
            report.dropped_malformed,
            report.windows,
            report.snapshots,
            report.alerts
        );
        return Ok(());
    }

    scheduler.run().await?;
    Ok(())
}

async fn show_windows(config: Config, timeframe: &str, symbol: Option<&str>) -> anyhow::Result<()> {
    let timeframe: Timeframe = timeframe.parse()?;
    let filter = match symbol {
        Some(s) => SymbolFilter::symbol(s),
        None => SymbolFilter::All,
    };

    let store = SentinelStore::connect(&config.database.path).await?;
    let aggregator = WindowAggregator::new(config.aggregator.clone());

    let now = chrono::Utc::now();
    let since = aggregator.fetch_cutoff(timeframe, now);
    let raw = store
        .fetch_transfers(&SymbolFilter::All, aggregator.min_whale_usd(), since)
        .await?;
    let events: Vec<_> = raw.iter().filter_map(classifier::normalize).collect();
    let window = aggregator.aggregate(&filter, timeframe, &events, now);

    println!("\n🐋 Window {} / {}\n", window.symbol, window.timeframe);
    println!("{:<22} {:>14}", "whales (directional)", window.whale_count);
    println!("{:<22} {:>14}", "inflows", window.inflow_count);
    println!("{:<22} {:>14}", "outflows", window.outflow_count);
    println!("{:<22} {:>14}", "exchange-to-exchange", window.exchange_count);
    println!("{:<22} {:>14}", "internal", window.internal_count);
    println!("{:<22} {:>14}", "defi", window.defi_count);
    println!("{:<22} {:>14}", "buy volume (USD)", window.buy_volume_usd);
    println!("{:<22} {:>14}", "sell volume (USD)", window.sell_volume_usd);
    println!("{:<22} {:>14}", "total volume (USD)", window.total_volume_usd);
    println!("{:<22} {:>14.4}", "flow imbalance", window.flow_imbalance());

    Ok(())
}

async fn show_score(config: Config, timeframe: &str) -> anyhow::Result<()> {
    let timeframe: Timeframe = timeframe.parse()?;

    let store = SentinelStore::connect(&config.database.path).await?;
    let market = HttpMarketData::new(&config.market.base_url);
    let aggregator = WindowAggregator::new(config.aggregator.clone());
    let scorer = SentimentScorer::new(config.scorer.clone());

    let now = chrono::Utc::now();
    let since = aggregator.fetch_cutoff(timeframe, now);
    let raw = store
        .fetch_transfers(&SymbolFilter::All, aggregator.min_whale_usd(), since)
        .await?;
    let events: Vec<_> = raw.iter().filter_map(classifier::normalize).collect();
    let window = aggregator.aggregate(&SymbolFilter::All, timeframe, &events, now);

    let snapshot_market = match market.fetch_market_snapshot(timeframe).await {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!("market fetch failed: {}", e);
            None
        }
    };

    match scorer.score(timeframe, snapshot_market, &window, now) {
        Some(snapshot) => {
            println!("\n📊 SWSI {} @ {}\n", snapshot.timeframe, snapshot.created_at);
            println!("{:<16} {:>10.4}", "global change", snapshot.global_change);
            println!("{:<16} {:>10.4}", "coins change", snapshot.coins_change);
            println!("{:<16} {:>10.4}", "volume change", snapshot.volume_change);
            println!("{:<16} {:>10.4}", "whale weight", snapshot.whale_weight);
            println!("{:<16} {:>10.4}", "SWSI", snapshot.swsi_score);
            println!("{:<16} {:>9.1}%", "bull", snapshot.bull_ratio * 100.0);
            println!("{:<16} {:>9.1}%", "bear", snapshot.bear_ratio * 100.0);
            if snapshot.is_stale() {
                println!("\n⚠ stale components: {:?}", snapshot.stale_components);
            }
        }
        None => println!("no market data available, score skipped"),
    }

    Ok(())
}
