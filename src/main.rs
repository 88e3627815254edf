use anyhow::Context;
use basketbot::api::{BinanceClient, MarketData, PaperGateway, SyntheticFeed};
use basketbot::config::EngineConfig;
use basketbot::execution::BasketEngine;
use basketbot::models::{BasketConfig, EntryConfig, ExecutionEvent};
use basketbot::persistence::{JsonFileStore, RedisStore, RegistrySnapshot, SnapshotStore};
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

const SYNTHETIC_SEED: u64 = 42;
const SYNTHETIC_BASE_PRICE: f64 = 100.0;
const SYNTHETIC_VOLATILITY: f64 = 0.002;

#[derive(Parser)]
#[command(name = "basketbot", about = "Conditional basket order execution engine")]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create and activate strategies, then run them against the paper gateway
    Run {
        /// JSON array of basket configurations
        #[arg(long)]
        baskets: Option<PathBuf>,

        /// JSON array of entry configurations
        #[arg(long)]
        entries: Option<PathBuf>,

        /// Market data source
        #[arg(long, value_enum, default_value_t = Feed::Synthetic)]
        feed: Feed,
    },
    /// Print the persisted baskets and entries
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum Feed {
    Binance,
    Synthetic,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Run {
            baskets,
            entries,
            feed,
        } => run(config, baskets.as_deref(), entries.as_deref(), feed).await,
        Command::List => list(config).await,
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("basketbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn create_store(config: &EngineConfig) -> anyhow::Result<Arc<dyn SnapshotStore>> {
    match &config.redis_url {
        Some(url) => {
            let store = RedisStore::new(url)
                .await
                .with_context(|| format!("connecting to Redis at {}", url))?;
            tracing::info!("Redis persistence enabled at {}", url);
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("File persistence at {}", config.snapshot_path);
            Ok(Arc::new(JsonFileStore::new(&config.snapshot_path)))
        }
    }
}

fn create_feed(config: &EngineConfig, feed: Feed) -> anyhow::Result<Arc<dyn MarketData>> {
    match feed {
        Feed::Binance => {
            let client = BinanceClient::new(&config.market_data_url, config.market_data_rpm)?;
            tracing::info!("📡 Market data from {}", config.market_data_url);
            Ok(Arc::new(client))
        }
        Feed::Synthetic => {
            tracing::info!("📡 Synthetic market data (seed {})", SYNTHETIC_SEED);
            Ok(Arc::new(SyntheticFeed::new(
                SYNTHETIC_SEED,
                SYNTHETIC_BASE_PRICE,
                SYNTHETIC_VOLATILITY,
            )))
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

// ============================================================================
// Commands
// ============================================================================

async fn run(
    config: EngineConfig,
    baskets: Option<&Path>,
    entries: Option<&Path>,
    feed: Feed,
) -> anyhow::Result<()> {
    tracing::info!("🚀 BasketBot starting");

    let store = create_store(&config).await?;
    let market_data = create_feed(&config, feed)?;
    let gateway = Arc::new(PaperGateway::with_feed(market_data.clone()));

    let engine = BasketEngine::new(market_data, gateway, store, config).await?;
    let printer = tokio::spawn(print_events(engine.subscribe()));

    let resumed = engine.start();
    tracing::info!("Resumed {} live strategies", resumed);

    if let Some(path) = baskets {
        let configs: Vec<BasketConfig> = read_json(path)?;
        for config in configs {
            let symbol = config.symbol.clone();
            match engine.create(config).await {
                Ok(id) => {
                    if let Err(e) = engine.activate(id).await {
                        tracing::error!(basket = %id, "Activation failed: {}", e);
                    }
                }
                Err(e) => tracing::error!(symbol = %symbol, "Rejected basket: {}", e),
            }
        }
    }

    if let Some(path) = entries {
        let configs: Vec<EntryConfig> = read_json(path)?;
        for config in configs {
            let symbol = config.symbol.clone();
            if let Err(e) = engine.create_entry(config).await {
                tracing::error!(symbol = %symbol, "Rejected entry: {}", e);
            }
        }
    }

    tracing::info!("\nPress Ctrl+C to stop...\n");
    tokio::signal::ctrl_c().await?;
    tracing::info!("⚠️  Received Ctrl+C, shutting down...");

    engine.shutdown();
    printer.abort();

    tracing::info!("👋 BasketBot stopped");
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<ExecutionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                tracing::info!(
                    entity = %event.entity_id,
                    kind = ?event.kind,
                    order_id = ?event.order_id,
                    "{:?}: {}",
                    event.action,
                    event.details
                );
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!("Event printer lagged, {} events missed", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn list(config: EngineConfig) -> anyhow::Result<()> {
    let store = create_store(&config).await?;
    let snapshot = store.load_snapshot().await?.unwrap_or_default();
    print_snapshot(&snapshot);
    Ok(())
}

fn print_snapshot(snapshot: &RegistrySnapshot) {
    if snapshot.is_empty() {
        println!("No baskets or entries persisted");
        return;
    }

    println!("\n📊 Baskets ({})", snapshot.baskets.len());
    for basket in &snapshot.baskets {
        println!(
            "  {}  {:<10} {:<5} {:<9} qty {:<10} chases {}/{}  tp {}/{}",
            basket.id,
            basket.symbol,
            basket.side.to_string(),
            format!("{:?}", basket.status),
            basket.entry_order.quantity,
            basket.limit_chaser.chase_count,
            basket.limit_chaser.max_chases,
            basket.take_profits.iter().filter(|l| !l.enabled).count(),
            basket.take_profits.len(),
        );
    }

    println!("\n📈 Entries ({})", snapshot.entries.len());
    for entry in &snapshot.entries {
        println!(
            "  {}  {:<10} {:<5} {:<9} qty {:<10} chases {}/{}  last {}",
            entry.id,
            entry.symbol,
            entry.side.to_string(),
            format!("{:?}", entry.status),
            entry.params.quantity(),
            entry.chase_count,
            entry.max_chases,
            entry
                .last_price
                .map(|p| format!("{:.4}", p))
                .unwrap_or_else(|| "-".to_string()),
        );
    }
}
