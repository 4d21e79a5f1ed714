//! zilindex CLI: run and manage the Zilliqa NFT indexer.
//!
//! # Commands
//! ```text
//! zilindex run      [--config FILE] [--rpc URL] [--store URL] [--rewind-to H] [--stop-at H]
//! zilindex rewind   --to H
//! zilindex reindex  --contract ADDR
//! zilindex info
//! ```
//!
//! Any fatal error exits with status 1.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use zilindex_core::address;
use zilindex_core::indexer::IndexerConfig;
use zilindex_storage::{DocumentStore, ElasticStore};
use zilindex_zilliqa::{HttpZilliqaClient, IndexLoop, IndexerBuilder, LogPublisher, RefreshTrigger, Rewinder};

mod logging;
mod settings;

use logging::init_tracing;
use settings::{CommonArgs, Settings};

#[derive(Parser)]
#[command(name = "zilindex", about = "Zilliqa NFT indexer", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewind, catch up, then follow the chain
    Run {
        #[command(flatten)]
        common: CommonArgs,
        /// Rewind to exactly this height on startup
        #[arg(long)]
        rewind_to: Option<u64>,
        /// Exit once this height is indexed
        #[arg(long)]
        stop_at: Option<u64>,
    },

    /// Delete everything above a height and exit
    Rewind {
        #[command(flatten)]
        common: CommonArgs,
        /// Target height
        #[arg(long)]
        to: u64,
    },

    /// Replay the stored history of one NFT contract
    Reindex {
        #[command(flatten)]
        common: CommonArgs,
        /// Contract address (0x hex or zil1 bech32)
        #[arg(long)]
        contract: String,
    },

    /// Print the default configuration
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            common,
            rewind_to,
            stop_at,
        } => cmd_run(&common, rewind_to, stop_at).await,
        Commands::Rewind { common, to } => cmd_rewind(&common, to).await,
        Commands::Reindex { common, contract } => cmd_reindex(&common, &contract).await,
        Commands::Info => cmd_info(),
    }
}

fn init(common: &CommonArgs) -> Result<Settings> {
    let settings = common.settings()?;
    init_tracing(&settings.log);
    Ok(settings)
}

fn open_store(cfg: &IndexerConfig) -> Result<Arc<dyn DocumentStore>> {
    let store = ElasticStore::new(
        &cfg.store_url,
        &cfg.network,
        &cfg.deployment,
        Duration::from_millis(cfg.rpc.timeout_ms),
    )
    .context("creating document store client")?;
    Ok(Arc::new(store))
}

fn build_indexer(cfg: IndexerConfig) -> Result<IndexLoop> {
    let client = HttpZilliqaClient::new(&cfg.rpc_url, cfg.rpc.clone()).context("creating RPC client")?;
    let store = open_store(&cfg)?;
    Ok(IndexerBuilder::from_config(cfg).build(Arc::new(client), store))
}

async fn cmd_run(common: &CommonArgs, rewind_to: Option<u64>, stop_at: Option<u64>) -> Result<()> {
    let mut settings = init(common)?;
    if rewind_to.is_some() {
        settings.indexer.rewind_to = rewind_to;
    }
    if stop_at.is_some() {
        settings.indexer.stop_at = stop_at;
    }
    info!(
        network = %settings.indexer.network,
        deployment = %settings.indexer.deployment,
        rpc = %settings.indexer.rpc_url,
        store = %settings.indexer.store_url,
        "starting zilindex"
    );

    let mut indexer = build_indexer(settings.indexer)?;
    let _trigger = RefreshTrigger::new(Arc::new(LogPublisher)).spawn(indexer.events().subscribe());
    indexer.run().await?;
    Ok(())
}

async fn cmd_rewind(common: &CommonArgs, to: u64) -> Result<()> {
    let settings = init(common)?;
    let cfg = &settings.indexer;
    let store = open_store(cfg)?;
    let last = zilindex_zilliqa::rewind::recover_cursor(store.as_ref()).await?;
    let cursor = Rewinder::new(store, cfg.rewind_margin, cfg.start_height)
        .rewind_to(to, last)
        .await?;
    println!("rewound to {}", cursor.last_indexed().unwrap_or(to));
    Ok(())
}

async fn cmd_reindex(common: &CommonArgs, contract: &str) -> Result<()> {
    let settings = init(common)?;
    let contract = address::normalize(contract).map_err(|e| anyhow!("invalid contract address: {e}"))?;
    let indexer = build_indexer(settings.indexer)?;
    let replayed = indexer.reindex_contract(&contract).await?;
    println!("replayed {replayed} transactions for {contract}");
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("zilindex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Standards: ZRC-1, ZRC-6");
    println!("  Storage backends: Elasticsearch-compatible HTTP, memory (tests)");
    println!("\nDefault configuration:");
    let defaults = Settings::default();
    println!("{}", serde_json::to_string_pretty(&defaults)?);
    Ok(())
}
