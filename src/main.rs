use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use dotenv::dotenv;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use clob_rs::{Account, ClobClient};

use polymarket_bot::config::Config;
use polymarket_bot::lock::InstanceLock;
use polymarket_bot::manager::OrderManager;
use polymarket_bot::monitor::PriceMonitor;
use polymarket_bot::redact::redact;
use polymarket_bot::scanner::MarketScanner;
use polymarket_bot::supervisor::{ShutdownFlag, Supervisor};
use polymarket_bot::ws::task::{run_market_stream, run_user_stream};
use polymarket_bot::ws::StreamHealth;

const EVENT_QUEUE_CAPACITY: usize = 1024;
const CTL_QUEUE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() {
    // Basic logging: set RUST_LOG=info (or debug) to see output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    dotenv().ok();

    match run().await {
        Ok(()) => {}
        Err(e) => {
            error!("Fatal error: {}", redact(&format!("{e:#}")));
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<()> {
    let private_key =
        env::var("POLYMARKET_PRIVATE_KEY").context("POLYMARKET_PRIVATE_KEY not set")?;
    let wallet_address =
        env::var("POLYMARKET_WALLET_ADDRESS").context("POLYMARKET_WALLET_ADDRESS not set")?;

    // Kill any other instance of this bot before touching the exchange.
    let _lock = InstanceLock::acquire()?;

    let cfg = Config::default();

    info!("Initializing CLOB client...");
    let account = Account::new(&private_key, &wallet_address)
        .map_err(|e| anyhow::anyhow!(redact(&e.to_string())))?;
    let mut client = ClobClient::new(account);
    client
        .create_or_derive_api_creds()
        .await
        .map_err(|e| anyhow::anyhow!("deriving API creds: {}", redact(&e.to_string())))?;
    let creds = client
        .api_creds()
        .cloned()
        .context("API creds missing after derivation")?;
    info!("API credentials set");

    let client = Arc::new(client);
    let book_tops = Arc::new(DashMap::new());
    let health = Arc::new(StreamHealth::default());
    let shutdown = Arc::new(ShutdownFlag::default());

    // Event queues (stream workers -> supervisor) and control channels
    // (supervisor -> stream workers).
    let (price_tx, price_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (user_tx, user_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (market_ctl_tx, market_ctl_rx) = mpsc::channel(CTL_QUEUE_CAPACITY);
    let (user_ctl_tx, user_ctl_rx) = mpsc::channel(CTL_QUEUE_CAPACITY);

    let mut stream_tasks = Vec::new();
    if cfg.ws_enabled {
        {
            let cfg = cfg.clone();
            let health = health.clone();
            let book_tops = book_tops.clone();
            stream_tasks.push(tokio::spawn(async move {
                run_market_stream(cfg, health, book_tops, price_tx, market_ctl_rx).await;
            }));
        }
        {
            let cfg = cfg.clone();
            let health = health.clone();
            stream_tasks.push(tokio::spawn(async move {
                run_user_stream(cfg, creds, health, user_tx, user_ctl_rx).await;
            }));
        }
        info!("Stream workers started");
    }

    // Signal listener: SIGINT/SIGTERM trigger cooperative shutdown.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("sigterm handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            info!("Shutdown signal received");
            shutdown.trigger();
        });
    }

    let exchange: Arc<dyn polymarket_bot::exchange::ExchangeApi> = client;
    let manager = OrderManager::new(exchange.clone(), cfg.clone(), book_tops);
    let monitor = PriceMonitor::new(exchange.clone(), cfg.clone());
    let scanner = MarketScanner::new(exchange.clone(), cfg.clone());

    let mut supervisor = Supervisor::new(
        cfg,
        exchange,
        manager,
        monitor,
        scanner,
        price_rx,
        user_rx,
        market_ctl_tx,
        user_ctl_tx,
        health,
        shutdown,
    );
    let result = supervisor.run().await;

    for task in stream_tasks {
        task.abort();
    }
    result
}
