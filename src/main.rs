//! Trade engine entry point
//!
//! 1. Loads `.env` and `config.yaml` (env overrides applied)
//! 2. Picks the Supabase store, or the in-memory store for dry runs
//! 3. Starts the engine
//! 4. Reads JSON-line signals from stdin until Ctrl+C
//!
//! Signal line format:
//! `{"symbol":"BTCUSDT","side":"long","entry_price":"50000"}`

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

use trade_engine::adapters::RestAdapterFactory;
use trade_engine::config::{self, constants, SupabaseConfig};
use trade_engine::core::init_logging;
use trade_engine::domain::{Exchange, Side, Signal};
use trade_engine::sentiment::FearGreedClient;
use trade_engine::store::{DirectorySource, MemoryStore, OperationStore, SupabaseStore};
use trade_engine::{EngineDeps, TradingEngine};

#[derive(Debug, Deserialize)]
struct SignalLine {
    symbol: String,
    side: Side,
    entry_price: Decimal,
    #[serde(default)]
    exchange: Option<Exchange>,
    #[serde(default)]
    source: Option<String>,
}

impl From<SignalLine> for Signal {
    fn from(line: SignalLine) -> Self {
        let mut signal = Signal::new(&line.symbol, line.side, line.entry_price);
        signal.exchange = line.exchange;
        signal.source = line.source;
        signal
    }
}

async fn build_stores() -> anyhow::Result<(Arc<dyn OperationStore>, Arc<dyn DirectorySource>)> {
    let supabase = SupabaseConfig::from_env()?;
    match supabase {
        Some(cfg) if !constants::dry_run() => {
            info!(url = %cfg.url, "[STORE] Using Supabase store");
            let store = Arc::new(SupabaseStore::new(&cfg)?);
            Ok((store.clone(), store))
        }
        _ => {
            let store = match constants::seed_directory_path() {
                Some(path) => {
                    info!(path = %path.display(), "[STORE] Using in-memory store seeded from file");
                    MemoryStore::from_seed_file(&path).await?
                }
                None => {
                    warn!("[STORE] Using empty in-memory store; nothing will trade until users are added");
                    MemoryStore::new()
                }
            };
            let store = Arc::new(store);
            Ok((store.clone(), store))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenvy::dotenv().ok();

    init_logging();

    info!("🚀 Trade engine starting...");

    let config_path = constants::config_path();
    let app_config = match config::load_config_or_default(&config_path) {
        Ok(cfg) => cfg.with_env_overrides(),
        Err(e) => {
            error!("[ERROR] Configuration failed: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = app_config.validate() {
        error!("[ERROR] Configuration invalid: {}", e);
        std::process::exit(1);
    }
    constants::log_configuration(&app_config);

    let (store, directory_source) = build_stores().await?;
    let sentiment_source = Arc::new(FearGreedClient::new(
        &app_config.sentiment.url,
        Duration::from_secs(10),
    ));
    let deps = EngineDeps {
        store,
        directory_source,
        factory: Arc::new(RestAdapterFactory::new(app_config.exchanges.clone())),
        sentiment_source,
    };

    let engine = TradingEngine::start(app_config, deps).await?;
    info!("⏳ Engine running. Reading signals from stdin, Ctrl+C to stop.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(err) = result {
                    error!("Failed to listen for Ctrl+C signal: {}", err);
                }
                info!("[SHUTDOWN] Graceful shutdown initiated");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match serde_json::from_str::<SignalLine>(&line) {
                        Ok(parsed) => {
                            if let Err(e) = engine.submit_signal(parsed.into()).await {
                                error!(error = %e, "[ENGINE] Signal rejected");
                            }
                        }
                        Err(e) => warn!(error = %e, "[ENGINE] Ignoring malformed signal line"),
                    },
                    Ok(None) => {
                        info!("Stdin closed, running until Ctrl+C");
                        stdin_open = false;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read stdin, running until Ctrl+C");
                        stdin_open = false;
                    }
                }
            }
        }
    }

    engine.shutdown().await?;
    info!("[SHUTDOWN] Clean exit");
    Ok(())
}
