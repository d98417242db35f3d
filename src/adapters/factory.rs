//! Adapter factory for per-credential and market-data adapters
//!
//! Execution and validation need an adapter bound to one user's key; the
//! monitor only needs public prices. The factory hides both behind a trait so
//! tests can inject scripted adapters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::binance::{BinanceCredentials, BinanceFuturesAdapter};
use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::traits::ExchangeAdapter;
use crate::adapters::types::create_http_client;
use crate::config::ExchangesConfig;
use crate::domain::{ApiCredential, Environment, Exchange};

/// Normalize a user-facing symbol ("btc-usdt", "BTC/USDT") to exchange form
pub fn resolve_symbol(exchange: Exchange, symbol: &str) -> String {
    match exchange {
        Exchange::Binance => symbol
            .chars()
            .filter(|c| !matches!(c, '-' | '/' | '_' | ' '))
            .collect::<String>()
            .to_uppercase(),
    }
}

/// Creates adapters on demand
pub trait AdapterFactory: Send + Sync {
    /// Adapter authenticated with `credential`
    fn for_credential(&self, credential: &ApiCredential) -> ExchangeResult<Arc<dyn ExchangeAdapter>>;

    /// Public adapter for price reads
    fn market_data(&self, exchange: Exchange) -> ExchangeResult<Arc<dyn ExchangeAdapter>>;
}

/// Factory backed by the real REST adapters
///
/// One pooled HTTP client per exchange is shared by every adapter it hands out.
pub struct RestAdapterFactory {
    config: ExchangesConfig,
    binance_client: reqwest::Client,
    market_data: HashMap<Exchange, Arc<dyn ExchangeAdapter>>,
}

impl RestAdapterFactory {
    pub fn new(config: ExchangesConfig) -> Self {
        let binance_client = create_http_client(
            "binance",
            Duration::from_secs(config.binance.order_timeout_secs),
        );

        let mut market_data: HashMap<Exchange, Arc<dyn ExchangeAdapter>> = HashMap::new();
        market_data.insert(
            Exchange::Binance,
            Arc::new(BinanceFuturesAdapter::public(
                binance_client.clone(),
                &config.binance.live_url,
                &config.binance,
            )),
        );

        Self {
            config,
            binance_client,
            market_data,
        }
    }

    fn binance_url(&self, environment: Environment) -> &str {
        match environment {
            Environment::Live => &self.config.binance.live_url,
            Environment::Sandbox => &self.config.binance.sandbox_url,
        }
    }
}

impl AdapterFactory for RestAdapterFactory {
    fn for_credential(&self, credential: &ApiCredential) -> ExchangeResult<Arc<dyn ExchangeAdapter>> {
        match credential.exchange {
            Exchange::Binance => Ok(Arc::new(BinanceFuturesAdapter::authenticated(
                self.binance_client.clone(),
                self.binance_url(credential.environment),
                &self.config.binance,
                BinanceCredentials::new(&credential.api_key, &credential.api_secret),
            ))),
        }
    }

    fn market_data(&self, exchange: Exchange) -> ExchangeResult<Arc<dyn ExchangeAdapter>> {
        self.market_data
            .get(&exchange)
            .cloned()
            .ok_or_else(|| ExchangeError::Unsupported(exchange.to_string()))
    }
}
