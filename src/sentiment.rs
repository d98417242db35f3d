//! Market sentiment gate
//!
//! A Fear & Greed style index (0-100) restricts the trade direction: at
//! extreme readings only one side is admitted. The gate keeps the last
//! reading in atomics so admission reads it without locking. Missing,
//! failed, stale or disabled readings resolve to the configured fallback.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::adapters::types::create_http_client;
use crate::config::{SentimentConfig, SentimentMode};
use crate::core::schedule::{sleep_or_shutdown, JitteredInterval};
use crate::domain::Side;

#[derive(Debug, Error)]
pub enum SentimentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid sentiment payload: {0}")]
    InvalidPayload(String),
}

/// Provider of the 0-100 sentiment index
#[async_trait]
pub trait SentimentSource: Send + Sync {
    async fn fetch(&self) -> Result<u8, SentimentError>;
}

/// HTTP client for the alternative.me Fear & Greed endpoint
pub struct FearGreedClient {
    client: reqwest::Client,
    url: String,
}

impl FearGreedClient {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            client: create_http_client("fear_greed", timeout),
            url: url.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct FearGreedResponse {
    data: Vec<FearGreedEntry>,
}

#[derive(Deserialize)]
struct FearGreedEntry {
    value: String,
}

/// Parse `{"data":[{"value":"54", ...}]}`
pub fn parse_fear_greed(body: &str) -> Result<u8, SentimentError> {
    let response: FearGreedResponse =
        serde_json::from_str(body).map_err(|e| SentimentError::InvalidPayload(e.to_string()))?;
    let entry = response
        .data
        .first()
        .ok_or_else(|| SentimentError::InvalidPayload("empty data array".to_string()))?;
    let value: u8 = entry
        .value
        .trim()
        .parse()
        .map_err(|_| SentimentError::InvalidPayload(format!("non-numeric value '{}'", entry.value)))?;
    if value > 100 {
        return Err(SentimentError::InvalidPayload(format!("value {} out of range", value)));
    }
    Ok(value)
}

#[async_trait]
impl SentimentSource for FearGreedClient {
    async fn fetch(&self) -> Result<u8, SentimentError> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        let body = response.text().await?;
        parse_fear_greed(&body)
    }
}

/// Last known sentiment reading plus the direction policy
pub struct SentimentGate {
    config: SentimentConfig,
    value: AtomicU8,
    has_reading: AtomicBool,
    updated_at_ms: AtomicI64,
}

impl SentimentGate {
    pub fn new(config: SentimentConfig) -> Self {
        let fallback = config.fallback;
        Self {
            config,
            value: AtomicU8::new(fallback),
            has_reading: AtomicBool::new(false),
            updated_at_ms: AtomicI64::new(0),
        }
    }

    pub fn record(&self, value: u8) {
        self.value.store(value.min(100), Ordering::SeqCst);
        self.updated_at_ms.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        self.has_reading.store(true, Ordering::SeqCst);
    }

    /// Drop the current reading so the fallback applies
    pub fn invalidate(&self) {
        self.has_reading.store(false, Ordering::SeqCst);
    }

    /// Effective index value
    pub fn current(&self) -> u8 {
        if !self.config.enabled || !self.has_reading.load(Ordering::SeqCst) {
            return self.config.fallback;
        }
        let age_ms = Utc::now().timestamp_millis() - self.updated_at_ms.load(Ordering::SeqCst);
        if age_ms > (self.config.stale_after_secs as i64).saturating_mul(1000) {
            return self.config.fallback;
        }
        self.value.load(Ordering::SeqCst)
    }

    /// Whether `side` may be opened at the current reading
    pub fn side_allowed(&self, side: Side) -> bool {
        self.side_allowed_at(self.current(), side)
    }

    pub fn side_allowed_at(&self, value: u8, side: Side) -> bool {
        let fear = value < self.config.fear_threshold;
        let greed = value > self.config.greed_threshold;
        match (self.config.mode, side) {
            (SentimentMode::Trend, Side::Long) => !fear,
            (SentimentMode::Trend, Side::Short) => !greed,
            (SentimentMode::Contrarian, Side::Long) => !greed,
            (SentimentMode::Contrarian, Side::Short) => !fear,
        }
    }

    /// One poll; a failure reverts the gate to the fallback
    pub async fn poll_once(&self, source: &dyn SentimentSource) {
        match source.fetch().await {
            Ok(value) => {
                debug!(value, "[SENTIMENT] Reading updated");
                self.record(value);
            }
            Err(e) => {
                warn!(error = %e, fallback = self.config.fallback, "[SENTIMENT] Fetch failed, using fallback");
                self.invalidate();
            }
        }
    }

    pub async fn run(self: Arc<Self>, source: Arc<dyn SentimentSource>, mut shutdown_rx: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!(fallback = self.config.fallback, "[SENTIMENT] Disabled, gate pinned to fallback");
            return;
        }

        let interval = JitteredInterval::from_secs(self.config.poll_interval_secs, 5);
        info!(
            interval_secs = self.config.poll_interval_secs,
            mode = %self.config.mode,
            "[SENTIMENT] Poller started"
        );

        loop {
            self.poll_once(source.as_ref()).await;
            if !sleep_or_shutdown(&interval, &mut shutdown_rx).await {
                info!("[SENTIMENT] Shutdown signal received");
                break;
            }
        }
    }
}
