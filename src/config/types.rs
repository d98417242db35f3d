//! Configuration types for engine settings
//!
//! Every section carries defaults so a partial (or empty) YAML file yields a
//! runnable configuration. `AppConfig::validate` enforces cross-field rules.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::config::constants;
use crate::domain::{Exchange, PlanTier};
use crate::error::AppError;

// ============================================================================
// Enums
// ============================================================================

/// How the sentiment index restricts trade direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SentimentMode {
    /// Fear (< fear threshold) allows shorts only, greed (> greed threshold) longs only
    #[default]
    Trend,
    /// Fear allows longs only, greed shorts only
    Contrarian,
}

impl std::fmt::Display for SentimentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SentimentMode::Trend => write!(f, "trend"),
            SentimentMode::Contrarian => write!(f, "contrarian"),
        }
    }
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Exchange used when a signal does not name one
    pub default_exchange: Exchange,
    /// Number of execution workers; orders are sharded by (user, symbol)
    pub queue_shards: usize,
    /// Capacity of each internal mpsc channel
    pub channel_capacity: usize,
    /// Upper bound on graceful shutdown before tasks are abandoned
    pub shutdown_grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_exchange: Exchange::Binance,
            queue_shards: 4,
            channel_capacity: 100,
            shutdown_grace_secs: 10,
        }
    }
}

/// Default sizing parameters, overridden per user only when custom trading is enabled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SizingConfig {
    pub default_leverage: u32,
    /// Share of tradable balance committed per operation (percent)
    pub position_pct: Decimal,
    pub max_leverage: u32,
    /// SL% = multiplier * leverage
    pub stop_loss_multiplier: Decimal,
    /// TP% = multiplier * leverage
    pub take_profit_multiplier: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            default_leverage: 5,
            position_pct: dec!(30),
            max_leverage: 20,
            stop_loss_multiplier: dec!(2),
            take_profit_multiplier: dec!(3),
        }
    }
}

/// Per-plan limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanLimits {
    pub max_concurrent_operations: u32,
    /// Cap on the margin committed to one operation
    pub max_position_notional: Decimal,
    /// Daily loss budget as percent of tradable balance
    pub daily_loss_limit_pct: Decimal,
}

/// Plan table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlansConfig {
    pub basic: PlanLimits,
    pub pro: PlanLimits,
    pub premium: PlanLimits,
}

impl PlansConfig {
    pub fn limits_for(&self, plan: PlanTier) -> &PlanLimits {
        match plan {
            PlanTier::Basic => &self.basic,
            PlanTier::Pro => &self.pro,
            PlanTier::Premium => &self.premium,
        }
    }
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            basic: PlanLimits {
                max_concurrent_operations: 1,
                max_position_notional: dec!(500),
                daily_loss_limit_pct: dec!(5),
            },
            pro: PlanLimits {
                max_concurrent_operations: 3,
                max_position_notional: dec!(2500),
                daily_loss_limit_pct: dec!(10),
            },
            premium: PlanLimits {
                max_concurrent_operations: 10,
                max_position_notional: dec!(10000),
                daily_loss_limit_pct: dec!(15),
            },
        }
    }
}

/// Relative weight of each risk check in the composite score
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckWeights {
    pub exposure: f64,
    pub daily_loss: f64,
    pub loss_streak: f64,
    pub volatility: f64,
    pub operation_rate: f64,
}

impl Default for CheckWeights {
    fn default() -> Self {
        Self {
            exposure: 0.30,
            daily_loss: 0.25,
            loss_streak: 0.20,
            volatility: 0.15,
            operation_rate: 0.10,
        }
    }
}

impl CheckWeights {
    fn all(&self) -> [(&'static str, f64); 5] {
        [
            ("exposure", self.exposure),
            ("daily_loss", self.daily_loss),
            ("loss_streak", self.loss_streak),
            ("volatility", self.volatility),
            ("operation_rate", self.operation_rate),
        ]
    }
}

/// Per-check pass threshold: a check passes when its score is at or below it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckThresholds {
    pub exposure: f64,
    pub daily_loss: f64,
    pub loss_streak: f64,
    pub volatility: f64,
    pub operation_rate: f64,
}

impl Default for CheckThresholds {
    fn default() -> Self {
        Self {
            exposure: 0.9,
            daily_loss: 0.8,
            loss_streak: 0.8,
            volatility: 0.9,
            operation_rate: 0.9,
        }
    }
}

impl CheckThresholds {
    fn all(&self) -> [(&'static str, f64); 5] {
        [
            ("exposure", self.exposure),
            ("daily_loss", self.daily_loss),
            ("loss_streak", self.loss_streak),
            ("volatility", self.volatility),
            ("operation_rate", self.operation_rate),
        ]
    }
}

/// Risk admission parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    /// Signals older than this are never admitted
    pub signal_freshness_secs: u64,
    /// Composite score must stay below this to approve
    pub score_ceiling: f64,
    /// Minimum number of checks that must pass
    pub min_passed_checks: usize,
    /// Composite above this raises an alert, approved or not
    pub alert_threshold: f64,
    /// Platform-wide cap on margin committed to open operations
    pub global_exposure_cap: Decimal,
    /// Admissions per rolling minute at which the rate check saturates
    pub max_operations_per_minute: u32,
    /// Loss streak at which the streak check saturates
    pub max_consecutive_losses: u32,
    /// Number of prices kept per symbol for the volatility proxy
    pub volatility_window: usize,
    /// Stddev of log returns at which the volatility check saturates
    pub volatility_reference: f64,
    pub weights: CheckWeights,
    pub thresholds: CheckThresholds,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            signal_freshness_secs: 30,
            score_ceiling: 0.7,
            min_passed_checks: 4,
            alert_threshold: 0.85,
            global_exposure_cap: dec!(100000),
            max_operations_per_minute: 60,
            max_consecutive_losses: 5,
            volatility_window: 20,
            volatility_reference: 0.02,
            weights: CheckWeights::default(),
            thresholds: CheckThresholds::default(),
        }
    }
}

impl RiskConfig {
    pub fn signal_freshness(&self) -> Duration {
        Duration::from_secs(self.signal_freshness_secs)
    }
}

/// Position monitor loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    /// Interval jitter as percent of the interval
    pub jitter_pct: u32,
    /// Send a reduce-only order to the exchange when closing
    pub close_on_exchange: bool,
    pub price_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            jitter_pct: 10,
            close_on_exchange: true,
            price_timeout_secs: 5,
        }
    }
}

/// Directory hot reload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReloadConfig {
    pub interval_secs: u64,
    pub jitter_pct: u32,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            jitter_pct: 10,
        }
    }
}

/// Credential validation sweeps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    pub sweep_interval_secs: u64,
    /// `validating` rows older than this are reclaimed by the sweep
    pub stale_after_secs: u64,
    pub timeout_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            stale_after_secs: 120,
            timeout_secs: 10,
        }
    }
}

/// Market sentiment gate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SentimentConfig {
    /// When disabled the gate always reports the fallback value
    pub enabled: bool,
    pub url: String,
    pub poll_interval_secs: u64,
    /// Readings older than this are replaced by the fallback
    pub stale_after_secs: u64,
    pub fallback: u8,
    pub fear_threshold: u8,
    pub greed_threshold: u8,
    pub mode: SentimentMode,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://api.alternative.me/fng/?limit=1".to_string(),
            poll_interval_secs: 300,
            stale_after_secs: 3600,
            fallback: 50,
            fear_threshold: 30,
            greed_threshold: 80,
            mode: SentimentMode::Trend,
        }
    }
}

/// Binance USD-M futures REST endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BinanceConfig {
    pub live_url: String,
    pub sandbox_url: String,
    pub order_timeout_secs: u64,
    /// Decimal places of the order quantity sent to the exchange
    pub quantity_precision: u32,
    pub recv_window_ms: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            live_url: "https://fapi.binance.com".to_string(),
            sandbox_url: "https://testnet.binancefuture.com".to_string(),
            order_timeout_secs: 10,
            quantity_precision: 3,
            recv_window_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ExchangesConfig {
    pub binance: BinanceConfig,
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub sizing: SizingConfig,
    pub plans: PlansConfig,
    pub risk: RiskConfig,
    pub monitor: MonitorConfig,
    pub reload: ReloadConfig,
    pub validation: ValidationConfig,
    pub sentiment: SentimentConfig,
    pub exchanges: ExchangesConfig,
}

impl AppConfig {
    /// Validate all configuration rules
    pub fn validate(&self) -> Result<(), AppError> {
        if self.engine.queue_shards == 0 {
            return Err(AppError::Config(
                "engine.queue_shards must be at least 1".to_string(),
            ));
        }
        if self.engine.channel_capacity == 0 {
            return Err(AppError::Config(
                "engine.channel_capacity must be at least 1".to_string(),
            ));
        }

        let sizing = &self.sizing;
        if sizing.max_leverage == 0 || sizing.default_leverage == 0 {
            return Err(AppError::Config("sizing: leverage must be >= 1".to_string()));
        }
        if sizing.default_leverage > sizing.max_leverage {
            return Err(AppError::Config(format!(
                "sizing: default_leverage ({}) exceeds max_leverage ({})",
                sizing.default_leverage, sizing.max_leverage
            )));
        }
        if sizing.position_pct <= Decimal::ZERO || sizing.position_pct > dec!(100) {
            return Err(AppError::Config(format!(
                "sizing: position_pct must be > 0 and <= 100 (got {})",
                sizing.position_pct
            )));
        }
        if sizing.stop_loss_multiplier <= Decimal::ZERO || sizing.take_profit_multiplier <= Decimal::ZERO {
            return Err(AppError::Config(
                "sizing: stop_loss_multiplier and take_profit_multiplier must be > 0".to_string(),
            ));
        }
        // SL% of 100 or more would put a long's stop at or below zero
        if sizing.stop_loss_multiplier * Decimal::from(sizing.max_leverage) >= dec!(100) {
            return Err(AppError::Config(format!(
                "sizing: stop_loss_multiplier ({}) x max_leverage ({}) must stay below 100%",
                sizing.stop_loss_multiplier, sizing.max_leverage
            )));
        }

        for (tier, limits) in [
            (PlanTier::Basic, &self.plans.basic),
            (PlanTier::Pro, &self.plans.pro),
            (PlanTier::Premium, &self.plans.premium),
        ] {
            if limits.max_position_notional <= Decimal::ZERO {
                return Err(AppError::Config(format!(
                    "plans.{}: max_position_notional must be > 0",
                    tier
                )));
            }
            if limits.daily_loss_limit_pct <= Decimal::ZERO || limits.daily_loss_limit_pct > dec!(100) {
                return Err(AppError::Config(format!(
                    "plans.{}: daily_loss_limit_pct must be > 0 and <= 100",
                    tier
                )));
            }
        }

        let risk = &self.risk;
        if risk.signal_freshness_secs == 0 {
            return Err(AppError::Config(
                "risk.signal_freshness_secs must be > 0".to_string(),
            ));
        }
        for (name, value) in [
            ("score_ceiling", risk.score_ceiling),
            ("alert_threshold", risk.alert_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::Config(format!(
                    "risk.{} must be within [0, 1] (got {})",
                    name, value
                )));
            }
        }
        if risk.min_passed_checks > 5 {
            return Err(AppError::Config(format!(
                "risk.min_passed_checks cannot exceed the 5 checks (got {})",
                risk.min_passed_checks
            )));
        }
        let weights = risk.weights.all();
        if weights.iter().any(|(_, w)| *w < 0.0) {
            return Err(AppError::Config("risk.weights must be non-negative".to_string()));
        }
        if weights.iter().map(|(_, w)| w).sum::<f64>() <= 0.0 {
            return Err(AppError::Config("risk.weights must not all be zero".to_string()));
        }
        for (name, threshold) in risk.thresholds.all() {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(AppError::Config(format!(
                    "risk.thresholds.{} must be within [0, 1] (got {})",
                    name, threshold
                )));
            }
        }
        if risk.global_exposure_cap <= Decimal::ZERO {
            return Err(AppError::Config("risk.global_exposure_cap must be > 0".to_string()));
        }
        if risk.max_operations_per_minute == 0 || risk.max_consecutive_losses == 0 {
            return Err(AppError::Config(
                "risk.max_operations_per_minute and risk.max_consecutive_losses must be > 0".to_string(),
            ));
        }
        if risk.volatility_window < 2 || risk.volatility_reference <= 0.0 {
            return Err(AppError::Config(
                "risk: volatility_window must be >= 2 and volatility_reference > 0".to_string(),
            ));
        }

        for (name, secs) in [
            ("monitor.interval_secs", self.monitor.interval_secs),
            ("monitor.price_timeout_secs", self.monitor.price_timeout_secs),
            ("reload.interval_secs", self.reload.interval_secs),
            ("validation.sweep_interval_secs", self.validation.sweep_interval_secs),
            ("validation.timeout_secs", self.validation.timeout_secs),
            ("sentiment.poll_interval_secs", self.sentiment.poll_interval_secs),
            ("exchanges.binance.order_timeout_secs", self.exchanges.binance.order_timeout_secs),
        ] {
            if secs == 0 {
                return Err(AppError::Config(format!("{} must be > 0", name)));
            }
        }
        for (name, pct) in [
            ("monitor.jitter_pct", self.monitor.jitter_pct),
            ("reload.jitter_pct", self.reload.jitter_pct),
        ] {
            if pct >= 100 {
                return Err(AppError::Config(format!("{} must be < 100 (got {})", name, pct)));
            }
        }
        if self.validation.stale_after_secs <= self.validation.timeout_secs {
            return Err(AppError::Config(format!(
                "validation.stale_after_secs ({}) must exceed validation.timeout_secs ({})",
                self.validation.stale_after_secs, self.validation.timeout_secs
            )));
        }

        let sentiment = &self.sentiment;
        if sentiment.fallback > 100 || sentiment.greed_threshold > 100 {
            return Err(AppError::Config(
                "sentiment: values must be within 0-100".to_string(),
            ));
        }
        if sentiment.fear_threshold >= sentiment.greed_threshold {
            return Err(AppError::Config(format!(
                "sentiment: fear_threshold ({}) must be < greed_threshold ({})",
                sentiment.fear_threshold, sentiment.greed_threshold
            )));
        }
        if sentiment.enabled && sentiment.url.trim().is_empty() {
            return Err(AppError::Config(
                "sentiment.url cannot be empty when sentiment is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply interval and timeout overrides from the environment
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(secs) = constants::monitor_interval_secs() {
            self.monitor.interval_secs = secs;
        }
        if let Some(secs) = constants::reload_interval_secs() {
            self.reload.interval_secs = secs;
        }
        if let Some(secs) = constants::validation_sweep_interval_secs() {
            self.validation.sweep_interval_secs = secs;
        }
        if let Some(secs) = constants::sentiment_poll_interval_secs() {
            self.sentiment.poll_interval_secs = secs;
        }
        if let Some(secs) = constants::signal_freshness_secs() {
            self.risk.signal_freshness_secs = secs;
        }
        if let Some(secs) = constants::order_timeout_secs() {
            self.exchanges.binance.order_timeout_secs = secs;
        }
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
