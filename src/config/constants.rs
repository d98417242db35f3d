//! Environment variable overrides and process-level defaults
//!
//! Interval overrides return `None` when unset so the YAML value stays in
//! effect; process settings fall back to fixed defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::types::AppConfig;

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

// =============================================================================
// Process Settings
// =============================================================================

/// Path of the YAML configuration file (default: `config.yaml`)
///
/// Environment variable: `CONFIG_PATH`
pub fn config_path() -> PathBuf {
    std::env::var("CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.yaml"))
}

/// Run against the in-memory store even when Supabase is configured (default: false)
///
/// Environment variable: `DRY_RUN`
pub fn dry_run() -> bool {
    std::env::var("DRY_RUN")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// JSON file of users and credentials seeded into the in-memory store
///
/// Environment variable: `SEED_DIRECTORY_PATH`
pub fn seed_directory_path() -> Option<PathBuf> {
    std::env::var("SEED_DIRECTORY_PATH").ok().map(PathBuf::from)
}

// =============================================================================
// Loop Intervals
// =============================================================================

/// Environment variable: `MONITOR_INTERVAL_SECS`
pub fn monitor_interval_secs() -> Option<u64> {
    env_parse("MONITOR_INTERVAL_SECS")
}

/// Environment variable: `RELOAD_INTERVAL_SECS`
pub fn reload_interval_secs() -> Option<u64> {
    env_parse("RELOAD_INTERVAL_SECS")
}

/// Environment variable: `VALIDATION_SWEEP_INTERVAL_SECS`
pub fn validation_sweep_interval_secs() -> Option<u64> {
    env_parse("VALIDATION_SWEEP_INTERVAL_SECS")
}

/// Environment variable: `SENTIMENT_POLL_INTERVAL_SECS`
pub fn sentiment_poll_interval_secs() -> Option<u64> {
    env_parse("SENTIMENT_POLL_INTERVAL_SECS")
}

// =============================================================================
// Execution
// =============================================================================

/// Environment variable: `SIGNAL_FRESHNESS_SECS`
pub fn signal_freshness_secs() -> Option<u64> {
    env_parse("SIGNAL_FRESHNESS_SECS")
}

/// Environment variable: `ORDER_TIMEOUT_SECS`
pub fn order_timeout_secs() -> Option<u64> {
    env_parse("ORDER_TIMEOUT_SECS")
}

/// Maximum optimistic attempts for a balance settlement (default: 3)
///
/// Environment variable: `SETTLEMENT_MAX_ATTEMPTS`
pub fn settlement_max_attempts() -> u32 {
    env_parse("SETTLEMENT_MAX_ATTEMPTS").unwrap_or(3)
}

/// HTTP request timeout for store calls (default: 10 seconds)
///
/// Environment variable: `STORE_TIMEOUT_SECS`
pub fn store_timeout() -> Duration {
    Duration::from_secs(env_parse("STORE_TIMEOUT_SECS").unwrap_or(10))
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Print the effective configuration (startup logs)
pub fn log_configuration(config: &AppConfig) {
    tracing::info!("=== Engine Configuration ===");
    tracing::info!("Engine:");
    tracing::info!("  - Default exchange: {}", config.engine.default_exchange);
    tracing::info!("  - Execution shards: {}", config.engine.queue_shards);
    tracing::info!("Sizing:");
    tracing::info!("  - Default leverage: {}x", config.sizing.default_leverage);
    tracing::info!("  - Position: {}% of tradable balance", config.sizing.position_pct);
    tracing::info!("Risk:");
    tracing::info!("  - Signal freshness: {}s", config.risk.signal_freshness_secs);
    tracing::info!("  - Score ceiling: {}", config.risk.score_ceiling);
    tracing::info!("  - Min passed checks: {}", config.risk.min_passed_checks);
    tracing::info!("  - Alert threshold: {}", config.risk.alert_threshold);
    tracing::info!("Loops:");
    tracing::info!("  - Monitor interval: {}s", config.monitor.interval_secs);
    tracing::info!("  - Reload interval: {}s", config.reload.interval_secs);
    tracing::info!("  - Validation sweep: {}s", config.validation.sweep_interval_secs);
    tracing::info!(
        "  - Sentiment poll: {}s (enabled: {}, mode: {})",
        config.sentiment.poll_interval_secs,
        config.sentiment.enabled,
        config.sentiment.mode
    );
    tracing::info!("Store:");
    tracing::info!("  - Settlement attempts: {}", settlement_max_attempts());
    tracing::info!("  - Request timeout: {:?}", store_timeout());
    tracing::info!("============================");
}
