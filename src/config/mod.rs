//! Configuration module for engine settings and YAML loading
//!
//! This module provides:
//! - Configuration types (`AppConfig` and its sections)
//! - YAML loading functionality (`load_config`)
//! - Environment variable overrides (`constants`)
//! - Supabase store credentials (`SupabaseConfig`)

pub mod constants;
mod loader;
pub mod supabase;
mod types;

pub use types::{
    AppConfig, BinanceConfig, CheckThresholds, CheckWeights, EngineConfig, ExchangesConfig,
    MonitorConfig, PlanLimits, PlansConfig, ReloadConfig, RiskConfig, SentimentConfig,
    SentimentMode, SizingConfig, ValidationConfig,
};

pub use loader::{load_config, load_config_from_str, load_config_or_default};
pub use supabase::{SupabaseConfig, SupabaseConfigError};
