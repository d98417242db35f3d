//! Supabase configuration module
//!
//! Loads the PostgREST endpoint and key used by the durable operation store.

use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors for Supabase configuration
#[derive(Debug, Error)]
pub enum SupabaseConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid Supabase URL format: {0}")]
    InvalidUrl(String),
}

/// Supabase configuration loaded from environment variables
#[derive(Clone)]
pub struct SupabaseConfig {
    /// Supabase project URL (e.g., <https://xxx.supabase.co>)
    pub url: String,
    /// Service key; the engine writes balances and operation rows
    pub api_key: String,
    pub enabled: bool,
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl SupabaseConfig {
    /// Load Supabase configuration from environment variables
    ///
    /// Required env vars (when enabled):
    /// - `SUPABASE_URL`: Supabase project URL
    /// - `SUPABASE_SERVICE_KEY` (or `SUPABASE_ANON_KEY` as a fallback)
    ///
    /// Optional:
    /// - `SUPABASE_ENABLED`: "true" (default) or "false"
    ///
    /// # Returns
    /// - `Ok(Some(SupabaseConfig))` if enabled and configured
    /// - `Ok(None)` if disabled or the URL is unset
    /// - `Err` if enabled but the URL or key is malformed/missing
    pub fn from_env() -> Result<Option<Self>, SupabaseConfigError> {
        let enabled = std::env::var("SUPABASE_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        if !enabled {
            info!("Supabase store disabled via SUPABASE_ENABLED=false");
            return Ok(None);
        }

        let url = match std::env::var("SUPABASE_URL") {
            Ok(u) if u.contains("your-project") => {
                warn!("SUPABASE_URL contains placeholder value, Supabase store disabled");
                return Ok(None);
            }
            Ok(u) if !u.is_empty() => u.trim_end_matches('/').to_string(),
            _ => {
                debug!("SUPABASE_URL not set, Supabase store disabled");
                return Ok(None);
            }
        };

        // Local PostgREST (supabase start) serves plain http on localhost
        let local = url.starts_with("http://localhost") || url.starts_with("http://127.0.0.1");
        if !(url.starts_with("https://") || local) {
            return Err(SupabaseConfigError::InvalidUrl(url));
        }

        let api_key = std::env::var("SUPABASE_SERVICE_KEY")
            .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
            .map_err(|_| SupabaseConfigError::MissingEnvVar("SUPABASE_SERVICE_KEY".to_string()))?;

        if api_key.is_empty() || api_key.contains("your-") {
            return Err(SupabaseConfigError::MissingEnvVar(
                "SUPABASE_SERVICE_KEY (contains placeholder)".to_string(),
            ));
        }

        info!(url = %url, "Supabase configuration loaded");

        Ok(Some(Self {
            url,
            api_key,
            enabled: true,
        }))
    }

    /// Create a SupabaseConfig pointing at a mock server
    pub fn new_for_test(url: &str, api_key: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            enabled: true,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
