//! Exchange adapter error types
//!
//! All exchange-related errors are wrapped in ExchangeError enum
//! which implements thiserror for consistent error handling.

use thiserror::Error;

/// Exchange-specific error types for adapter operations
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Connection to exchange failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Network operation timed out
    #[error("Network timeout after {0}ms")]
    NetworkTimeout(u64),

    /// Invalid or unexpected response from exchange
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// API key rejected (bad key, bad signature, missing permission)
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Exchange refused the order
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// Error payload returned by the exchange (`{"code": .., "msg": ..}`)
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// Exchange not wired into this build
    #[error("Unsupported exchange: {0}")]
    Unsupported(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ExchangeError {
    /// Binance error codes that mean the key itself is unusable
    const AUTH_CODES: [i64; 4] = [-2014, -2015, -1022, -2008];

    /// Classify a Binance-style error body.
    pub fn from_api_body(status: u16, body: &str) -> Self {
        #[derive(serde::Deserialize)]
        struct ApiErrorBody {
            code: i64,
            msg: String,
        }

        match serde_json::from_str::<ApiErrorBody>(body) {
            Ok(err) if Self::AUTH_CODES.contains(&err.code) => {
                Self::AuthenticationFailed(format!("{} ({})", err.msg, err.code))
            }
            Ok(err) => Self::Api {
                code: err.code,
                message: err.msg,
            },
            Err(_) if status == 401 || status == 403 => {
                Self::AuthenticationFailed(format!("HTTP {}", status))
            }
            Err(_) => Self::InvalidResponse(format!("HTTP {}: {}", status, body)),
        }
    }
}

/// Result type alias for exchange operations
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failed_display() {
        let err = ExchangeError::ConnectionFailed("timeout".to_string());
        assert_eq!(err.to_string(), "Connection failed: timeout");
    }

    #[test]
    fn test_network_timeout_display() {
        let err = ExchangeError::NetworkTimeout(5000);
        assert_eq!(err.to_string(), "Network timeout after 5000ms");
    }

    #[test]
    fn test_api_body_auth_code() {
        let err = ExchangeError::from_api_body(
            401,
            r#"{"code":-2015,"msg":"Invalid API-key, IP, or permissions for action."}"#,
        );
        assert!(matches!(err, ExchangeError::AuthenticationFailed(_)));
        assert!(err.to_string().contains("-2015"));
    }

    #[test]
    fn test_api_body_generic_code() {
        let err = ExchangeError::from_api_body(400, r#"{"code":-1121,"msg":"Invalid symbol."}"#);
        assert_eq!(err.to_string(), "API error -1121: Invalid symbol.");
    }

    #[test]
    fn test_api_body_unparseable() {
        let err = ExchangeError::from_api_body(403, "<html>forbidden</html>");
        assert!(matches!(err, ExchangeError::AuthenticationFailed(_)));

        let err = ExchangeError::from_api_body(502, "bad gateway");
        assert_eq!(err.to_string(), "Invalid response: HTTP 502: bad gateway");
    }
}
