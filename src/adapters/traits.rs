//! Exchange adapter trait definition
//!
//! The ExchangeAdapter trait defines the common interface that all
//! exchange adapters must implement for consistent behavior.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::adapters::errors::ExchangeResult;
use crate::adapters::types::{OrderRequest, OrderResponse};

/// Common trait for all exchange adapters
///
/// An adapter is bound to at most one credential. Market-data adapters
/// (no credential) support `get_price` only; authenticated calls on them
/// fail with `AuthenticationFailed`.
///
/// # Example Implementation
///
/// ```ignore
/// use async_trait::async_trait;
///
/// struct PaperAdapter;
///
/// #[async_trait]
/// impl ExchangeAdapter for PaperAdapter {
///     async fn get_price(&self, _symbol: &str) -> ExchangeResult<Decimal> {
///         Ok(dec!(100))
///     }
///     // ... other methods
/// }
/// ```
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Last traded / mark price for a symbol (public endpoint)
    async fn get_price(&self, symbol: &str) -> ExchangeResult<Decimal>;

    /// Place an order on the exchange
    ///
    /// Returns the exchange acknowledgement with its order id. Any error means
    /// the order must be treated as not placed.
    async fn place_order(&self, order: OrderRequest) -> ExchangeResult<OrderResponse>;

    /// Authenticated, read-only call proving the credential works
    /// (balance query on REST exchanges)
    async fn ping(&self) -> ExchangeResult<()>;

    /// Get the exchange name (e.g., "binance")
    fn exchange_name(&self) -> &'static str;
}
