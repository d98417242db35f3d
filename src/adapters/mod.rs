//! Exchange adapters
//!
//! This module provides the core abstractions for talking to exchanges:
//! price reads, order placement and credential checks.

pub mod binance;
pub mod errors;
pub mod factory;
pub mod traits;
pub mod types;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types for convenience
pub use binance::{BinanceCredentials, BinanceFuturesAdapter};
pub use errors::{ExchangeError, ExchangeResult};
pub use factory::{resolve_symbol, AdapterFactory, RestAdapterFactory};
pub use traits::ExchangeAdapter;
pub use types::{OrderRequest, OrderResponse, OrderSide, OrderStatus, OrderType};
