//! Core data types for exchange adapters
//!
//! These types are shared by every adapter so the engine never sees an
//! exchange-specific payload.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Side, TradingOperation};

// =============================================================================
// HTTP Client Constants
// =============================================================================

/// HTTP connection timeout (milliseconds), fail fast if host unreachable
const HTTP_CONNECT_TIMEOUT_MS: u64 = 3000;
/// Max idle connections per host in connection pool
const HTTP_POOL_MAX_IDLE: usize = 10;
/// How long idle connections stay in the pool (seconds)
const HTTP_POOL_IDLE_TIMEOUT_SECS: u64 = 60;
/// TCP keepalive interval (seconds)
const HTTP_TCP_KEEPALIVE_SECS: u64 = 30;

/// Create a pooled HTTP client shared by every adapter of one exchange
pub fn create_http_client(exchange_name: &str, request_timeout: Duration) -> reqwest::Client {
    let client = reqwest::Client::builder()
        .timeout(request_timeout)
        .pool_max_idle_per_host(HTTP_POOL_MAX_IDLE)
        .pool_idle_timeout(Duration::from_secs(HTTP_POOL_IDLE_TIMEOUT_SECS))
        .tcp_keepalive(Duration::from_secs(HTTP_TCP_KEEPALIVE_SECS))
        .connect_timeout(Duration::from_millis(HTTP_CONNECT_TIMEOUT_MS))
        .tcp_nodelay(true)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());
    tracing::info!(
        phase = "init",
        exchange = %exchange_name,
        timeout_ms = request_timeout.as_millis() as u64,
        connect_timeout_ms = HTTP_CONNECT_TIMEOUT_MS,
        pool_max_idle = HTTP_POOL_MAX_IDLE,
        "HTTP client configured"
    );
    client
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Side that opens a position in `side`
    pub fn opening(side: Side) -> Self {
        match side {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Side that reduces a position in `side`
    pub fn closing(side: Side) -> Self {
        match side {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
        }
    }
}

/// Order request as understood by every adapter
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    /// Idempotency key; the operation id so retries on the exchange side dedupe
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Base-asset quantity of exposure (margin quantity times leverage)
    pub quantity: Decimal,
    pub leverage: u32,
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Market order opening `op` on the exchange symbol `symbol`
    pub fn open(op: &TradingOperation, symbol: &str) -> Self {
        Self {
            client_order_id: op.id.simple().to_string(),
            symbol: symbol.to_string(),
            side: OrderSide::opening(op.side),
            order_type: OrderType::Market,
            quantity: op.quantity * Decimal::from(op.leverage),
            leverage: op.leverage,
            reduce_only: false,
        }
    }

    /// Reduce-only market order flattening `op`
    pub fn close(op: &TradingOperation, symbol: &str) -> Self {
        Self {
            client_order_id: format!("x{}", op.id.simple()),
            side: OrderSide::closing(op.side),
            reduce_only: true,
            ..Self::open(op, symbol)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn from_exchange(status: &str) -> Option<Self> {
        match status {
            "NEW" => Some(OrderStatus::New),
            "PARTIALLY_FILLED" => Some(OrderStatus::PartiallyFilled),
            "FILLED" => Some(OrderStatus::Filled),
            "CANCELED" => Some(OrderStatus::Canceled),
            "REJECTED" => Some(OrderStatus::Rejected),
            "EXPIRED" => Some(OrderStatus::Expired),
            _ => None,
        }
    }

    /// Exchange accepted the order (it may still be filling)
    pub fn is_accepted(self) -> bool {
        matches!(
            self,
            OrderStatus::New | OrderStatus::PartiallyFilled | OrderStatus::Filled
        )
    }
}

/// Exchange acknowledgement of an order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderResponse {
    pub order_id: String,
    pub client_order_id: String,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub avg_price: Option<Decimal>,
}
