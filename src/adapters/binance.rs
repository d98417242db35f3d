//! Binance USD-M futures REST adapter
//!
//! Signed endpoints use an HMAC-SHA256 signature of the query string
//! (parameters in insertion order, `recvWindow` and `timestamp` appended)
//! and the `X-MBX-APIKEY` header.

use std::fmt;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::prelude::*;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info};

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::traits::ExchangeAdapter;
use crate::adapters::types::{OrderRequest, OrderResponse, OrderStatus};
use crate::config::BinanceConfig;
use crate::core::logging::{sanitize_signature, SanitizedValue};

type HmacSha256 = Hmac<Sha256>;

const EXCHANGE_NAME: &str = "binance";

// =============================================================================
// Signing
// =============================================================================

/// API key pair; the secret never leaves this struct except into the MAC
#[derive(Clone)]
pub struct BinanceCredentials {
    api_key: String,
    api_secret: String,
}

impl BinanceCredentials {
    pub fn new(api_key: &str, api_secret: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        }
    }

    /// Hex-encoded HMAC-SHA256 of `message` under the secret
    pub fn sign(&self, message: &str) -> ExchangeResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::AuthenticationFailed(format!("invalid secret: {}", e)))?;
        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Build `k=v&...&timestamp=T&signature=S`, preserving parameter order
    pub fn sign_params_ordered(
        &self,
        params: &[(&str, String)],
        timestamp_ms: i64,
    ) -> ExchangeResult<String> {
        let mut parts: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        parts.push(format!("timestamp={}", timestamp_ms));

        let query = parts.join("&");
        let signature = self.sign(&query)?;
        debug!(signature = %sanitize_signature(&signature), "Signed request");
        Ok(format!("{}&signature={}", query, signature))
    }
}

impl fmt::Debug for BinanceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinanceCredentials")
            .field("api_key", &SanitizedValue::new(&self.api_key).to_string())
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewOrderResponse {
    order_id: i64,
    client_order_id: String,
    status: String,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    avg_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    balance: String,
}

fn parse_decimal(field: &str, raw: &str) -> ExchangeResult<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| ExchangeError::InvalidResponse(format!("{} '{}' is not a decimal: {}", field, raw, e)))
}

// =============================================================================
// Adapter
// =============================================================================

/// REST adapter for one credential (or public market data when unauthenticated)
#[derive(Debug, Clone)]
pub struct BinanceFuturesAdapter {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<BinanceCredentials>,
    quantity_precision: u32,
    recv_window_ms: u64,
}

impl BinanceFuturesAdapter {
    /// Unauthenticated adapter for price reads
    pub fn public(client: reqwest::Client, base_url: &str, config: &BinanceConfig) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
            quantity_precision: config.quantity_precision,
            recv_window_ms: config.recv_window_ms,
        }
    }

    pub fn authenticated(
        client: reqwest::Client,
        base_url: &str,
        config: &BinanceConfig,
        credentials: BinanceCredentials,
    ) -> Self {
        Self {
            credentials: Some(credentials),
            ..Self::public(client, base_url, config)
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Truncate toward zero to the exchange step size
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        quantity.round_dp_with_strategy(self.quantity_precision, RoundingStrategy::ToZero)
    }

    fn credentials(&self) -> ExchangeResult<&BinanceCredentials> {
        self.credentials.as_ref().ok_or_else(|| {
            ExchangeError::AuthenticationFailed("adapter has no credential attached".to_string())
        })
    }

    async fn read_body(response: reqwest::Response) -> ExchangeResult<String> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(ExchangeError::from_api_body(status.as_u16(), &body))
        }
    }

    /// Send a signed request and return the raw success body
    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> ExchangeResult<String> {
        let credentials = self.credentials()?;
        params.push(("recvWindow", self.recv_window_ms.to_string()));
        let timestamp = chrono::Utc::now().timestamp_millis();
        let query = credentials.sign_params_ordered(&params, timestamp)?;

        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .client
            .request(method, url)
            .header("X-MBX-APIKEY", credentials.api_key.as_str())
            .send()
            .await?;

        Self::read_body(response).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        self.signed_request(
            Method::POST,
            "/fapi/v1/leverage",
            vec![("symbol", symbol.to_string()), ("leverage", leverage.to_string())],
        )
        .await?;
        debug!(symbol = %symbol, leverage, "Leverage set");
        Ok(())
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceFuturesAdapter {
    async fn get_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let url = format!("{}/fapi/v1/ticker/price", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[("symbol", symbol)])
            .send()
            .await?;
        let body = Self::read_body(response).await?;

        let ticker: TickerPrice = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::InvalidResponse(format!("ticker: {}", e)))?;
        let price = parse_decimal("price", &ticker.price)?;
        if price <= Decimal::ZERO {
            return Err(ExchangeError::InvalidResponse(format!(
                "non-positive price {} for {}",
                price, symbol
            )));
        }
        Ok(price)
    }

    async fn place_order(&self, order: OrderRequest) -> ExchangeResult<OrderResponse> {
        let quantity = self.round_quantity(order.quantity);
        if quantity <= Decimal::ZERO {
            return Err(ExchangeError::OrderRejected(format!(
                "quantity {} rounds to zero at {} decimals",
                order.quantity, self.quantity_precision
            )));
        }

        if !order.reduce_only {
            self.set_leverage(&order.symbol, order.leverage).await?;
        }

        let mut params = vec![
            ("symbol", order.symbol.clone()),
            ("side", order.side.as_str().to_string()),
            ("type", order.order_type.as_str().to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("newClientOrderId", order.client_order_id.clone()),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        if order.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }

        info!(
            symbol = %order.symbol,
            side = order.side.as_str(),
            quantity = %quantity,
            reduce_only = order.reduce_only,
            client_order_id = %order.client_order_id,
            "Placing order"
        );

        let body = self.signed_request(Method::POST, "/fapi/v1/order", params).await?;
        let placed: NewOrderResponse = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::InvalidResponse(format!("order: {}", e)))?;

        let status = OrderStatus::from_exchange(&placed.status).ok_or_else(|| {
            ExchangeError::InvalidResponse(format!("unknown order status '{}'", placed.status))
        })?;
        if !status.is_accepted() {
            return Err(ExchangeError::OrderRejected(format!(
                "order {} ended {}",
                placed.order_id, placed.status
            )));
        }

        let filled_quantity = match placed.executed_qty.as_deref() {
            Some(raw) => parse_decimal("executedQty", raw)?,
            None => Decimal::ZERO,
        };
        let avg_price = match placed.avg_price.as_deref() {
            Some(raw) => Some(parse_decimal("avgPrice", raw)?).filter(|p| !p.is_zero()),
            None => None,
        };

        Ok(OrderResponse {
            order_id: placed.order_id.to_string(),
            client_order_id: placed.client_order_id,
            status,
            filled_quantity,
            avg_price,
        })
    }

    async fn ping(&self) -> ExchangeResult<()> {
        let body = self
            .signed_request(Method::GET, "/fapi/v2/balance", Vec::new())
            .await?;
        let balances: Vec<BalanceEntry> = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::InvalidResponse(format!("balance: {}", e)))?;

        if let Some(usdt) = balances.iter().find(|b| b.asset == "USDT") {
            debug!(balance = %usdt.balance, "Credential balance read");
        }
        Ok(())
    }

    fn exchange_name(&self) -> &'static str {
        EXCHANGE_NAME
    }
}

// =============================================================================
// Tests
// =============================================================================
