//! Shared test utilities for adapter consumers
//!
//! `TestMockAdapter` is scriptable (prices, order failure, ping failure,
//! latency) and records every order it receives. `TestAdapterFactory`
//! hands the same mock out for every credential and exchange.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::factory::AdapterFactory;
use crate::adapters::traits::ExchangeAdapter;
use crate::adapters::types::{OrderRequest, OrderResponse, OrderStatus};
use crate::domain::{ApiCredential, Exchange};

/// Scriptable mock adapter
#[derive(Default)]
pub struct TestMockAdapter {
    prices: Mutex<HashMap<String, Decimal>>,
    failing_symbols: Mutex<HashSet<String>>,
    /// When true, `place_order` returns an error
    pub should_fail: AtomicBool,
    /// Reason returned by `ping`; `None` means the key is accepted
    pub ping_error: Mutex<Option<String>>,
    pub ping_delay: Mutex<Option<Duration>>,
    pub order_delay: Mutex<Option<Duration>>,
    /// Counter for how many orders were placed (thread-safe for async tests)
    pub order_count: AtomicU64,
    pub price_calls: AtomicU64,
    orders: Mutex<Vec<OrderRequest>>,
}

impl TestMockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().insert(symbol.to_string(), price);
        self.failing_symbols.lock().remove(symbol);
    }

    /// Make `get_price` fail for one symbol
    pub fn fail_price(&self, symbol: &str) {
        self.failing_symbols.lock().insert(symbol.to_string());
    }

    pub fn set_order_failure(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_ping_error(&self, reason: Option<&str>) {
        *self.ping_error.lock() = reason.map(str::to_string);
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().clone()
    }

    pub fn order_count(&self) -> u64 {
        self.order_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeAdapter for TestMockAdapter {
    async fn get_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_symbols.lock().contains(symbol) {
            return Err(ExchangeError::ConnectionFailed(format!("price feed down for {}", symbol)));
        }
        self.prices
            .lock()
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::InvalidResponse(format!("no price for {}", symbol)))
    }

    async fn place_order(&self, order: OrderRequest) -> ExchangeResult<OrderResponse> {
        let delay = *self.order_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.order_count.fetch_add(1, Ordering::SeqCst);
        self.orders.lock().push(order.clone());

        if self.should_fail.load(Ordering::SeqCst) {
            return Err(ExchangeError::OrderRejected("Mock failure".to_string()));
        }

        let avg_price = self.prices.lock().get(&order.symbol).copied();
        Ok(OrderResponse {
            order_id: format!("mock-{}", self.order_count.load(Ordering::SeqCst)),
            client_order_id: order.client_order_id,
            status: OrderStatus::Filled,
            filled_quantity: order.quantity,
            avg_price,
        })
    }

    async fn ping(&self) -> ExchangeResult<()> {
        let delay = *self.ping_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.ping_error.lock().clone() {
            Some(reason) => Err(ExchangeError::AuthenticationFailed(reason)),
            None => Ok(()),
        }
    }

    fn exchange_name(&self) -> &'static str {
        "mock"
    }
}

/// Factory returning one shared mock for everything
pub struct TestAdapterFactory {
    pub adapter: Arc<TestMockAdapter>,
    /// Credentials adapters were requested for, in order
    pub requested: Mutex<Vec<ApiCredential>>,
}

impl TestAdapterFactory {
    pub fn new(adapter: Arc<TestMockAdapter>) -> Self {
        Self {
            adapter,
            requested: Mutex::new(Vec::new()),
        }
    }
}

impl AdapterFactory for TestAdapterFactory {
    fn for_credential(&self, credential: &ApiCredential) -> ExchangeResult<Arc<dyn ExchangeAdapter>> {
        self.requested.lock().push(credential.clone());
        Ok(self.adapter.clone())
    }

    fn market_data(&self, _exchange: Exchange) -> ExchangeResult<Arc<dyn ExchangeAdapter>> {
        Ok(self.adapter.clone())
    }
}
