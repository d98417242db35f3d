//! End-to-End Integration Tests
//!
//! This module runs the whole engine against a scripted exchange and the
//! in-memory store:
//! 1. Signal intake, admission and sizing
//! 2. Order execution and hand-off to the monitor
//! 3. Take-profit / stop-loss closes with exchange close orders
//! 4. Settlement and risk profile updates
//! 5. Restart recovery of active operations
//!
//! # Running the tests
//! ```bash
//! cargo test --test full_cycle
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use trade_engine::adapters::errors::{ExchangeError, ExchangeResult};
use trade_engine::adapters::types::{OrderRequest, OrderResponse, OrderStatus};
use trade_engine::adapters::{AdapterFactory, ExchangeAdapter};
use trade_engine::config::AppConfig;
use trade_engine::core::init_test_logging;
use trade_engine::domain::{
    ApiCredential, CloseReason, Exchange, OperationStatus, PlanTier, Side, Signal, TradingOperation, User,
    ValidationStatus,
};
use trade_engine::sentiment::{SentimentError, SentimentSource};
use trade_engine::store::{MemoryStore, OperationStore};
use trade_engine::{EngineDeps, TradingEngine};

// =============================================================================
// Mock Exchange
// =============================================================================

/// Scripted exchange: prices are set by the test, every order is recorded
#[derive(Default)]
struct MockExchange {
    prices: Mutex<HashMap<String, Decimal>>,
    orders: Mutex<Vec<OrderRequest>>,
    reduce_only_orders: AtomicUsize,
    should_fail_orders: AtomicBool,
}

impl MockExchange {
    fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().insert(symbol.to_string(), price);
    }

    fn orders_placed(&self) -> usize {
        self.orders.lock().len()
    }

    fn reduce_only_orders(&self) -> usize {
        self.reduce_only_orders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchange {
    async fn get_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.prices
            .lock()
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::InvalidResponse(format!("no price for {}", symbol)))
    }

    async fn place_order(&self, order: OrderRequest) -> ExchangeResult<OrderResponse> {
        if self.should_fail_orders.load(Ordering::SeqCst) {
            return Err(ExchangeError::OrderRejected("Simulated failure".into()));
        }
        if order.reduce_only {
            self.reduce_only_orders.fetch_add(1, Ordering::SeqCst);
        }
        self.orders.lock().push(order.clone());

        Ok(OrderResponse {
            order_id: format!("mock-{}", order.client_order_id),
            client_order_id: order.client_order_id,
            status: OrderStatus::Filled,
            filled_quantity: order.quantity,
            avg_price: None,
        })
    }

    async fn ping(&self) -> ExchangeResult<()> {
        Ok(())
    }

    fn exchange_name(&self) -> &'static str {
        "mock"
    }
}

struct MockFactory(Arc<MockExchange>);

impl AdapterFactory for MockFactory {
    fn for_credential(&self, _credential: &ApiCredential) -> ExchangeResult<Arc<dyn ExchangeAdapter>> {
        Ok(self.0.clone())
    }

    fn market_data(&self, _exchange: Exchange) -> ExchangeResult<Arc<dyn ExchangeAdapter>> {
        Ok(self.0.clone())
    }
}

struct NeutralSentiment;

#[async_trait]
impl SentimentSource for NeutralSentiment {
    async fn fetch(&self) -> Result<u8, SentimentError> {
        Ok(50)
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn seed_user(store: &MemoryStore, plan: PlanTier, balance: Decimal, bonus: Decimal) -> User {
    let user = User {
        id: Uuid::new_v4(),
        active: true,
        plan,
        balance,
        bonus_balance: bonus,
        custom_trading_enabled: false,
        custom_leverage: None,
        custom_stop_loss_pct: None,
        custom_take_profit_pct: None,
    };
    let mut credential = ApiCredential::new(user.id, Exchange::Binance, "test-key", "test-secret");
    credential.status = ValidationStatus::Valid;
    store.insert_user(user.clone()).await;
    store.insert_credential(credential).await;
    user
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.monitor.interval_secs = 1;
    config.sentiment.enabled = false;
    config.engine.shutdown_grace_secs = 5;
    config
}

async fn start_engine(store: Arc<MemoryStore>, exchange: Arc<MockExchange>) -> TradingEngine {
    init_test_logging("trade_engine=debug");
    TradingEngine::start(
        test_config(),
        EngineDeps {
            store: store.clone(),
            directory_source: store,
            factory: Arc::new(MockFactory(exchange)),
            sentiment_source: Arc::new(NeutralSentiment),
        },
    )
    .await
    .expect("engine starts")
}

/// Poll the store until `count` operations are in `status`
async fn wait_for(store: &MemoryStore, status: OperationStatus, count: usize) -> Vec<TradingOperation> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let ops: Vec<_> = store
                .operations()
                .await
                .into_iter()
                .filter(|op| op.status == status)
                .collect();
            if ops.len() >= count {
                return ops;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {} {:?} operations", count, status))
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_signal_to_take_profit_close() {
    let store = Arc::new(MemoryStore::new());
    let exchange = Arc::new(MockExchange::default());
    let user = seed_user(&store, PlanTier::Pro, dec!(1000), dec!(0)).await;
    exchange.set_price("BTCUSDT", dec!(100));

    let engine = start_engine(store.clone(), exchange.clone()).await;
    engine
        .submit_signal(Signal::new("btc-usdt", Side::Long, dec!(100)))
        .await
        .unwrap();

    // === ENTRY ===
    let active = wait_for(&store, OperationStatus::Active, 1).await;
    let op = &active[0];
    assert_eq!(op.notional, dec!(300));
    assert_eq!(op.quantity, dec!(3));
    assert_eq!(op.leverage, 5);
    assert_eq!(op.stop_loss, dec!(90));
    assert_eq!(op.take_profit, dec!(115));
    assert!(op.exchange_order_id.is_some());

    // === PRICE BETWEEN SL AND TP: stays open ===
    exchange.set_price("BTCUSDT", dec!(105));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let marked = store.get_operation(op.id).await.unwrap();
    assert_eq!(marked.status, OperationStatus::Active);
    assert_eq!(marked.current_price, Some(dec!(105)));
    assert_eq!(marked.unrealized_pnl, dec!(75));

    // === EXIT ===
    exchange.set_price("BTCUSDT", dec!(116));
    let closed = wait_for(&store, OperationStatus::Closed, 1).await;
    assert_eq!(closed[0].close_reason, Some(CloseReason::TakeProfit));
    assert_eq!(closed[0].realized_pnl, Some(dec!(240)));
    assert!(closed[0].closed_at.is_some());
    assert_eq!(exchange.reduce_only_orders(), 1);
    assert_eq!(exchange.orders_placed(), 2);

    // === SETTLEMENT ===
    let settled = store.user(user.id).await.unwrap();
    assert_eq!(settled.balance, dec!(1240));
    let profile = store.get_risk_profile(user.id).await.unwrap().unwrap();
    assert_eq!(profile.total_trades, 1);
    assert_eq!(profile.winning_trades, 1);
    assert_eq!(profile.consecutive_losses, 0);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_loss_consumes_bonus_first() {
    let store = Arc::new(MemoryStore::new());
    let exchange = Arc::new(MockExchange::default());
    let user = seed_user(&store, PlanTier::Pro, dec!(1000), dec!(100)).await;
    exchange.set_price("ETHUSDT", dec!(100));

    let engine = start_engine(store.clone(), exchange.clone()).await;
    engine
        .submit_signal(Signal::new("ETHUSDT", Side::Long, dec!(100)))
        .await
        .unwrap();
    let active = wait_for(&store, OperationStatus::Active, 1).await;
    // 30% of balance + bonus
    assert_eq!(active[0].notional, dec!(330));

    exchange.set_price("ETHUSDT", dec!(89));
    let closed = wait_for(&store, OperationStatus::Closed, 1).await;
    assert_eq!(closed[0].close_reason, Some(CloseReason::StopLoss));
    assert_eq!(closed[0].realized_pnl, Some(dec!(-181.5)));

    let settled = store.user(user.id).await.unwrap();
    assert_eq!(settled.bonus_balance, dec!(0));
    assert_eq!(settled.balance, dec!(918.5));

    let profile = store.get_risk_profile(user.id).await.unwrap().unwrap();
    assert_eq!(profile.consecutive_losses, 1);
    assert_eq!(profile.daily_loss_used, dec!(181.5));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_plan_concurrency_limit_denies_second_signal() {
    let store = Arc::new(MemoryStore::new());
    let exchange = Arc::new(MockExchange::default());
    let user = seed_user(&store, PlanTier::Basic, dec!(1000), dec!(0)).await;

    let engine = start_engine(store.clone(), exchange.clone()).await;
    let first = engine
        .process_signal(Signal::new("BTCUSDT", Side::Long, dec!(50000)))
        .await;
    let second = engine
        .process_signal(Signal::new("SOLUSDT", Side::Long, dec!(150)))
        .await;
    assert_eq!(first.queued, 1);
    assert_eq!(second.denied, 1);

    wait_for(&store, OperationStatus::Active, 1).await;
    assert_eq!(exchange.orders_placed(), 1);

    let events = store.risk_events().await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.user_id == user.id));
    assert_eq!(events.iter().filter(|e| e.approved).count(), 1);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_order_is_terminal_error() {
    let store = Arc::new(MemoryStore::new());
    let exchange = Arc::new(MockExchange::default());
    exchange.should_fail_orders.store(true, Ordering::SeqCst);
    seed_user(&store, PlanTier::Pro, dec!(1000), dec!(0)).await;

    let engine = start_engine(store.clone(), exchange.clone()).await;
    engine
        .submit_signal(Signal::new("BTCUSDT", Side::Short, dec!(50000)))
        .await
        .unwrap();

    let failed = wait_for(&store, OperationStatus::Error, 1).await;
    assert!(failed[0].error_reason.as_deref().unwrap().contains("Simulated failure"));
    assert!(failed[0].exchange_order_id.is_none());

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restart_resumes_monitoring_active_operations() {
    let store = Arc::new(MemoryStore::new());
    let exchange = Arc::new(MockExchange::default());
    seed_user(&store, PlanTier::Pro, dec!(1000), dec!(0)).await;
    exchange.set_price("BTCUSDT", dec!(100));

    let engine = start_engine(store.clone(), exchange.clone()).await;
    engine
        .submit_signal(Signal::new("BTCUSDT", Side::Short, dec!(100)))
        .await
        .unwrap();
    let active = wait_for(&store, OperationStatus::Active, 1).await;
    engine.shutdown().await.unwrap();

    // Short: TP at 85, price falls through it while the engine is down
    exchange.set_price("BTCUSDT", dec!(84));
    let engine = start_engine(store.clone(), exchange.clone()).await;

    let closed = wait_for(&store, OperationStatus::Closed, 1).await;
    assert_eq!(closed[0].id, active[0].id);
    assert_eq!(closed[0].close_reason, Some(CloseReason::TakeProfit));
    assert_eq!(closed[0].realized_pnl, Some(dec!(240)));

    engine.shutdown().await.unwrap();
}
