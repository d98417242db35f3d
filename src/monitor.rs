//! Position lifecycle monitor
//!
//! Owns every `active` operation. Each cycle it reads one price per
//! (exchange, symbol), marks positions to market and closes the ones whose
//! stop-loss or take-profit was crossed. The monitor is the only writer of
//! the `active -> closed` transition.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::adapters::{resolve_symbol, AdapterFactory, ExchangeError, OrderRequest};
use crate::config::MonitorConfig;
use crate::core::schedule::{JitteredInterval, JitteredTicker};
use crate::directory::Directory;
use crate::domain::{CloseReason, Exchange, OperationId, OperationStatus, RiskProfile, TradingOperation};
use crate::error::AppError;
use crate::risk::VolatilityTracker;
use crate::store::{OperationPatch, OperationStore, StoreError};

/// Requests handled by the monitor task
#[derive(Debug)]
pub enum MonitorCommand {
    /// Start tracking a freshly activated operation
    Track(TradingOperation),
    /// Close an active operation at the current market price
    ManualClose {
        operation_id: OperationId,
        reply: oneshot::Sender<Result<TradingOperation, AppError>>,
    },
}

/// Summary of one monitor cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub tracked: usize,
    pub priced: usize,
    pub closed: usize,
    pub failed_symbols: usize,
}

type PriceKey = (Exchange, String);

pub struct PositionMonitor {
    store: Arc<dyn OperationStore>,
    factory: Arc<dyn AdapterFactory>,
    directory: Directory,
    volatility: Arc<VolatilityTracker>,
    config: MonitorConfig,
    active: HashMap<OperationId, TradingOperation>,
}

impl PositionMonitor {
    pub fn new(
        store: Arc<dyn OperationStore>,
        factory: Arc<dyn AdapterFactory>,
        directory: Directory,
        volatility: Arc<VolatilityTracker>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            factory,
            directory,
            volatility,
            config,
            active: HashMap::new(),
        }
    }

    fn price_timeout(&self) -> Duration {
        Duration::from_secs(self.config.price_timeout_secs)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_tracking(&self, id: OperationId) -> bool {
        self.active.contains_key(&id)
    }

    /// Rebuild the active map from the store
    pub async fn load_active(&mut self) -> Result<usize, StoreError> {
        let ops = self.store.load_operations_by_status(OperationStatus::Active).await?;
        self.active = ops.into_iter().map(|op| (op.id, op)).collect();
        info!(count = self.active.len(), "[MONITOR] Active operations loaded");
        Ok(self.active.len())
    }

    pub fn track(&mut self, op: TradingOperation) {
        if op.status != OperationStatus::Active {
            warn!(operation_id = %op.id, status = %op.status, "[MONITOR] Refusing to track non-active operation");
            return;
        }
        debug!(operation_id = %op.id, symbol = %op.symbol, "[MONITOR] Tracking operation");
        self.active.insert(op.id, op);
    }

    async fn fetch_price(&self, exchange: Exchange, symbol: &str) -> Result<Decimal, ExchangeError> {
        let adapter = self.factory.market_data(exchange)?;
        let exchange_symbol = resolve_symbol(exchange, symbol);
        match tokio::time::timeout(self.price_timeout(), adapter.get_price(&exchange_symbol)).await {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::NetworkTimeout(self.price_timeout().as_millis() as u64)),
        }
    }

    /// One price per (exchange, symbol), fetched concurrently; failures are dropped
    async fn fetch_prices(&self) -> (HashMap<PriceKey, Decimal>, usize) {
        let keys: HashSet<PriceKey> = self
            .active
            .values()
            .map(|op| (op.exchange, op.symbol.clone()))
            .collect();

        let results = join_all(keys.into_iter().map(|key| async move {
            let result = self.fetch_price(key.0, &key.1).await;
            (key, result)
        }))
        .await;

        let mut prices = HashMap::new();
        let mut failed = 0;
        for ((exchange, symbol), result) in results {
            match result {
                Ok(price) => {
                    prices.insert((exchange, symbol), price);
                }
                Err(e) => {
                    failed += 1;
                    warn!(exchange = %exchange, symbol = %symbol, error = %e, "[MONITOR] Price fetch failed, skipping symbol this cycle");
                }
            }
        }
        (prices, failed)
    }

    /// Mark every tracked operation and close breached ones
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport {
            tracked: self.active.len(),
            ..CycleReport::default()
        };
        if self.active.is_empty() {
            return report;
        }

        let (prices, failed) = self.fetch_prices().await;
        report.failed_symbols = failed;
        for ((_, symbol), price) in &prices {
            self.volatility.record(symbol, *price);
        }

        let mut ids: Vec<OperationId> = self.active.keys().copied().collect();
        ids.sort();
        for id in ids {
            let Some(op) = self.active.get(&id).cloned() else {
                continue;
            };
            let Some(price) = prices.get(&(op.exchange, op.symbol.clone())).copied() else {
                continue;
            };
            report.priced += 1;

            if let Some(reason) = op.breach_at(price) {
                match self.close(&op, reason, price).await {
                    Ok(_) => report.closed += 1,
                    Err(e) => warn!(operation_id = %id, error = %e, "[MONITOR] Close failed, retrying next cycle"),
                }
                continue;
            }

            let pnl = op.pnl_at(price);
            match self.store.update_mark(id, price, pnl).await {
                Ok(true) => {
                    if let Some(tracked) = self.active.get_mut(&id) {
                        tracked.current_price = Some(price);
                        tracked.unrealized_pnl = pnl;
                    }
                }
                Ok(false) => {
                    info!(operation_id = %id, "[MONITOR] Operation no longer active in store, untracking");
                    self.active.remove(&id);
                }
                Err(e) => warn!(operation_id = %id, error = %e, "[MONITOR] Mark update failed"),
            }
        }

        debug!(
            tracked = report.tracked,
            priced = report.priced,
            closed = report.closed,
            failed_symbols = report.failed_symbols,
            "[MONITOR] Cycle complete"
        );
        report
    }

    /// Reduce-only order flattening `op` on the exchange
    async fn close_on_exchange(&self, op: &TradingOperation) -> Result<(), AppError> {
        let credential = match self.directory.current().credential(op.credential_id).cloned() {
            Some(credential) => Some(credential),
            None => self.store.get_credential(op.credential_id).await.ok(),
        };
        let Some(credential) = credential else {
            warn!(
                operation_id = %op.id,
                credential_id = %op.credential_id,
                "[MONITOR] Credential gone, skipping exchange close"
            );
            return Ok(());
        };

        let adapter = self.factory.for_credential(&credential)?;
        let request = OrderRequest::close(op, &resolve_symbol(op.exchange, &op.symbol));
        let response = tokio::time::timeout(self.price_timeout(), adapter.place_order(request))
            .await
            .map_err(|_| ExchangeError::NetworkTimeout(self.price_timeout().as_millis() as u64))??;
        debug!(operation_id = %op.id, order_id = %response.order_id, "[MONITOR] Exchange close acknowledged");
        Ok(())
    }

    /// Close `op` at `price`: exchange order, `active -> closed`, risk
    /// profile and balance settlement
    pub async fn close(
        &mut self,
        op: &TradingOperation,
        reason: CloseReason,
        price: Decimal,
    ) -> Result<TradingOperation, AppError> {
        if self.config.close_on_exchange {
            self.close_on_exchange(op).await?;
        }

        let now = Utc::now();
        let realized = op.pnl_at(price);
        let closed = match self
            .store
            .transition_operation(op.id, OperationStatus::Active, &OperationPatch::close(reason, price, realized, now))
            .await
        {
            Ok(closed) => closed,
            Err(StoreError::Conflict(msg)) => {
                self.active.remove(&op.id);
                return Err(StoreError::Conflict(msg).into());
            }
            Err(e) => return Err(e.into()),
        };
        self.active.remove(&op.id);

        info!(
            operation_id = %op.id,
            user_id = %op.user_id,
            symbol = %op.symbol,
            side = %op.side,
            reason = %reason,
            price = %price,
            realized_pnl = %realized,
            "[MONITOR] Operation closed"
        );

        if let Err(e) = self.update_profile(op, realized).await {
            error!(user_id = %op.user_id, error = %e, "[MONITOR] Risk profile update failed");
        }
        match self.store.apply_settlement(op.user_id, realized).await {
            Ok((balance, bonus)) => debug!(
                user_id = %op.user_id,
                balance = %balance,
                bonus_balance = %bonus,
                "[MONITOR] Settlement applied"
            ),
            Err(e) => error!(user_id = %op.user_id, pnl = %realized, error = %e, "[MONITOR] Settlement failed"),
        }

        Ok(closed)
    }

    async fn update_profile(&self, op: &TradingOperation, realized: Decimal) -> Result<(), StoreError> {
        let mut profile = self
            .store
            .get_risk_profile(op.user_id)
            .await?
            .unwrap_or_else(|| RiskProfile::new(op.user_id));
        profile.record_close(realized, Utc::now());
        self.store.save_risk_profile(&profile).await
    }

    /// Close an active operation at a freshly read price
    pub async fn manual_close(&mut self, id: OperationId) -> Result<TradingOperation, AppError> {
        let op = match self.active.get(&id) {
            Some(op) => op.clone(),
            None => self.store.get_operation(id).await?,
        };
        if op.status != OperationStatus::Active {
            return Err(AppError::Engine(format!(
                "operation {} is {}, only active operations can be closed",
                id, op.status
            )));
        }

        let price = self.fetch_price(op.exchange, &op.symbol).await?;
        self.close(&op, CloseReason::Manual, price).await
    }

    async fn handle(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::Track(op) => self.track(op),
            MonitorCommand::ManualClose { operation_id, reply } => {
                let result = self.manual_close(operation_id).await;
                if let Err(e) = &result {
                    warn!(operation_id = %operation_id, error = %e, "[MONITOR] Manual close failed");
                }
                // Caller may have given up waiting
                let _ = reply.send(result);
            }
        }
    }

    pub async fn run(mut self, mut command_rx: mpsc::Receiver<MonitorCommand>, mut shutdown_rx: broadcast::Receiver<()>) {
        if let Err(e) = self.load_active().await {
            error!(error = %e, "[MONITOR] Failed to load active operations, starting empty");
        }

        let mut ticker = JitteredTicker::new(JitteredInterval::from_secs(
            self.config.interval_secs,
            self.config.jitter_pct,
        ));
        info!(
            interval_secs = self.config.interval_secs,
            close_on_exchange = self.config.close_on_exchange,
            "[MONITOR] Position monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(tracked = self.active.len(), "[MONITOR] Shutdown signal received");
                    break;
                }
                Some(command) = command_rx.recv() => {
                    self.handle(command).await;
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_utils::{TestAdapterFactory, TestMockAdapter};
    use crate::adapters::OrderSide;
    use crate::directory::HotReloadCoordinator;
    use crate::domain::{ApiCredential, PlanTier, Side, Signal, User, ValidationStatus};
    use crate::sizing::OrderParams;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        adapter: Arc<TestMockAdapter>,
        monitor: PositionMonitor,
        user: User,
        credential: ApiCredential,
    }

    async fn fixture() -> Fixture {
        fixture_with(MonitorConfig::default()).await
    }

    async fn fixture_with(config: MonitorConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let user = User {
            id: Uuid::new_v4(),
            active: true,
            plan: PlanTier::Pro,
            balance: dec!(1000),
            bonus_balance: dec!(20),
            custom_trading_enabled: false,
            custom_leverage: None,
            custom_stop_loss_pct: None,
            custom_take_profit_pct: None,
        };
        let mut credential = ApiCredential::new(user.id, Exchange::Binance, "key", "secret");
        credential.status = ValidationStatus::Valid;
        store.insert_user(user.clone()).await;
        store.insert_credential(credential.clone()).await;

        let coordinator = HotReloadCoordinator::new(store.clone(), JitteredInterval::from_secs(3600, 0));
        coordinator.refresh().await.unwrap();

        let adapter = Arc::new(TestMockAdapter::new());
        let monitor = PositionMonitor::new(
            store.clone(),
            Arc::new(TestAdapterFactory::new(adapter.clone())),
            coordinator.directory(),
            Arc::new(VolatilityTracker::new(20)),
            config,
        );
        Fixture {
            store,
            adapter,
            monitor,
            user,
            credential,
        }
    }

    /// Long, entry 100, SL 90, TP 115, 3 units at 5x
    async fn open_long(fx: &Fixture, symbol: &str) -> TradingOperation {
        let signal = Signal::new(symbol, Side::Long, dec!(100));
        let params = OrderParams {
            quantity: dec!(3),
            notional: dec!(300),
            entry_price: dec!(100),
            stop_loss: dec!(90),
            take_profit: dec!(115),
            leverage: 5,
            stop_loss_pct: dec!(10),
            take_profit_pct: dec!(15),
        };
        let op = TradingOperation::new_pending(fx.user.id, fx.credential.id, Exchange::Binance, &signal, &params);
        fx.store.insert_operation(&op).await.unwrap();
        fx.store
            .transition_operation(op.id, OperationStatus::Pending, &OperationPatch::activate("ex-1".into(), Utc::now()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_stop_loss_closes() {
        let mut fx = fixture().await;
        let op = open_long(&fx, "BTCUSDT").await;
        fx.monitor.track(op.clone());
        fx.adapter.set_price("BTCUSDT", dec!(89));

        let report = fx.monitor.run_cycle().await;
        assert_eq!(report.closed, 1);

        let stored = fx.store.get_operation(op.id).await.unwrap();
        assert_eq!(stored.status, OperationStatus::Closed);
        assert_eq!(stored.close_reason, Some(CloseReason::StopLoss));
        // (89 - 100) * 3 * 5
        assert_eq!(stored.realized_pnl, Some(dec!(-165)));
        assert!(stored.closed_at.is_some());
        assert!(!fx.monitor.is_tracking(op.id));
    }

    #[tokio::test]
    async fn test_take_profit_closes() {
        let mut fx = fixture().await;
        let op = open_long(&fx, "BTCUSDT").await;
        fx.monitor.track(op.clone());
        fx.adapter.set_price("BTCUSDT", dec!(116));

        fx.monitor.run_cycle().await;
        let stored = fx.store.get_operation(op.id).await.unwrap();
        assert_eq!(stored.close_reason, Some(CloseReason::TakeProfit));
        assert_eq!(stored.realized_pnl, Some(dec!(240)));
    }

    #[tokio::test]
    async fn test_inside_band_stays_active_and_marked() {
        let mut fx = fixture().await;
        let op = open_long(&fx, "BTCUSDT").await;
        fx.monitor.track(op.clone());
        fx.adapter.set_price("BTCUSDT", dec!(105));

        let report = fx.monitor.run_cycle().await;
        assert_eq!(report.closed, 0);
        let stored = fx.store.get_operation(op.id).await.unwrap();
        assert_eq!(stored.status, OperationStatus::Active);
        assert_eq!(stored.current_price, Some(dec!(105)));
        assert_eq!(stored.unrealized_pnl, dec!(75));
        assert_eq!(fx.adapter.order_count(), 0);
    }

    #[tokio::test]
    async fn test_price_failure_isolated_per_symbol() {
        let mut fx = fixture().await;
        let btc = open_long(&fx, "BTCUSDT").await;
        let eth = open_long(&fx, "ETHUSDT").await;
        fx.monitor.track(btc.clone());
        fx.monitor.track(eth.clone());
        fx.adapter.fail_price("BTCUSDT");
        fx.adapter.set_price("ETHUSDT", dec!(80));

        let report = fx.monitor.run_cycle().await;
        assert_eq!(report.failed_symbols, 1);
        assert_eq!(report.closed, 1);
        assert_eq!(fx.store.get_operation(btc.id).await.unwrap().status, OperationStatus::Active);
        assert_eq!(fx.store.get_operation(eth.id).await.unwrap().status, OperationStatus::Closed);
    }

    #[tokio::test]
    async fn test_symbols_are_deduplicated() {
        let mut fx = fixture().await;
        for _ in 0..3 {
            let op = open_long(&fx, "BTCUSDT").await;
            fx.monitor.track(op);
        }
        fx.adapter.set_price("BTCUSDT", dec!(101));

        fx.monitor.run_cycle().await;
        assert_eq!(fx.adapter.price_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_sends_reduce_only_order() {
        let mut fx = fixture().await;
        let op = open_long(&fx, "BTCUSDT").await;
        fx.monitor.track(op);
        fx.adapter.set_price("BTCUSDT", dec!(50));

        fx.monitor.run_cycle().await;
        let orders = fx.adapter.orders();
        assert_eq!(orders.len(), 1);
        assert!(orders[0].reduce_only);
        assert_eq!(orders[0].side, OrderSide::Sell);
        assert_eq!(orders[0].quantity, dec!(15));
    }

    #[tokio::test]
    async fn test_exchange_close_failure_keeps_position_active() {
        let mut fx = fixture().await;
        let op = open_long(&fx, "BTCUSDT").await;
        fx.monitor.track(op.clone());
        fx.adapter.set_price("BTCUSDT", dec!(50));
        fx.adapter.set_order_failure(true);

        let report = fx.monitor.run_cycle().await;
        assert_eq!(report.closed, 0);
        assert!(fx.monitor.is_tracking(op.id));
        assert_eq!(fx.store.get_operation(op.id).await.unwrap().status, OperationStatus::Active);

        fx.adapter.set_order_failure(false);
        assert_eq!(fx.monitor.run_cycle().await.closed, 1);
    }

    #[tokio::test]
    async fn test_close_updates_profile_and_settles() {
        let mut fx = fixture().await;
        let op = open_long(&fx, "BTCUSDT").await;
        fx.monitor.track(op);
        fx.adapter.set_price("BTCUSDT", dec!(89));

        fx.monitor.run_cycle().await;
        let profile = fx.store.get_risk_profile(fx.user.id).await.unwrap().unwrap();
        assert_eq!(profile.consecutive_losses, 1);
        assert_eq!(profile.total_trades, 1);
        assert_eq!(profile.daily_loss_used, dec!(165));

        // -165: bonus 20 first, then 145 from principal
        let user = fx.store.user(fx.user.id).await.unwrap();
        assert_eq!(user.bonus_balance, dec!(0));
        assert_eq!(user.balance, dec!(855));
    }

    #[tokio::test]
    async fn test_manual_close_uses_fresh_price() {
        let mut fx = fixture().await;
        let op = open_long(&fx, "BTCUSDT").await;
        fx.monitor.track(op.clone());
        fx.adapter.set_price("BTCUSDT", dec!(102));

        let closed = fx.monitor.manual_close(op.id).await.unwrap();
        assert_eq!(closed.close_reason, Some(CloseReason::Manual));
        assert_eq!(closed.realized_pnl, Some(dec!(30)));

        let again = fx.monitor.manual_close(op.id).await;
        assert!(matches!(again, Err(AppError::Engine(_))));
    }

    #[tokio::test]
    async fn test_manual_close_without_price_fails() {
        let mut fx = fixture().await;
        let op = open_long(&fx, "BTCUSDT").await;
        fx.monitor.track(op.clone());
        fx.adapter.fail_price("BTCUSDT");

        assert!(fx.monitor.manual_close(op.id).await.is_err());
        assert_eq!(fx.store.get_operation(op.id).await.unwrap().status, OperationStatus::Active);
    }

    #[tokio::test]
    async fn test_load_active_rebuilds_map() {
        let mut fx = fixture().await;
        let op = open_long(&fx, "BTCUSDT").await;
        let pending = Signal::new("ETHUSDT", Side::Long, dec!(10));
        let params = OrderParams {
            quantity: dec!(1),
            notional: dec!(10),
            entry_price: dec!(10),
            stop_loss: dec!(9),
            take_profit: dec!(11),
            leverage: 5,
            stop_loss_pct: dec!(10),
            take_profit_pct: dec!(15),
        };
        fx.store
            .insert_operation(&TradingOperation::new_pending(fx.user.id, fx.credential.id, Exchange::Binance, &pending, &params))
            .await
            .unwrap();

        assert_eq!(fx.monitor.load_active().await.unwrap(), 1);
        assert!(fx.monitor.is_tracking(op.id));
    }

    #[tokio::test]
    async fn test_operation_closed_elsewhere_is_untracked() {
        let mut fx = fixture_with(MonitorConfig {
            close_on_exchange: false,
            ..MonitorConfig::default()
        })
        .await;
        let op = open_long(&fx, "BTCUSDT").await;
        fx.monitor.track(op.clone());
        fx.store
            .transition_operation(
                op.id,
                OperationStatus::Active,
                &OperationPatch::close(CloseReason::Manual, dec!(100), dec!(0), Utc::now()),
            )
            .await
            .unwrap();
        fx.adapter.set_price("BTCUSDT", dec!(101));

        fx.monitor.run_cycle().await;
        assert!(!fx.monitor.is_tracking(op.id));
        assert_eq!(fx.adapter.order_count(), 0);
    }

    #[tokio::test]
    async fn test_cycles_keep_running_between_commands() {
        let fx = fixture_with(MonitorConfig {
            interval_secs: 1,
            jitter_pct: 0,
            ..MonitorConfig::default()
        })
        .await;
        let breached = open_long(&fx, "BTCUSDT").await;
        let steady = open_long(&fx, "ETHUSDT").await;
        fx.adapter.set_price("BTCUSDT", dec!(89));
        fx.adapter.set_price("ETHUSDT", dec!(100));
        let store = fx.store.clone();

        let (command_tx, command_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(fx.monitor.run(command_rx, shutdown_rx));

        // Commands every 300ms, faster than the 1s cycle
        for _ in 0..10 {
            command_tx.send(MonitorCommand::Track(steady.clone())).await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let stored = store.get_operation(breached.id).await.unwrap();
        assert_eq!(stored.status, OperationStatus::Closed);
        assert_eq!(stored.close_reason, Some(CloseReason::StopLoss));
        assert_eq!(store.get_operation(steady.id).await.unwrap().status, OperationStatus::Active);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_handles_track_and_manual_close() {
        let fx = fixture_with(MonitorConfig {
            interval_secs: 3600,
            ..MonitorConfig::default()
        })
        .await;
        let op = open_long(&fx, "BTCUSDT").await;
        fx.adapter.set_price("BTCUSDT", dec!(110));

        let (command_tx, command_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(fx.monitor.run(command_rx, shutdown_rx));

        let (reply_tx, reply_rx) = oneshot::channel();
        command_tx
            .send(MonitorCommand::ManualClose {
                operation_id: op.id,
                reply: reply_tx,
            })
            .await
            .unwrap();
        let closed = reply_rx.await.unwrap().unwrap();
        assert_eq!(closed.realized_pnl, Some(dec!(150)));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
