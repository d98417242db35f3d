//! Order execution queue
//!
//! Admitted, sized orders are sharded over N workers by a hash of
//! (user, symbol), so orders for one user on one symbol are submitted in
//! arrival order while unrelated orders proceed in parallel. Workers own
//! the `pending -> active | error` transitions. Nothing is retried.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::adapters::{resolve_symbol, AdapterFactory, OrderRequest, OrderResponse};
use crate::directory::Directory;
use crate::domain::{CredentialId, Exchange, OperationStatus, Signal, TradingOperation, UserId};
use crate::error::AppError;
use crate::monitor::MonitorCommand;
use crate::risk::ReservationBook;
use crate::sizing::OrderParams;
use crate::store::{OperationPatch, OperationStore, StoreError};

/// Attempts at persisting `pending -> active` after the exchange acknowledged
const ACTIVATION_ATTEMPTS: u32 = 3;
const ACTIVATION_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One admitted order waiting for dispatch
#[derive(Debug, Clone)]
pub struct ExecutionJob {
    pub signal: Signal,
    pub user_id: UserId,
    pub credential_id: CredentialId,
    pub exchange: Exchange,
    pub params: OrderParams,
}

/// Dispatch logic shared by every shard
pub struct ExecutionWorker {
    store: Arc<dyn OperationStore>,
    factory: Arc<dyn AdapterFactory>,
    directory: Directory,
    reservations: Arc<ReservationBook>,
    monitor_tx: mpsc::Sender<MonitorCommand>,
    signal_freshness: Duration,
    order_timeout: Duration,
}

impl ExecutionWorker {
    pub fn new(
        store: Arc<dyn OperationStore>,
        factory: Arc<dyn AdapterFactory>,
        directory: Directory,
        reservations: Arc<ReservationBook>,
        monitor_tx: mpsc::Sender<MonitorCommand>,
        signal_freshness: Duration,
        order_timeout: Duration,
    ) -> Self {
        Self {
            store,
            factory,
            directory,
            reservations,
            monitor_tx,
            signal_freshness,
            order_timeout,
        }
    }

    /// Persist, dispatch and settle the status of one job.
    ///
    /// Returns the operation in its final state for this worker (`active`
    /// or `error`), or `None` if it could not be persisted.
    pub async fn execute(&self, job: ExecutionJob) -> Option<TradingOperation> {
        let op = TradingOperation::new_pending(job.user_id, job.credential_id, job.exchange, &job.signal, &job.params);
        let inserted = self.store.insert_operation(&op).await;
        self.reservations.release(job.user_id, job.params.notional);
        if let Err(e) = inserted {
            error!(user_id = %job.user_id, signal_id = %job.signal.id, error = %e, "[EXEC] Failed to persist pending operation");
            return None;
        }

        match self.dispatch(&op, &job.signal).await {
            Ok(response) => self.activate(&op, response).await,
            Err(reason) => self.fail(&op, reason).await,
        }
    }

    async fn dispatch(&self, op: &TradingOperation, signal: &Signal) -> Result<OrderResponse, String> {
        if signal.is_expired(Utc::now(), self.signal_freshness) {
            return Err(format!(
                "signal expired before dispatch ({}s old)",
                signal.age(Utc::now()).num_seconds()
            ));
        }

        let credential = {
            let snapshot = self.directory.current();
            let user_active = snapshot.user(op.user_id).is_some_and(|entry| entry.user.active);
            match snapshot.credential(op.credential_id) {
                Some(credential) if user_active && credential.is_eligible() => credential.clone(),
                _ => return Err("credential no longer eligible".to_string()),
            }
        };

        let adapter = self.factory.for_credential(&credential).map_err(|e| e.to_string())?;
        let request = OrderRequest::open(op, &resolve_symbol(op.exchange, &op.symbol));
        debug!(operation_id = %op.id, symbol = %request.symbol, quantity = %request.quantity, "[EXEC] Dispatching order");

        match tokio::time::timeout(self.order_timeout, adapter.place_order(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("order timeout after {}ms", self.order_timeout.as_millis())),
        }
    }

    /// `pending -> active`, retried on transient store errors
    async fn persist_activation(&self, op: &TradingOperation, patch: &OperationPatch) -> Result<TradingOperation, StoreError> {
        let mut attempt = 1;
        loop {
            match self.store.transition_operation(op.id, OperationStatus::Pending, patch).await {
                Ok(active) => return Ok(active),
                Err(e @ (StoreError::Conflict(_) | StoreError::NotFound | StoreError::InvalidData(_))) => return Err(e),
                Err(e) if attempt >= ACTIVATION_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!(operation_id = %op.id, attempt, error = %e, "[EXEC] Activation write failed, retrying");
                    tokio::time::sleep(ACTIVATION_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn activate(&self, op: &TradingOperation, response: OrderResponse) -> Option<TradingOperation> {
        let now = Utc::now();
        let patch = OperationPatch::activate(response.order_id.clone(), now);
        let active = match self.persist_activation(op, &patch).await {
            Ok(active) => active,
            Err(e) => {
                error!(
                    operation_id = %op.id,
                    user_id = %op.user_id,
                    symbol = %op.symbol,
                    exchange_order_id = %response.order_id,
                    error = %e,
                    "[EXEC] Order placed but activation was not persisted, position needs manual reconciliation"
                );
                let patch = OperationPatch::fail(format!("activation not persisted: {}", e))
                    .with_exchange_order_id(response.order_id.clone());
                return match self.store.transition_operation(op.id, OperationStatus::Pending, &patch).await {
                    Ok(failed) => Some(failed),
                    Err(e) => {
                        error!(operation_id = %op.id, error = %e, "[EXEC] Failed to persist error status");
                        None
                    }
                };
            }
        };

        if let Err(e) = self.store.touch_credential(op.credential_id, now).await {
            warn!(credential_id = %op.credential_id, error = %e, "[EXEC] Failed to touch credential");
        }

        info!(
            operation_id = %active.id,
            user_id = %active.user_id,
            symbol = %active.symbol,
            side = %active.side,
            quantity = %active.quantity,
            leverage = active.leverage,
            exchange_order_id = %response.order_id,
            "[EXEC] Operation active"
        );

        if self.monitor_tx.send(MonitorCommand::Track(active.clone())).await.is_err() {
            warn!(operation_id = %active.id, "[EXEC] Monitor channel closed, operation will be picked up on restart");
        }
        Some(active)
    }

    async fn fail(&self, op: &TradingOperation, reason: String) -> Option<TradingOperation> {
        warn!(operation_id = %op.id, user_id = %op.user_id, reason = %reason, "[EXEC] Operation failed");
        match self
            .store
            .transition_operation(op.id, OperationStatus::Pending, &OperationPatch::fail(reason))
            .await
        {
            Ok(failed) => Some(failed),
            Err(e) => {
                error!(operation_id = %op.id, error = %e, "[EXEC] Failed to persist error status");
                None
            }
        }
    }
}

/// Shard for (user, symbol); stable for the lifetime of the process
pub fn shard_index(user_id: UserId, symbol: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    user_id.hash(&mut hasher);
    symbol.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}

/// Sender side of the sharded queue
#[derive(Clone)]
pub struct ExecutionQueue {
    shards: Vec<mpsc::Sender<ExecutionJob>>,
    reservations: Arc<ReservationBook>,
}

impl ExecutionQueue {
    /// Spawn one worker per shard on `tracker`
    pub fn start(
        worker: Arc<ExecutionWorker>,
        shards: usize,
        capacity: usize,
        tracker: &TaskTracker,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> Self {
        let reservations = worker.reservations.clone();
        let senders = (0..shards.max(1))
            .map(|shard| {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                tracker.spawn(run_shard(shard, worker.clone(), rx, shutdown_tx.subscribe()));
                tx
            })
            .collect();

        info!(shards = shards.max(1), "[EXEC] Execution queue started");
        Self {
            shards: senders,
            reservations,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Reserve the job's slot and enqueue it on its shard
    pub async fn submit(&self, job: ExecutionJob) -> Result<(), AppError> {
        let shard = shard_index(job.user_id, &job.signal.symbol, self.shards.len());
        let (user_id, notional) = (job.user_id, job.params.notional);
        self.reservations.reserve(user_id, notional);

        if self.shards[shard].send(job).await.is_err() {
            self.reservations.release(user_id, notional);
            return Err(AppError::Engine(format!("execution shard {} is closed", shard)));
        }
        Ok(())
    }
}

async fn run_shard(
    shard: usize,
    worker: Arc<ExecutionWorker>,
    mut rx: mpsc::Receiver<ExecutionJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    debug!(shard, "[EXEC] Worker started");
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                rx.close();
                let mut dropped = 0;
                while let Ok(job) = rx.try_recv() {
                    worker.reservations.release(job.user_id, job.params.notional);
                    dropped += 1;
                }
                info!(shard, dropped, "[EXEC] Worker shutting down");
                break;
            }
            Some(job) = rx.recv() => {
                worker.execute(job).await;
            }
        }
    }
}
