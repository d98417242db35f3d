//! Engine orchestrator
//!
//! Wires the directory, key validator, sentiment poller, position monitor,
//! execution shards and the signal pipeline into one set of tokio tasks that
//! share a broadcast shutdown and a `TaskTracker`.
//!
//! Signal flow:
//! intake -> admission (per tradable user) -> sizing -> reservation ->
//! execution shard -> monitor

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::{resolve_symbol, AdapterFactory};
use crate::config::{AppConfig, PlansConfig};
use crate::core::{ChannelBundle, JitteredInterval};
use crate::directory::{Directory, DirectoryEvent, HotReloadCoordinator, RefreshHandle};
use crate::domain::{CredentialId, Exchange, OperationId, OperationStatus, Signal, TradingOperation};
use crate::error::{AppError, Result};
use crate::execution::{ExecutionJob, ExecutionQueue, ExecutionWorker};
use crate::monitor::{MonitorCommand, PositionMonitor};
use crate::risk::{ReservationBook, RiskAdmissionController, VolatilityTracker};
use crate::sentiment::{SentimentGate, SentimentSource};
use crate::sizing::{PositionSizer, SizingPolicy};
use crate::store::{DirectorySource, OperationPatch, OperationStore, StoreResult};
use crate::validation::KeyValidator;

const INTERRUPTED_REASON: &str = "interrupted before activation, order outcome unknown";

/// External collaborators injected at startup
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn OperationStore>,
    pub directory_source: Arc<dyn DirectorySource>,
    pub factory: Arc<dyn AdapterFactory>,
    pub sentiment_source: Arc<dyn SentimentSource>,
}

/// What happened to one signal across all tradable users
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalReport {
    pub signal_id: Uuid,
    pub considered: usize,
    pub queued: usize,
    pub denied: usize,
    pub sizing_failed: usize,
}

/// Mark `pending` rows left over from a previous run as `error`.
///
/// Their orders never reached the exchange (or their outcome is unknown),
/// and no worker owns them any more.
pub async fn recover_interrupted(store: &dyn OperationStore) -> StoreResult<usize> {
    let pending = store.load_operations_by_status(OperationStatus::Pending).await?;
    let mut recovered = 0;
    for op in pending {
        match store
            .transition_operation(op.id, OperationStatus::Pending, &OperationPatch::fail(INTERRUPTED_REASON))
            .await
        {
            Ok(_) => recovered += 1,
            Err(e) => warn!(operation_id = %op.id, error = %e, "[ENGINE] Could not recover pending operation"),
        }
    }
    if recovered > 0 {
        error!(recovered, "[ENGINE] Marked interrupted pending operations as error, reconcile them on the exchange");
    }
    Ok(recovered)
}

/// Admission, sizing and queueing of incoming signals
pub struct SignalPipeline {
    default_exchange: Exchange,
    plans: PlansConfig,
    directory: Directory,
    admission: RiskAdmissionController,
    sizer: PositionSizer,
    volatility: Arc<VolatilityTracker>,
    queue: ExecutionQueue,
    /// Held across admit -> reserve so concurrent callers see each other's reservations
    fan_out: Mutex<()>,
}

impl SignalPipeline {
    /// Fan one signal out to every tradable user, in user-id order
    pub async fn process(&self, mut signal: Signal) -> SignalReport {
        let _fan_out = self.fan_out.lock().await;
        let exchange = signal.exchange.unwrap_or(self.default_exchange);
        signal.exchange = Some(exchange);
        signal.symbol = resolve_symbol(exchange, &signal.symbol);
        self.volatility.record(&signal.symbol, signal.entry_price);

        let snapshot = self.directory.current();
        let users = snapshot.tradable_users(exchange);
        let mut report = SignalReport {
            signal_id: signal.id,
            considered: users.len(),
            ..SignalReport::default()
        };

        info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            side = %signal.side,
            entry_price = %signal.entry_price,
            users = users.len(),
            "[ENGINE] Signal received"
        );

        for user_id in users {
            let decision = self.admission.admit(&signal, user_id).await;
            if !decision.approved {
                report.denied += 1;
                continue;
            }

            // Admission may have seen a newer snapshot; both reads are whole snapshots
            let snapshot = self.directory.current();
            let (Some(entry), Some(credential)) = (
                snapshot.user(user_id),
                snapshot.eligible_credential(user_id, exchange),
            ) else {
                debug!(user_id = %user_id, "[ENGINE] User left the directory after admission");
                report.denied += 1;
                continue;
            };

            let limits = self.plans.limits_for(entry.user.plan);
            let policy = SizingPolicy::for_user(&entry.user);
            let params = match self.sizer.size(&entry.user, limits, &signal, &policy) {
                Ok(params) => params,
                Err(e) => {
                    warn!(user_id = %user_id, signal_id = %signal.id, error = %e, "[ENGINE] Sizing failed");
                    report.sizing_failed += 1;
                    continue;
                }
            };

            let job = ExecutionJob {
                signal: signal.clone(),
                user_id,
                credential_id: credential.id,
                exchange,
                params,
            };
            match self.queue.submit(job).await {
                Ok(()) => report.queued += 1,
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "[ENGINE] Could not queue order");
                    break;
                }
            }
        }

        info!(
            signal_id = %report.signal_id,
            considered = report.considered,
            queued = report.queued,
            denied = report.denied,
            sizing_failed = report.sizing_failed,
            "[ENGINE] Signal processed"
        );
        report
    }

    async fn run(self: Arc<Self>, mut signal_rx: mpsc::Receiver<Signal>, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    signal_rx.close();
                    let mut dropped = 0;
                    while signal_rx.try_recv().is_ok() {
                        dropped += 1;
                    }
                    info!(dropped, "[ENGINE] Signal intake stopped");
                    break;
                }
                Some(signal) = signal_rx.recv() => {
                    self.process(signal).await;
                }
            }
        }
    }
}

/// Handle to a running engine
pub struct TradingEngine {
    signal_tx: mpsc::Sender<Signal>,
    credential_tx: mpsc::Sender<CredentialId>,
    monitor_tx: mpsc::Sender<MonitorCommand>,
    shutdown_tx: broadcast::Sender<()>,
    tracker: TaskTracker,
    coordinator: Arc<HotReloadCoordinator>,
    pipeline: Arc<SignalPipeline>,
    shutdown_grace: Duration,
}

impl TradingEngine {
    /// Recover, load the directory and spawn every task
    pub async fn start(config: AppConfig, deps: EngineDeps) -> Result<Self> {
        config.validate()?;
        let EngineDeps {
            store,
            directory_source,
            factory,
            sentiment_source,
        } = deps;

        recover_interrupted(store.as_ref()).await?;

        let coordinator = Arc::new(HotReloadCoordinator::new(
            directory_source,
            JitteredInterval::from_secs(config.reload.interval_secs, config.reload.jitter_pct),
        ));
        if let Err(e) = coordinator.refresh().await {
            warn!(error = %e, "[ENGINE] Initial directory load failed, starting with an empty directory");
        }
        let directory = coordinator.directory();

        let channels = ChannelBundle::new(config.engine.channel_capacity);
        let ChannelBundle {
            signal_tx,
            signal_rx,
            credential_tx,
            credential_rx,
            monitor_tx,
            monitor_rx,
            shutdown_tx,
        } = channels;
        let tracker = TaskTracker::new();

        let sentiment = Arc::new(SentimentGate::new(config.sentiment.clone()));
        let volatility = Arc::new(VolatilityTracker::new(config.risk.volatility_window));
        let reservations = Arc::new(ReservationBook::new());

        tracker.spawn(coordinator.clone().run(shutdown_tx.subscribe()));

        let validator = Arc::new(KeyValidator::new(
            store.clone(),
            factory.clone(),
            coordinator.refresh_handle(),
            &config.validation,
        ));
        tracker.spawn(validator.run(credential_rx, shutdown_tx.subscribe()));

        tracker.spawn(sentiment.clone().run(sentiment_source, shutdown_tx.subscribe()));

        let monitor = PositionMonitor::new(
            store.clone(),
            factory.clone(),
            directory.clone(),
            volatility.clone(),
            config.monitor.clone(),
        );
        tracker.spawn(monitor.run(monitor_rx, shutdown_tx.subscribe()));

        let worker = Arc::new(ExecutionWorker::new(
            store.clone(),
            factory,
            directory.clone(),
            reservations.clone(),
            monitor_tx.clone(),
            config.risk.signal_freshness(),
            Duration::from_secs(config.exchanges.binance.order_timeout_secs),
        ));
        let queue = ExecutionQueue::start(
            worker,
            config.engine.queue_shards,
            config.engine.channel_capacity,
            &tracker,
            &shutdown_tx,
        );

        let admission = RiskAdmissionController::new(
            config.risk.clone(),
            config.plans.clone(),
            config.engine.default_exchange,
            store,
            directory.clone(),
            sentiment,
            volatility.clone(),
            reservations,
        );
        let pipeline = Arc::new(SignalPipeline {
            default_exchange: config.engine.default_exchange,
            plans: config.plans.clone(),
            directory,
            admission,
            sizer: PositionSizer::new(config.sizing.clone()),
            volatility,
            queue,
            fan_out: Mutex::new(()),
        });
        tracker.spawn(pipeline.clone().run(signal_rx, shutdown_tx.subscribe()));

        info!(
            users = coordinator.directory().current().len(),
            shards = config.engine.queue_shards,
            "[ENGINE] Engine started"
        );

        Ok(Self {
            signal_tx,
            credential_tx,
            monitor_tx,
            shutdown_tx,
            tracker,
            coordinator,
            pipeline,
            shutdown_grace: Duration::from_secs(config.engine.shutdown_grace_secs),
        })
    }

    /// Queue a signal for the pipeline task
    pub async fn submit_signal(&self, signal: Signal) -> Result<()> {
        self.signal_tx
            .send(signal)
            .await
            .map_err(|_| AppError::Engine("signal intake is closed".to_string()))
    }

    /// Run one signal through admission and queueing inline.
    ///
    /// Serialized with the intake task, so plan limits hold across callers.
    pub async fn process_signal(&self, signal: Signal) -> SignalReport {
        self.pipeline.process(signal).await
    }

    /// Close an active operation at the current market price
    pub async fn close_operation(&self, operation_id: OperationId) -> Result<TradingOperation> {
        let (reply, rx) = oneshot::channel();
        self.monitor_tx
            .send(MonitorCommand::ManualClose { operation_id, reply })
            .await
            .map_err(|_| AppError::Engine("position monitor is not running".to_string()))?;
        rx.await
            .map_err(|_| AppError::Engine("position monitor dropped the request".to_string()))?
    }

    /// Announce a freshly inserted credential to the key validator
    pub async fn credential_added(&self, credential_id: CredentialId) -> Result<()> {
        self.credential_tx
            .send(credential_id)
            .await
            .map_err(|_| AppError::Engine("key validator is not running".to_string()))
    }

    pub fn directory(&self) -> Directory {
        self.coordinator.directory()
    }

    pub fn refresh_handle(&self) -> RefreshHandle {
        self.coordinator.refresh_handle()
    }

    pub fn subscribe_directory_events(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.coordinator.subscribe_events()
    }

    /// Broadcast shutdown and wait for every task, bounded by the grace period
    pub async fn shutdown(self) -> Result<()> {
        info!("[ENGINE] Shutdown initiated");
        let _ = self.shutdown_tx.send(());
        self.tracker.close();

        match tokio::time::timeout(self.shutdown_grace, self.tracker.wait()).await {
            Ok(()) => {
                info!("[ENGINE] All tasks stopped");
                Ok(())
            }
            Err(_) => {
                error!(
                    grace_secs = self.shutdown_grace.as_secs(),
                    remaining = self.tracker.len(),
                    "[ENGINE] Tasks still running after grace period"
                );
                Err(AppError::Engine("shutdown grace period exceeded".to_string()))
            }
        }
    }
}
