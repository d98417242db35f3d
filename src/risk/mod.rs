//! Risk admission
//!
//! Every (signal, user) pair goes through `RiskAdmissionController::admit`
//! before anything is sized or sent. Hard gates (freshness, directory,
//! plan concurrency, sentiment) deny outright; the five scored checks are
//! then folded into a composite score. Any internal failure denies.

pub mod checks;
pub mod volatility;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{PlansConfig, RiskConfig};
use crate::directory::Directory;
use crate::domain::{Alert, CheckResult, Exchange, RiskEvent, RiskProfile, Signal, UserId};
use crate::sentiment::SentimentGate;
use crate::store::{OperationStore, StoreError};

pub use checks::{composite_score, dominant_failure, CheckParams};
pub use volatility::VolatilityTracker;

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of one admission
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub approved: bool,
    pub reason: String,
    pub risk_score: f64,
    pub checks: Vec<CheckResult>,
}

impl Decision {
    fn deny(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
            risk_score: 0.0,
            checks: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Reservations {
    per_user: HashMap<UserId, u32>,
    notional: Decimal,
}

/// Orders admitted but not yet persisted as `pending`.
///
/// Admission counts them against plan concurrency and global exposure so a
/// burst of signals cannot overshoot the limits while the queue drains.
#[derive(Default)]
pub struct ReservationBook {
    inner: Mutex<Reservations>,
}

impl ReservationBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&self, user_id: UserId, notional: Decimal) {
        let mut inner = self.inner.lock();
        *inner.per_user.entry(user_id).or_default() += 1;
        inner.notional += notional;
    }

    pub fn release(&self, user_id: UserId, notional: Decimal) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.per_user.get_mut(&user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inner.per_user.remove(&user_id);
            }
        }
        inner.notional = (inner.notional - notional).max(Decimal::ZERO);
    }

    pub fn in_flight(&self, user_id: UserId) -> u32 {
        self.inner.lock().per_user.get(&user_id).copied().unwrap_or(0)
    }

    pub fn reserved_notional(&self) -> Decimal {
        self.inner.lock().notional
    }
}

pub struct RiskAdmissionController {
    config: RiskConfig,
    plans: PlansConfig,
    default_exchange: Exchange,
    store: Arc<dyn OperationStore>,
    directory: Directory,
    sentiment: Arc<SentimentGate>,
    volatility: Arc<VolatilityTracker>,
    reservations: Arc<ReservationBook>,
    admissions: Mutex<VecDeque<Instant>>,
}

impl RiskAdmissionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RiskConfig,
        plans: PlansConfig,
        default_exchange: Exchange,
        store: Arc<dyn OperationStore>,
        directory: Directory,
        sentiment: Arc<SentimentGate>,
        volatility: Arc<VolatilityTracker>,
        reservations: Arc<ReservationBook>,
    ) -> Self {
        Self {
            config,
            plans,
            default_exchange,
            store,
            directory,
            sentiment,
            volatility,
            reservations,
            admissions: Mutex::new(VecDeque::new()),
        }
    }

    fn check_params(&self, name: &str) -> CheckParams {
        let w = &self.config.weights;
        let t = &self.config.thresholds;
        let (weight, threshold) = match name {
            checks::EXPOSURE => (w.exposure, t.exposure),
            checks::DAILY_LOSS => (w.daily_loss, t.daily_loss),
            checks::LOSS_STREAK => (w.loss_streak, t.loss_streak),
            checks::VOLATILITY => (w.volatility, t.volatility),
            _ => (w.operation_rate, t.operation_rate),
        };
        CheckParams { weight, threshold }
    }

    /// Approvals in the trailing minute
    pub fn recent_admissions(&self) -> usize {
        let mut admissions = self.admissions.lock();
        let now = Instant::now();
        while admissions
            .front()
            .is_some_and(|at| now.duration_since(*at) > RATE_WINDOW)
        {
            admissions.pop_front();
        }
        admissions.len()
    }

    /// Decide whether `signal` may open an operation for `user_id`
    pub async fn admit(&self, signal: &Signal, user_id: UserId) -> Decision {
        let now = Utc::now();
        if signal.is_expired(now, self.config.signal_freshness()) {
            debug!(
                signal_id = %signal.id,
                user_id = %user_id,
                age_secs = signal.age(now).num_seconds(),
                "[ADMISSION] Signal expired"
            );
            return Decision::deny(format!("signal expired ({}s old)", signal.age(now).num_seconds()));
        }

        let mut decision = match self.evaluate(signal, user_id, now).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(signal_id = %signal.id, user_id = %user_id, error = %e, "[ADMISSION] Evaluation failed, denying");
                Decision::deny(format!("internal error: {}", e))
            }
        };

        if decision.risk_score > self.config.alert_threshold {
            self.raise_alert(signal, user_id, &decision, now).await;
        }

        let event = RiskEvent {
            id: Uuid::new_v4(),
            user_id,
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            side: signal.side,
            approved: decision.approved,
            reason: decision.reason.clone(),
            risk_score: decision.risk_score,
            checks: decision.checks.clone(),
            created_at: now,
        };
        if let Err(e) = self.store.record_risk_event(&event).await {
            error!(signal_id = %signal.id, user_id = %user_id, error = %e, "[ADMISSION] Failed to record risk event");
            if decision.approved {
                decision.approved = false;
                decision.reason = format!("internal error: risk event not recorded: {}", e);
            }
        }

        if decision.approved {
            self.admissions.lock().push_back(Instant::now());
            info!(
                signal_id = %signal.id,
                user_id = %user_id,
                symbol = %signal.symbol,
                side = %signal.side,
                risk_score = %format!("{:.3}", decision.risk_score),
                "[ADMISSION] Approved"
            );
        } else {
            info!(
                signal_id = %signal.id,
                user_id = %user_id,
                symbol = %signal.symbol,
                side = %signal.side,
                risk_score = %format!("{:.3}", decision.risk_score),
                reason = %decision.reason,
                "[ADMISSION] Denied"
            );
        }

        decision
    }

    async fn evaluate(&self, signal: &Signal, user_id: UserId, now: DateTime<Utc>) -> Result<Decision, StoreError> {
        let snapshot = self.directory.current();
        let exchange = signal.exchange.unwrap_or(self.default_exchange);

        let Some(entry) = snapshot.user(user_id) else {
            return Ok(Decision::deny("user not in directory"));
        };
        if !entry.user.active {
            return Ok(Decision::deny("user inactive"));
        }
        if snapshot.eligible_credential(user_id, exchange).is_none() {
            return Ok(Decision::deny(format!("no eligible credential for {}", exchange)));
        }

        let limits = self.plans.limits_for(entry.user.plan);
        let open = self.store.count_open_operations(user_id).await? + self.reservations.in_flight(user_id);
        if open >= limits.max_concurrent_operations {
            return Ok(Decision::deny(format!(
                "plan {} concurrent operation limit reached ({}/{})",
                entry.user.plan, open, limits.max_concurrent_operations
            )));
        }

        let sentiment = self.sentiment.current();
        if !self.sentiment.side_allowed_at(sentiment, signal.side) {
            return Ok(Decision::deny(format!(
                "sentiment {} does not allow {} entries",
                sentiment, signal.side
            )));
        }

        let profile = self
            .store
            .get_risk_profile(user_id)
            .await?
            .unwrap_or_else(|| RiskProfile::new(user_id));
        let committed = self.store.total_open_notional().await? + self.reservations.reserved_notional();

        let checks = vec![
            checks::exposure(committed, self.config.global_exposure_cap, self.check_params(checks::EXPOSURE)),
            checks::daily_loss(
                profile.daily_loss_on(now.date_naive()),
                entry.user.tradable_balance(),
                limits.daily_loss_limit_pct,
                self.check_params(checks::DAILY_LOSS),
            ),
            checks::loss_streak(
                profile.consecutive_losses,
                self.config.max_consecutive_losses,
                self.check_params(checks::LOSS_STREAK),
            ),
            checks::volatility(
                self.volatility.stddev(&signal.symbol),
                self.config.volatility_reference,
                self.check_params(checks::VOLATILITY),
            ),
            checks::operation_rate(
                self.recent_admissions(),
                self.config.max_operations_per_minute,
                self.check_params(checks::OPERATION_RATE),
            ),
        ];

        let risk_score = composite_score(&checks);
        let passed = checks.iter().filter(|c| c.passed).count();
        let approved = risk_score < self.config.score_ceiling && passed >= self.config.min_passed_checks;

        let reason = if approved {
            "approved".to_string()
        } else if let Some(failure) = dominant_failure(&checks) {
            format!("{} check failed: {}", failure.name, failure.detail)
        } else {
            format!(
                "risk score {:.3} not below ceiling {}",
                risk_score, self.config.score_ceiling
            )
        };

        Ok(Decision {
            approved,
            reason,
            risk_score,
            checks,
        })
    }

    async fn raise_alert(&self, signal: &Signal, user_id: UserId, decision: &Decision, now: DateTime<Utc>) {
        let alert = Alert {
            id: Uuid::new_v4(),
            user_id,
            signal_id: signal.id,
            risk_score: decision.risk_score,
            message: format!(
                "risk score {:.3} above alert threshold {} for {} {} ({})",
                decision.risk_score,
                self.config.alert_threshold,
                signal.side,
                signal.symbol,
                decision.reason
            ),
            created_at: now,
        };
        warn!(
            user_id = %user_id,
            signal_id = %signal.id,
            risk_score = %format!("{:.3}", decision.risk_score),
            "[ADMISSION] Risk alert raised"
        );
        if let Err(e) = self.store.record_alert(&alert).await {
            error!(user_id = %user_id, error = %e, "[ADMISSION] Failed to record alert");
        }
    }
}
