//! Domain entities shared by every engine component
//!
//! Users and credentials are owned by external account services and only
//! read here (except balances, which the settlement step adjusts on close).
//! `TradingOperation` is the central entity whose lifecycle the engine drives:
//! `pending -> active -> closed | error`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::logging::SanitizedValue;
use crate::sizing::OrderParams;

pub type UserId = Uuid;
pub type CredentialId = Uuid;
pub type OperationId = Uuid;

// ============================================================================
// Enums
// ============================================================================

/// Subscription plan; bounds concurrency and position size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Basic,
    Pro,
    Premium,
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanTier::Basic => write!(f, "basic"),
            PlanTier::Pro => write!(f, "pro"),
            PlanTier::Premium => write!(f, "premium"),
        }
    }
}

/// Supported exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    #[default]
    Binance,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exchange::Binance => write!(f, "binance"),
        }
    }
}

/// Credential environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Live,
    Sandbox,
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short
    pub fn sign(self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Credential validation state, persisted as `pending`, `validating`,
/// `valid` or `invalid:<reason>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValidationStatus {
    Pending,
    Validating,
    Valid,
    Invalid(String),
}

impl ValidationStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationStatus::Valid)
    }

    /// Status keyword without the invalid reason, as used in store filters
    pub fn keyword(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::Validating => "validating",
            ValidationStatus::Valid => "valid",
            ValidationStatus::Invalid(_) => "invalid",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStatus::Invalid(reason) => write!(f, "invalid:{}", reason),
            other => write!(f, "{}", other.keyword()),
        }
    }
}

impl FromStr for ValidationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ValidationStatus::Pending),
            "validating" => Ok(ValidationStatus::Validating),
            "valid" => Ok(ValidationStatus::Valid),
            "invalid" => Ok(ValidationStatus::Invalid("unspecified".to_string())),
            other => match other.strip_prefix("invalid:") {
                Some(reason) => Ok(ValidationStatus::Invalid(reason.to_string())),
                None => Err(format!("unknown validation status '{}'", other)),
            },
        }
    }
}

impl TryFrom<String> for ValidationStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ValidationStatus> for String {
    fn from(value: ValidationStatus) -> Self {
        value.to_string()
    }
}

/// Lifecycle status of a trading operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Admitted and queued, not yet acknowledged by the exchange
    Pending,
    /// Order acknowledged by the exchange, position is live
    Active,
    /// Closed by stop-loss, take-profit or manual request
    Closed,
    /// Exchange rejection or validation failure
    Error,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Active => "active",
            OperationStatus::Closed => "closed",
            OperationStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Closed | OperationStatus::Error)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an operation was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "stop_loss"),
            CloseReason::TakeProfit => write!(f, "take_profit"),
            CloseReason::Manual => write!(f, "manual"),
        }
    }
}

// ============================================================================
// Users & credentials
// ============================================================================

/// Trading account as seen by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub active: bool,
    #[serde(default)]
    pub plan: PlanTier,
    /// Principal balance
    pub balance: Decimal,
    /// Promotional balance, usable for trading and consumed first by losses
    #[serde(default)]
    pub bonus_balance: Decimal,
    /// Opt-in flag for the custom leverage / SL / TP parameters below
    #[serde(default)]
    pub custom_trading_enabled: bool,
    #[serde(default)]
    pub custom_leverage: Option<u32>,
    #[serde(default)]
    pub custom_stop_loss_pct: Option<Decimal>,
    #[serde(default)]
    pub custom_take_profit_pct: Option<Decimal>,
}

impl User {
    /// Principal plus bonus
    pub fn tradable_balance(&self) -> Decimal {
        self.balance + self.bonus_balance
    }
}

/// Exchange API key pair owned by one user
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCredential {
    pub id: CredentialId,
    pub user_id: UserId,
    pub exchange: Exchange,
    pub api_key: String,
    pub api_secret: String,
    #[serde(default)]
    pub environment: Environment,
    pub status: ValidationStatus,
    pub active: bool,
    /// Only the primary key of a (user, exchange) pair drives execution
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiCredential {
    /// New `pending` primary credential, as created by onboarding
    pub fn new(user_id: UserId, exchange: Exchange, api_key: &str, api_secret: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            exchange,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            environment: Environment::Live,
            status: ValidationStatus::Pending,
            active: true,
            is_primary: true,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `valid` + `active` + primary
    pub fn is_eligible(&self) -> bool {
        self.active && self.is_primary && self.status.is_valid()
    }

    /// Compares the fields that affect trading eligibility, ignoring
    /// bookkeeping timestamps such as `last_used_at`
    pub fn same_trading_state(&self, other: &ApiCredential) -> bool {
        self.id == other.id
            && self.exchange == other.exchange
            && self.api_key == other.api_key
            && self.api_secret == other.api_secret
            && self.environment == other.environment
            && self.status == other.status
            && self.active == other.active
            && self.is_primary == other.is_primary
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("exchange", &self.exchange)
            .field("api_key", &SanitizedValue::new(&self.api_key).to_string())
            .field("api_secret", &"[REDACTED]")
            .field("environment", &self.environment)
            .field("status", &self.status)
            .field("active", &self.active)
            .field("is_primary", &self.is_primary)
            .finish()
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Future `received_at` tolerated before a signal counts as expired
pub const MAX_SIGNAL_CLOCK_SKEW_SECS: i64 = 1;

/// Ephemeral market signal; only actionable inside the freshness window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub source: Option<String>,
    /// Target exchange; the engine default applies when absent
    #[serde(default)]
    pub exchange: Option<Exchange>,
}

impl Signal {
    pub fn new(symbol: &str, side: Side, entry_price: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            entry_price,
            received_at: Utc::now(),
            source: None,
            exchange: None,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.received_at)
    }

    /// True once the signal is older than `window`, or stamped further in
    /// the future than clock skew explains
    pub fn is_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let age = self.age(now);
        if age < -chrono::Duration::seconds(MAX_SIGNAL_CLOCK_SKEW_SECS) {
            return true;
        }
        match chrono::Duration::from_std(window) {
            Ok(window) => age > window,
            Err(_) => false,
        }
    }
}

// ============================================================================
// Trading operations
// ============================================================================

/// A single leveraged position opened for one user from one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingOperation {
    pub id: OperationId,
    pub user_id: UserId,
    pub credential_id: CredentialId,
    #[serde(default)]
    pub signal_id: Option<Uuid>,
    pub exchange: Exchange,
    pub symbol: String,
    pub side: Side,
    /// Margin-based size in base units (notional / entry)
    pub quantity: Decimal,
    /// Margin committed, in quote currency
    pub notional: Decimal,
    pub leverage: u32,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    #[serde(default)]
    pub current_price: Option<Decimal>,
    #[serde(default)]
    pub unrealized_pnl: Decimal,
    #[serde(default)]
    pub realized_pnl: Option<Decimal>,
    pub status: OperationStatus,
    #[serde(default)]
    pub exchange_order_id: Option<String>,
    #[serde(default)]
    pub close_reason: Option<CloseReason>,
    #[serde(default)]
    pub error_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl TradingOperation {
    /// Build a `pending` operation from sized order parameters
    pub fn new_pending(
        user_id: UserId,
        credential_id: CredentialId,
        exchange: Exchange,
        signal: &Signal,
        params: &OrderParams,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            credential_id,
            signal_id: Some(signal.id),
            exchange,
            symbol: signal.symbol.clone(),
            side: signal.side,
            quantity: params.quantity,
            notional: params.notional,
            leverage: params.leverage,
            entry_price: params.entry_price,
            stop_loss: params.stop_loss,
            take_profit: params.take_profit,
            current_price: None,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: None,
            status: OperationStatus::Pending,
            exchange_order_id: None,
            close_reason: None,
            error_reason: None,
            created_at: Utc::now(),
            opened_at: None,
            closed_at: None,
        }
    }

    /// PnL = (price - entry) * quantity * leverage, signed by side
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.quantity * Decimal::from(self.leverage) * self.side.sign()
    }

    /// Stop-loss / take-profit evaluation for a price tick
    pub fn breach_at(&self, price: Decimal) -> Option<CloseReason> {
        match self.side {
            Side::Long if price <= self.stop_loss => Some(CloseReason::StopLoss),
            Side::Long if price >= self.take_profit => Some(CloseReason::TakeProfit),
            Side::Short if price >= self.stop_loss => Some(CloseReason::StopLoss),
            Side::Short if price <= self.take_profit => Some(CloseReason::TakeProfit),
            _ => None,
        }
    }
}

// ============================================================================
// Risk records
// ============================================================================

/// Running per-user aggregates updated by operation closure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub user_id: UserId,
    #[serde(default)]
    pub consecutive_losses: u32,
    #[serde(default)]
    pub total_trades: u32,
    #[serde(default)]
    pub winning_trades: u32,
    /// winning / total, 0.0 with no history
    #[serde(default)]
    pub success_rate: f64,
    /// Losses realized on `daily_loss_date` (UTC)
    #[serde(default)]
    pub daily_loss_used: Decimal,
    #[serde(default)]
    pub daily_loss_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

impl RiskProfile {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            consecutive_losses: 0,
            total_trades: 0,
            winning_trades: 0,
            success_rate: 0.0,
            daily_loss_used: Decimal::ZERO,
            daily_loss_date: None,
            updated_at: Utc::now(),
        }
    }

    /// Daily loss consumed on `today`; a stale date counts as zero
    pub fn daily_loss_on(&self, today: NaiveDate) -> Decimal {
        if self.daily_loss_date == Some(today) {
            self.daily_loss_used
        } else {
            Decimal::ZERO
        }
    }

    /// Fold a closed operation's realized PnL into the aggregates
    pub fn record_close(&mut self, realized_pnl: Decimal, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.daily_loss_date != Some(today) {
            self.daily_loss_date = Some(today);
            self.daily_loss_used = Decimal::ZERO;
        }

        self.total_trades += 1;
        if realized_pnl > Decimal::ZERO {
            self.winning_trades += 1;
            self.consecutive_losses = 0;
        } else if realized_pnl < Decimal::ZERO {
            self.consecutive_losses += 1;
            self.daily_loss_used += -realized_pnl;
        }
        self.success_rate = f64::from(self.winning_trades) / f64::from(self.total_trades);
        self.updated_at = now;
    }
}

/// One independent risk check outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    /// Normalized to [0, 1]; higher is riskier
    pub score: f64,
    pub weight: f64,
    pub passed: bool,
    pub detail: String,
}

/// Audit record for an admission decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub id: Uuid,
    pub user_id: UserId,
    pub signal_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub approved: bool,
    pub reason: String,
    pub risk_score: f64,
    #[serde(default)]
    pub checks: Vec<CheckResult>,
    pub created_at: DateTime<Utc>,
}

/// Raised when a risk score passes the alert threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub user_id: UserId,
    pub signal_id: Uuid,
    pub risk_score: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Settlement
// ============================================================================

/// Apply realized PnL to a (principal, bonus) pair.
///
/// Losses consume the bonus balance first, then principal; neither goes
/// below zero. Profits credit principal.
pub fn settle_balances(balance: Decimal, bonus: Decimal, realized_pnl: Decimal) -> (Decimal, Decimal) {
    if realized_pnl >= Decimal::ZERO {
        return (balance + realized_pnl, bonus);
    }

    let loss = -realized_pnl;
    let from_bonus = loss.min(bonus);
    let from_principal = loss - from_bonus;
    (
        (balance - from_principal).max(Decimal::ZERO),
        bonus - from_bonus,
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_operation() -> TradingOperation {
        let signal = Signal::new("BTCUSDT", Side::Long, dec!(100));
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
        TradingOperation::new_pending(Uuid::new_v4(), Uuid::new_v4(), Exchange::Binance, &signal, &params)
    }

    #[test]
    fn test_validation_status_roundtrip_strings() {
        assert_eq!("pending".parse::<ValidationStatus>().unwrap(), ValidationStatus::Pending);
        assert_eq!("valid".parse::<ValidationStatus>().unwrap(), ValidationStatus::Valid);
        assert_eq!(
            "invalid:signature mismatch".parse::<ValidationStatus>().unwrap(),
            ValidationStatus::Invalid("signature mismatch".to_string())
        );
        assert_eq!(
            ValidationStatus::Invalid("http 401".to_string()).to_string(),
            "invalid:http 401"
        );
        assert!("bogus".parse::<ValidationStatus>().is_err());
    }

    #[test]
    fn test_validation_status_serde_as_string() {
        let json = serde_json::to_string(&ValidationStatus::Invalid("timeout".into())).unwrap();
        assert_eq!(json, "\"invalid:timeout\"");
        let back: ValidationStatus = serde_json::from_str("\"validating\"").unwrap();
        assert_eq!(back, ValidationStatus::Validating);
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let cred = ApiCredential::new(Uuid::new_v4(), Exchange::Binance, "AKIA1234567890", "topsecretvalue");
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("topsecretvalue"));
        assert!(!debug.contains("AKIA1234567890"));
        assert!(debug.contains("AKIA...REDACTED"));
    }

    #[test]
    fn test_credential_eligibility() {
        let mut cred = ApiCredential::new(Uuid::new_v4(), Exchange::Binance, "k", "s");
        assert!(!cred.is_eligible(), "pending credentials are not eligible");
        cred.status = ValidationStatus::Valid;
        assert!(cred.is_eligible());
        cred.is_primary = false;
        assert!(!cred.is_eligible(), "non-primary keys are inert");
        cred.is_primary = true;
        cred.active = false;
        assert!(!cred.is_eligible());
    }

    #[test]
    fn test_signal_expiry() {
        let mut signal = Signal::new("ETHUSDT", Side::Short, dec!(2000));
        let now = Utc::now();
        signal.received_at = now - chrono::Duration::seconds(31);
        assert!(signal.is_expired(now, Duration::from_secs(30)));
        signal.received_at = now - chrono::Duration::seconds(5);
        assert!(!signal.is_expired(now, Duration::from_secs(30)));
    }

    #[test]
    fn test_future_signal_is_expired() {
        let mut signal = Signal::new("ETHUSDT", Side::Long, dec!(2000));
        let now = Utc::now();
        signal.received_at = now + chrono::Duration::hours(1);
        assert!(signal.is_expired(now, Duration::from_secs(30)));

        // Sub-second skew from the signal producer is tolerated
        signal.received_at = now + chrono::Duration::milliseconds(500);
        assert!(!signal.is_expired(now, Duration::from_secs(30)));
    }

    #[test]
    fn test_signal_deserialize_defaults() {
        let signal: Signal =
            serde_json::from_str(r#"{"symbol":"BTCUSDT","side":"long","entry_price":"50000"}"#).unwrap();
        assert_eq!(signal.side, Side::Long);
        assert_eq!(signal.entry_price, dec!(50000));
        assert!(signal.exchange.is_none());
    }

    #[test]
    fn test_breach_long() {
        let op = long_operation();
        assert_eq!(op.breach_at(dec!(89)), Some(CloseReason::StopLoss));
        assert_eq!(op.breach_at(dec!(90)), Some(CloseReason::StopLoss));
        assert_eq!(op.breach_at(dec!(116)), Some(CloseReason::TakeProfit));
        assert_eq!(op.breach_at(dec!(105)), None);
    }

    #[test]
    fn test_breach_short_is_inverted() {
        let mut op = long_operation();
        op.side = Side::Short;
        op.stop_loss = dec!(110);
        op.take_profit = dec!(85);
        assert_eq!(op.breach_at(dec!(111)), Some(CloseReason::StopLoss));
        assert_eq!(op.breach_at(dec!(84)), Some(CloseReason::TakeProfit));
        assert_eq!(op.breach_at(dec!(100)), None);
    }

    #[test]
    fn test_pnl_sign_per_side() {
        let mut op = long_operation();
        // (105 - 100) * 3 * 5
        assert_eq!(op.pnl_at(dec!(105)), dec!(75));
        op.side = Side::Short;
        assert_eq!(op.pnl_at(dec!(105)), dec!(-75));
    }

    #[test]
    fn test_risk_profile_record_close() {
        let mut profile = RiskProfile::new(Uuid::new_v4());
        let now = Utc::now();
        profile.record_close(dec!(-10), now);
        profile.record_close(dec!(-5), now);
        assert_eq!(profile.consecutive_losses, 2);
        assert_eq!(profile.daily_loss_on(now.date_naive()), dec!(15));

        profile.record_close(dec!(20), now);
        assert_eq!(profile.consecutive_losses, 0);
        assert_eq!(profile.total_trades, 3);
        assert_eq!(profile.winning_trades, 1);
        assert!((profile.success_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_risk_profile_daily_loss_resets_next_day() {
        let mut profile = RiskProfile::new(Uuid::new_v4());
        let yesterday = Utc::now() - chrono::Duration::days(1);
        profile.record_close(dec!(-40), yesterday);
        assert_eq!(profile.daily_loss_on(Utc::now().date_naive()), Decimal::ZERO);

        profile.record_close(dec!(-1), Utc::now());
        assert_eq!(profile.daily_loss_used, dec!(1));
    }

    #[test]
    fn test_settle_losses_consume_bonus_first() {
        assert_eq!(settle_balances(dec!(1000), dec!(50), dec!(-30)), (dec!(1000), dec!(20)));
        assert_eq!(settle_balances(dec!(1000), dec!(50), dec!(-80)), (dec!(970), dec!(0)));
        assert_eq!(settle_balances(dec!(10), dec!(0), dec!(-80)), (dec!(0), dec!(0)));
    }

    #[test]
    fn test_settle_profit_credits_principal() {
        assert_eq!(settle_balances(dec!(1000), dec!(50), dec!(25)), (dec!(1025), dec!(50)));
    }
}
