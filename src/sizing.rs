//! Position sizing and stop-loss / take-profit pricing
//!
//! Pure functions over `rust_decimal`: the same inputs always produce the
//! same order parameters. Invalid inputs are errors so the caller skips the
//! signal for that user instead of trading with a guessed size.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{PlanLimits, SizingConfig};
use crate::domain::{Side, Signal, User};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SizingError {
    #[error("entry price must be positive (got {0})")]
    InvalidEntryPrice(Decimal),

    #[error("tradable balance must be positive (got {0})")]
    InsufficientBalance(Decimal),

    #[error("leverage {leverage} outside 1..={max}")]
    InvalidLeverage { leverage: u32, max: u32 },

    #[error("stop-loss percent must be within (0, 100) (got {0})")]
    InvalidStopLoss(Decimal),

    #[error("take-profit percent must be positive (got {0})")]
    InvalidTakeProfit(Decimal),
}

/// User-chosen overrides; unset fields derive from the defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomParams {
    pub leverage: Option<u32>,
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
}

/// Which parameter set applies to a user
#[derive(Debug, Clone, PartialEq)]
pub enum SizingPolicy {
    Default,
    Custom(CustomParams),
}

impl SizingPolicy {
    /// Defaults win unless the user explicitly enabled custom trading
    pub fn for_user(user: &User) -> Self {
        if user.custom_trading_enabled {
            SizingPolicy::Custom(CustomParams {
                leverage: user.custom_leverage,
                stop_loss_pct: user.custom_stop_loss_pct,
                take_profit_pct: user.custom_take_profit_pct,
            })
        } else {
            SizingPolicy::Default
        }
    }
}

/// Fully priced order for one user and one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderParams {
    /// Margin-based size: notional / entry
    pub quantity: Decimal,
    /// Margin committed
    pub notional: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub leverage: u32,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
}

/// Stateless sizer holding the configured defaults
#[derive(Debug, Clone, Default)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// (leverage, SL%, TP%) for a policy
    pub fn resolve(&self, policy: &SizingPolicy) -> (u32, Decimal, Decimal) {
        let custom = match policy {
            SizingPolicy::Default => CustomParams::default(),
            SizingPolicy::Custom(params) => params.clone(),
        };
        let leverage = custom.leverage.unwrap_or(self.config.default_leverage);
        let stop_loss_pct = custom
            .stop_loss_pct
            .unwrap_or(self.config.stop_loss_multiplier * Decimal::from(leverage));
        let take_profit_pct = custom
            .take_profit_pct
            .unwrap_or(self.config.take_profit_multiplier * Decimal::from(leverage));
        (leverage, stop_loss_pct, take_profit_pct)
    }

    pub fn size(
        &self,
        user: &User,
        limits: &PlanLimits,
        signal: &Signal,
        policy: &SizingPolicy,
    ) -> Result<OrderParams, SizingError> {
        let entry = signal.entry_price;
        if entry <= Decimal::ZERO {
            return Err(SizingError::InvalidEntryPrice(entry));
        }

        let tradable = user.tradable_balance();
        if tradable <= Decimal::ZERO {
            return Err(SizingError::InsufficientBalance(tradable));
        }

        let (leverage, stop_loss_pct, take_profit_pct) = self.resolve(policy);
        if leverage == 0 || leverage > self.config.max_leverage {
            return Err(SizingError::InvalidLeverage {
                leverage,
                max: self.config.max_leverage,
            });
        }
        if stop_loss_pct <= Decimal::ZERO || stop_loss_pct >= dec!(100) {
            return Err(SizingError::InvalidStopLoss(stop_loss_pct));
        }
        // A short's target at or below -100% would be a non-positive price
        if take_profit_pct <= Decimal::ZERO
            || (signal.side == Side::Short && take_profit_pct >= dec!(100))
        {
            return Err(SizingError::InvalidTakeProfit(take_profit_pct));
        }

        let notional = (tradable * self.config.position_pct / dec!(100)).min(limits.max_position_notional);
        let quantity = notional / entry;
        let (stop_loss, take_profit) = protective_prices(signal.side, entry, stop_loss_pct, take_profit_pct);

        Ok(OrderParams {
            quantity,
            notional,
            entry_price: entry,
            stop_loss,
            take_profit,
            leverage,
            stop_loss_pct,
            take_profit_pct,
        })
    }
}

/// (stop_loss, take_profit) for a side; short is the mirror of long
pub fn protective_prices(
    side: Side,
    entry: Decimal,
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
) -> (Decimal, Decimal) {
    let sl = stop_loss_pct / dec!(100);
    let tp = take_profit_pct / dec!(100);
    match side {
        Side::Long => (entry * (Decimal::ONE - sl), entry * (Decimal::ONE + tp)),
        Side::Short => (entry * (Decimal::ONE + sl), entry * (Decimal::ONE - tp)),
    }
}

// ============================================================================
// Tests
// ============================================================================
