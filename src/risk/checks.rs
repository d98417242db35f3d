//! The five independent risk checks and their aggregation
//!
//! Each check maps a raw measurement onto a score in [0, 1] (higher is
//! riskier) and passes when the score stays at or below its threshold.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::domain::CheckResult;

pub const EXPOSURE: &str = "exposure";
pub const DAILY_LOSS: &str = "daily_loss";
pub const LOSS_STREAK: &str = "loss_streak";
pub const VOLATILITY: &str = "volatility";
pub const OPERATION_RATE: &str = "operation_rate";

/// Weight and pass threshold of one check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckParams {
    pub weight: f64,
    pub threshold: f64,
}

fn result(name: &str, score: f64, params: CheckParams, detail: String) -> CheckResult {
    let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 1.0 };
    CheckResult {
        name: name.to_string(),
        score,
        weight: params.weight,
        passed: score <= params.threshold,
        detail,
    }
}

fn ratio(numerator: Decimal, denominator: Decimal) -> f64 {
    if denominator <= Decimal::ZERO {
        return if numerator > Decimal::ZERO { 1.0 } else { 0.0 };
    }
    (numerator / denominator).to_f64().unwrap_or(1.0)
}

/// Margin committed platform-wide against the global cap
pub fn exposure(committed: Decimal, cap: Decimal, params: CheckParams) -> CheckResult {
    result(
        EXPOSURE,
        ratio(committed, cap),
        params,
        format!("{} of {} committed", committed, cap),
    )
}

/// Share of today's loss budget (tradable balance x plan percent) consumed
pub fn daily_loss(used: Decimal, tradable_balance: Decimal, limit_pct: Decimal, params: CheckParams) -> CheckResult {
    let budget = tradable_balance * limit_pct / Decimal::ONE_HUNDRED;
    result(
        DAILY_LOSS,
        ratio(used, budget),
        params,
        format!("{} of {} daily loss budget used", used, budget),
    )
}

pub fn loss_streak(consecutive_losses: u32, max: u32, params: CheckParams) -> CheckResult {
    let score = if max == 0 {
        1.0
    } else {
        f64::from(consecutive_losses) / f64::from(max)
    };
    result(
        LOSS_STREAK,
        score,
        params,
        format!("{} consecutive losses (max {})", consecutive_losses, max),
    )
}

/// No price history scores zero
pub fn volatility(stddev: Option<f64>, reference: f64, params: CheckParams) -> CheckResult {
    match stddev {
        Some(sd) if reference > 0.0 => result(
            VOLATILITY,
            sd / reference,
            params,
            format!("log-return stddev {:.5} (reference {})", sd, reference),
        ),
        Some(sd) => result(VOLATILITY, 1.0, params, format!("log-return stddev {:.5}", sd)),
        None => result(VOLATILITY, 0.0, params, "insufficient price history".to_string()),
    }
}

pub fn operation_rate(admissions_last_minute: usize, max_per_minute: u32, params: CheckParams) -> CheckResult {
    let score = if max_per_minute == 0 {
        1.0
    } else {
        admissions_last_minute as f64 / f64::from(max_per_minute)
    };
    result(
        OPERATION_RATE,
        score,
        params,
        format!("{} admissions in the last minute (max {})", admissions_last_minute, max_per_minute),
    )
}

/// Weighted mean of the check scores
pub fn composite_score(checks: &[CheckResult]) -> f64 {
    let total_weight: f64 = checks.iter().map(|c| c.weight).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    checks.iter().map(|c| c.weight * c.score).sum::<f64>() / total_weight
}

/// Failing check with the highest weighted score
pub fn dominant_failure(checks: &[CheckResult]) -> Option<&CheckResult> {
    checks
        .iter()
        .filter(|c| !c.passed)
        .max_by(|a, b| (a.weight * a.score).total_cmp(&(b.weight * b.score)))
}
