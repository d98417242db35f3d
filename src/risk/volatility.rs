//! Rolling per-symbol volatility proxy
//!
//! Keeps the last `window` prices per symbol (fed by signal prices and
//! monitor ticks) and reports the population standard deviation of their
//! log returns.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

pub struct VolatilityTracker {
    window: usize,
    prices: Mutex<HashMap<String, VecDeque<f64>>>,
}

impl VolatilityTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            prices: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, symbol: &str, price: Decimal) {
        let Some(price) = price.to_f64().filter(|p| *p > 0.0 && p.is_finite()) else {
            return;
        };
        let mut prices = self.prices.lock();
        let series = prices.entry(symbol.to_string()).or_default();
        series.push_back(price);
        while series.len() > self.window {
            series.pop_front();
        }
    }

    /// Stddev of log returns; `None` until two returns are available
    pub fn stddev(&self, symbol: &str) -> Option<f64> {
        let prices = self.prices.lock();
        let series = prices.get(symbol)?;
        if series.len() < 3 {
            return None;
        }

        let returns: Vec<f64> = series
            .iter()
            .zip(series.iter().skip(1))
            .map(|(prev, next)| (next / prev).ln())
            .collect();
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        Some(variance.sqrt())
    }

    pub fn samples(&self, symbol: &str) -> usize {
        self.prices.lock().get(symbol).map_or(0, VecDeque::len)
    }
}
