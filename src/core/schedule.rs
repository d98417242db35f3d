//! Jittered periodic scheduling shared by the background loops
//!
//! Jitter spreads monitor, reload and sweep queries so restarts of several
//! engine processes do not hit the store and exchanges in lockstep.

use std::pin::Pin;
use std::time::Duration;

use rand::Rng;
use tokio::sync::broadcast;
use tokio::time::{Instant, Sleep};

/// Base interval with +/- `jitter_pct` percent of random spread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitteredInterval {
    base: Duration,
    jitter_pct: u32,
}

impl JitteredInterval {
    pub fn new(base: Duration, jitter_pct: u32) -> Self {
        Self {
            base,
            jitter_pct: jitter_pct.min(99),
        }
    }

    pub fn from_secs(secs: u64, jitter_pct: u32) -> Self {
        Self::new(Duration::from_secs(secs), jitter_pct)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Next delay, uniformly drawn from `base * (1 +/- jitter_pct / 100)`
    pub fn next_delay(&self) -> Duration {
        if self.jitter_pct == 0 {
            return self.base;
        }
        let factor = f64::from(self.jitter_pct) / 100.0;
        let spread = rand::thread_rng().gen_range(-factor..=factor);
        self.base.mul_f64(1.0 + spread)
    }
}

/// Persistent jittered deadline for `select!` loops.
///
/// The deadline only moves after it fires, so other branches completing
/// first never postpone the tick. `tick` is cancel safe.
#[derive(Debug)]
pub struct JitteredTicker {
    interval: JitteredInterval,
    sleep: Pin<Box<Sleep>>,
}

impl JitteredTicker {
    pub fn new(interval: JitteredInterval) -> Self {
        Self {
            sleep: Box::pin(tokio::time::sleep(interval.next_delay())),
            interval,
        }
    }

    pub fn interval(&self) -> &JitteredInterval {
        &self.interval
    }

    /// Wait for the current deadline, then schedule the next one
    pub async fn tick(&mut self) {
        self.sleep.as_mut().await;
        let next = Instant::now() + self.interval.next_delay();
        self.sleep.as_mut().reset(next);
    }
}

/// Sleep for the next jittered delay unless shutdown fires first.
///
/// Returns `false` when the caller should stop.
pub async fn sleep_or_shutdown(
    interval: &JitteredInterval,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval.next_delay()) => true,
        _ = shutdown_rx.recv() => false,
    }
}
